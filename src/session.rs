//! Session (C9): a single-threaded, document-style unit of work over a
//! [`Store`]. Tracks locally-created and locally-fetched resources so that
//! two lookups of the same IRI within one session return the same handle,
//! and batches mutations into one `commit`.
//!
//! Grounded on the reference session's local-tracker-then-store lookup
//! order (`get`), mark-then-flush deletion (`delete`/`commit`), and its
//! temporary-to-permanent IRI bookkeeping (`resolve_iri`).

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use tracing::debug;

use crate::error::{InternalError, OldmError, OldmResult};
use crate::id::{Id, IriHint, BLANK_NODE_AUTHORITY};
use crate::iri_gen::CounterBackend;
use crate::model::Model;
use crate::registry::ModelRegistry;
use crate::resource::Resource;
use crate::value::Value;

/// Backing-store seam a [`Session`] drives. A concrete implementation reads
/// and writes an actual RDF graph; the session only orchestrates ordering,
/// validation, and identity reconciliation.
pub trait Store: CounterBackend {
    fn exists(&self, iri: &str) -> OldmResult<bool>;

    /// Returns a fully-populated resource for `iri`, or `None` if absent.
    /// `types`, if given, seeds the model resolution instead of reading
    /// `rdf:type` triples (used when the caller already knows the type).
    fn get(&self, iri: &str, types: Option<&BTreeSet<String>>) -> OldmResult<Option<Resource>>;

    fn filter(&self, criteria: &FilterCriteria) -> OldmResult<Vec<Resource>>;

    fn sparql_filter(&self, query: &str) -> OldmResult<Vec<Resource>>;

    /// Writes `resource`'s current state: deletes triples for its former
    /// types/attribute values, inserts triples for its current ones. The
    /// resource's permanent IRI is already assigned by the time this is
    /// called; `save` never allocates one itself.
    fn save(&self, resource: &Resource) -> OldmResult<()>;

    /// Removes every triple with `iri` as subject.
    fn delete(&self, iri: &str) -> OldmResult<()>;

    /// True if any triple outside of `excluding_subject` still has `iri` as
    /// its object. Used to decide whether a blank-node target is safe to
    /// cascade-delete.
    fn is_referenced(&self, iri: &str, excluding_subject: &str) -> OldmResult<bool>;
}

/// Selection criteria for [`Session::filter`] / [`Store::filter`].
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub types: Option<BTreeSet<String>>,
    pub hashless_iri: Option<String>,
    pub limit: Option<usize>,
}

/// Locally-known resources, keyed by current IRI, plus the set pending
/// deletion on the next commit.
#[derive(Default)]
struct ResourceTracker {
    by_iri: HashMap<String, Rc<RefCell<Resource>>>,
    to_delete: BTreeSet<String>,
}

impl ResourceTracker {
    fn add(&mut self, resource: Resource) -> Rc<RefCell<Resource>> {
        let iri = resource.id().iri().to_string();
        let handle = Rc::new(RefCell::new(resource));
        self.by_iri.insert(iri, handle.clone());
        handle
    }

    fn find(&self, iri: &str) -> Option<Rc<RefCell<Resource>>> {
        self.by_iri.get(iri).cloned()
    }

    fn dirty_iris(&self) -> Vec<String> {
        self.by_iri
            .iter()
            .filter(|(_, r)| r.borrow().is_dirty())
            .map(|(iri, _)| iri.clone())
            .collect()
    }

    /// Moves every entry whose key changed (temporary -> permanent IRI) to
    /// its new key.
    fn rekey(&mut self, remap: &HashMap<String, String>) {
        for (old, new) in remap {
            if let Some(handle) = self.by_iri.remove(old) {
                self.by_iri.insert(new.clone(), handle);
            }
        }
    }
}

/// A unit of work: tracks resources created or fetched through it, and
/// flushes their accumulated changes to the backing `Store` on `commit`.
pub struct Session<S: Store> {
    registry: Rc<RefCell<ModelRegistry>>,
    store: S,
    tracker: ResourceTracker,
    /// Every temporary->permanent IRI remapping ever committed through this
    /// session, so callers holding a stale temporary IRI can still resolve
    /// the resource for the life of the session.
    resolved_iris: HashMap<String, String>,
}

impl<S: Store> Session<S> {
    pub fn new(registry: Rc<RefCell<ModelRegistry>>, store: S) -> Self {
        Session {
            registry,
            store,
            tracker: ResourceTracker::default(),
            resolved_iris: HashMap::new(),
        }
    }

    /// Creates a new resource, tracked as NEW. `iri`, if given, is used
    /// as-is and is already permanent; otherwise a temporary `Id` is minted
    /// and a permanent one is allocated at the next `commit`.
    pub fn new_resource(
        &mut self,
        iri: Option<String>,
        types: BTreeSet<String>,
        hint: IriHint,
        initial_attributes: HashMap<String, Value>,
    ) -> OldmResult<Rc<RefCell<Resource>>> {
        if types.is_empty() && initial_attributes.is_empty() {
            debug!(iri = iri.as_deref().unwrap_or(""), "new resource has no type nor attribute");
        }

        let (models, implied_types) = self.registry.borrow_mut().find_models_and_types(&types)?;
        let full_types: BTreeSet<String> = types.into_iter().chain(implied_types).collect();

        let id = match iri {
            Some(iri) => Id::permanent(iri),
            None => Id::temporary(),
        };

        let mut resource = Resource::new(id, models, full_types, true).with_hint(hint);
        for (name, value) in initial_attributes {
            resource.set(&name, Some(value), true)?;
        }

        Ok(self.tracker.add(resource))
    }

    /// Looks up `iri` in the local tracker first; on a miss, delegates to
    /// the store and tracks whatever it returns.
    pub fn get(&mut self, iri: &str) -> OldmResult<Option<Rc<RefCell<Resource>>>> {
        if let Some(local) = self.tracker.find(iri) {
            return Ok(Some(local));
        }
        match self.store.get(iri, None)? {
            Some(resource) => Ok(Some(self.tracker.add(resource))),
            None => Ok(None),
        }
    }

    pub fn filter(&mut self, criteria: &FilterCriteria) -> OldmResult<Vec<Rc<RefCell<Resource>>>> {
        let fetched = self.store.filter(criteria)?;
        Ok(self.reconcile(fetched))
    }

    pub fn sparql_filter(&mut self, query: &str) -> OldmResult<Vec<Rc<RefCell<Resource>>>> {
        let fetched = self.store.sparql_filter(query)?;
        Ok(self.reconcile(fetched))
    }

    /// Folds freshly-fetched resources into the tracker, returning the
    /// tracked handle (the existing one, if this IRI was already known) for
    /// each.
    fn reconcile(&mut self, fetched: Vec<Resource>) -> Vec<Rc<RefCell<Resource>>> {
        fetched
            .into_iter()
            .map(|resource| {
                let iri = resource.id().iri().to_string();
                match self.tracker.find(&iri) {
                    Some(existing) => existing,
                    None => self.tracker.add(resource),
                }
            })
            .collect()
    }

    /// Marks a tracked resource for deletion on the next `commit`.
    pub fn delete(&mut self, resource: &Rc<RefCell<Resource>>) {
        let iri = resource.borrow().id().iri().to_string();
        self.tracker.to_delete.insert(iri);
    }

    /// Resolves a (possibly stale, pre-promotion) IRI to whatever this
    /// session last knew it as. Returns `iri` unchanged if it was never
    /// remapped.
    pub fn resolve_iri(&self, iri: &str) -> String {
        let mut current = iri;
        while let Some(next) = self.resolved_iris.get(current) {
            current = next;
        }
        current.to_string()
    }

    /// Flushes every dirty and to-delete resource to the store.
    ///
    /// 1. Validates every dirty resource; aborts with no writes on the
    ///    first failure.
    /// 2. Allocates permanent IRIs for every still-temporary dirty resource
    ///    up front (two-phase commit), then rewrites every dirty resource's
    ///    object-attribute references against that remapping — this breaks
    ///    ordering constraints a dependency cycle between two new resources
    ///    would otherwise impose.
    /// 3. Saves each dirty resource.
    /// 4. Cascade-deletes each resource marked for deletion.
    /// 5. Acknowledges storage (clears pending former values) and forgets
    ///    the delete set.
    pub fn commit(&mut self, _is_end_user: bool) -> OldmResult<()> {
        let dirty_iris = self.tracker.dirty_iris();

        for iri in &dirty_iris {
            let handle = self.tracker.by_iri.get(iri).expect("dirty iri is tracked");
            handle.borrow().check_validity()?;
        }

        let remap = self.allocate_permanent_iris(&dirty_iris)?;
        if !remap.is_empty() {
            for iri in &dirty_iris {
                if let Some(handle) = self.tracker.by_iri.get(iri) {
                    handle.borrow_mut().remap_references(&remap);
                }
            }
        }

        for iri in &dirty_iris {
            let handle = self.tracker.by_iri.get(iri).expect("dirty iri is tracked").clone();
            self.store.save(&handle.borrow())?;
        }

        let to_delete: Vec<String> = self.tracker.to_delete.iter().cloned().collect();
        for iri in &to_delete {
            self.cascade_delete(iri)?;
        }

        for iri in &dirty_iris {
            if let Some(handle) = self.tracker.by_iri.get(iri) {
                handle.borrow_mut().acknowledge_storage();
            }
        }

        self.tracker.rekey(&remap);
        for (old, new) in remap {
            self.resolved_iris.insert(old, new);
        }
        self.tracker.to_delete.clear();
        Ok(())
    }

    fn allocate_permanent_iris(&self, dirty_iris: &[String]) -> OldmResult<HashMap<String, String>> {
        let mut remap = HashMap::new();
        for iri in dirty_iris {
            let handle = self.tracker.by_iri.get(iri).expect("dirty iri is tracked");
            let mut resource = handle.borrow_mut();
            if resource.id().is_permanent() {
                continue;
            }
            let model: Option<&Rc<Model>> = resource.models().first();
            let new_iri = match model {
                Some(model) => model.iri_generator().generate(
                    Some(model.class_iri()),
                    resource.hint(),
                    &self.store,
                )?,
                None => {
                    return Err(OldmError::Internal(InternalError::Invariant(format!(
                        "resource {iri} has no model to generate a permanent IRI from"
                    ))))
                }
            };
            let old_iri = resource.id().iri().to_string();
            resource.receive_id(new_iri.clone());
            remap.insert(old_iri, new_iri);
        }
        Ok(remap)
    }

    fn cascade_delete(&mut self, iri: &str) -> OldmResult<()> {
        let handle = match self.tracker.by_iri.remove(iri) {
            Some(handle) => handle,
            None => {
                self.store.delete(iri)?;
                return Ok(());
            }
        };
        let referenced = handle.borrow().referenced_iris();
        self.store.delete(iri)?;

        for target in referenced {
            if !target.starts_with(BLANK_NODE_AUTHORITY) {
                continue;
            }
            if self.store.is_referenced(&target, iri)? {
                continue;
            }
            self.cascade_delete(&target)?;
        }
        Ok(())
    }
}
