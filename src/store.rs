//! Store (C10): the reference backing implementation of [`crate::session::Store`],
//! plus [`crate::iri_gen::CounterBackend`] and [`crate::registry::BaseIriLookup`]
//! so the same type can be handed straight to both a `Session` and a
//! `ModelRegistry`.
//!
//! Grounded on the graph-building idiom of `rdf_serializers.rs`
//! (`FastGraph`, `MutableGraph`, `Namespace`, `triples_matching`) and the
//! graph-reading idiom of `owl_reader.rs` (matching `SimpleTerm::Iri` /
//! `LiteralDatatype` / `LiteralLanguage` to pull values back out). Holds
//! everything in one in-memory [`FastGraph`]; a networked SPARQL store would
//! implement the same three traits against a live endpoint instead.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use sophia::api::graph::{Graph, MutableGraph};
use sophia::api::ns::rdf;
use sophia::api::prelude::*;
use sophia::api::term::SimpleTerm;
use sophia::inmem::graph::FastGraph;
use sophia::iri::Iri;
use tracing::debug;

use crate::attribute::{Attribute, Container};
use crate::error::{AccessResult, InternalError, OldmError, OldmResult};
use crate::id::Id;
use crate::iri_gen::CounterBackend;
use crate::registry::{BaseIriLookup, ModelRegistry};
use crate::resource::{insert_rdf_list, make_iri, scalar_term, scalars_of, Resource};
use crate::session::{FilterCriteria, Store};
use crate::value::{ScalarValue, Value};

const DEFAULT_CACHE_CAPACITY: usize = 512;
const RDF_NIL_IRI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";
const RDF_TYPE_IRI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
/// Bounds how far [`GraphStore::walk_rdf_list`] will follow an `rdf:rest`
/// chain, so a malformed or cyclic graph fails loudly instead of looping.
const MAX_LIST_NODES: usize = 100_000;

/// A plain least-recently-used cache from resource IRI to its last-loaded
/// snapshot. Invalidated on `save`/`delete` per spec, for the resource
/// itself and for anything it referenced (since that peer's reverse
/// attributes, if any, may now be stale).
#[derive(Default)]
struct ResourceCache {
    capacity: usize,
    entries: HashMap<String, Resource>,
    recency: VecDeque<String>,
}

impl ResourceCache {
    fn new(capacity: usize) -> Self {
        ResourceCache {
            capacity,
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn get(&mut self, iri: &str) -> Option<Resource> {
        let found = self.entries.get(iri).cloned();
        if found.is_some() {
            self.touch(iri);
        }
        found
    }

    fn put(&mut self, iri: String, resource: Resource) {
        if self.entries.insert(iri.clone(), resource).is_none() {
            self.recency.push_back(iri);
        } else {
            self.touch(&iri);
        }
        while self.entries.len() > self.capacity {
            match self.recency.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn touch(&mut self, iri: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == iri) {
            let key = self.recency.remove(pos).expect("position just found");
            self.recency.push_back(key);
        }
    }

    fn invalidate(&mut self, iri: &str) {
        self.entries.remove(iri);
        if let Some(pos) = self.recency.iter().position(|k| k == iri) {
            self.recency.remove(pos);
        }
    }
}

/// An RDF object matched by the narrow SPARQL subset [`GraphStore`] accepts
/// for `sparql_filter`.
#[derive(Debug, Clone)]
enum SparqlObject {
    Iri(String),
    Literal(String),
}

/// In-memory reference `Store`: one [`FastGraph`], a shared [`ModelRegistry`]
/// for resolving type sets to models, and a resource cache.
///
/// Per-class IRI counters are kept in an out-of-band map rather than as
/// triples in the graph; see the grounding ledger for why.
pub struct GraphStore {
    graph: RefCell<FastGraph>,
    registry: Rc<RefCell<ModelRegistry>>,
    counters: RefCell<HashMap<String, u64>>,
    cache: RefCell<ResourceCache>,
}

impl GraphStore {
    pub fn new(registry: Rc<RefCell<ModelRegistry>>) -> Self {
        Self::with_graph(registry, FastGraph::new())
    }

    /// Wraps an already-populated graph, e.g. one parsed from a Turtle fixture.
    pub fn with_graph(registry: Rc<RefCell<ModelRegistry>>, graph: FastGraph) -> Self {
        GraphStore {
            graph: RefCell::new(graph),
            registry,
            counters: RefCell::new(HashMap::new()),
            cache: RefCell::new(ResourceCache::new(DEFAULT_CACHE_CAPACITY)),
        }
    }

    pub fn find_resource_iris(&self, base_iri: &str) -> AccessResult2 {
        crate::registry::find_resource_iris(self, base_iri)
    }

    pub fn find_resource_from_base_uri(&self, base_iri: &str) -> OldmResultString {
        crate::registry::find_resource_from_base_uri(self, base_iri)
    }

    fn all_subjects(&self, graph: &FastGraph) -> BTreeSet<String> {
        graph
            .triples_matching(Any, Any, Any)
            .filter_map(Result::ok)
            .filter_map(|t| match t.s() {
                SimpleTerm::Iri(iri) => Some(iri.to_string()),
                _ => None,
            })
            .collect()
    }

    fn rdf_types_of(&self, graph: &FastGraph, subject: &Iri<String>) -> BTreeSet<String> {
        graph
            .triples_matching([subject], [rdf::type_], Any)
            .filter_map(Result::ok)
            .filter_map(|t| match t.o() {
                SimpleTerm::Iri(iri) => Some(iri.to_string()),
                _ => None,
            })
            .collect()
    }

    fn load_resource(&self, iri: &str, type_set: BTreeSet<String>) -> OldmResult<Resource> {
        let (models, implied) = self.registry.borrow_mut().find_models_and_types(&type_set)?;
        let full_types: BTreeSet<String> = type_set.into_iter().chain(implied).collect();
        let mut resource = Resource::new(Id::permanent(iri.to_string()), models.clone(), full_types, false);

        let graph = self.graph.borrow();
        let subject = make_iri(iri)?;
        for model in &models {
            for attr in model.attributes() {
                if let Some(value) = self.load_attribute_value(&graph, &subject, attr)? {
                    resource.set(attr.name(), Some(value), false)?;
                }
            }
        }
        drop(graph);

        resource.acknowledge_storage();
        Ok(resource)
    }

    fn load_attribute_value(
        &self,
        graph: &FastGraph,
        subject: &Iri<String>,
        attr: &Attribute,
    ) -> OldmResult<Option<Value>> {
        let predicate = make_iri(attr.property_iri())?;
        let objects: Vec<SimpleTerm> = graph
            .triples_matching([subject], [&predicate], Any)
            .filter_map(Result::ok)
            .map(|t| t.o().to_owned())
            .collect();
        if objects.is_empty() {
            return Ok(None);
        }

        match attr.container() {
            Some(Container::List) => {
                let head = objects.into_iter().next().expect("checked non-empty above");
                let items = self.walk_rdf_list(graph, &head, attr)?;
                if items.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Value::List(items)))
                }
            }
            Some(Container::Set) => {
                let items = objects
                    .iter()
                    .map(|o| self.term_to_scalar(o, attr))
                    .collect::<OldmResult<Vec<_>>>()?;
                Ok(Some(Value::Set(items)))
            }
            _ => Ok(Some(Value::Scalar(self.term_to_scalar(&objects[0], attr)?))),
        }
    }

    fn walk_rdf_list(&self, graph: &FastGraph, head: &SimpleTerm, attr: &Attribute) -> OldmResult<Vec<ScalarValue>> {
        let mut items = Vec::new();
        let mut current = head.clone();
        for _ in 0..MAX_LIST_NODES {
            if node_is_rdf_nil(&current) {
                return Ok(items);
            }
            let first = graph
                .triples_matching([&current], [rdf::first], Any)
                .filter_map(Result::ok)
                .map(|t| t.o().to_owned())
                .next()
                .ok_or_else(|| {
                    OldmError::Internal(InternalError::DataStoreError(
                        "rdf:List node is missing rdf:first".to_string(),
                    ))
                })?;
            items.push(self.term_to_scalar(&first, attr)?);
            current = graph
                .triples_matching([&current], [rdf::rest], Any)
                .filter_map(Result::ok)
                .map(|t| t.o().to_owned())
                .next()
                .ok_or_else(|| {
                    OldmError::Internal(InternalError::DataStoreError(
                        "rdf:List node is missing rdf:rest".to_string(),
                    ))
                })?;
        }
        Err(OldmError::Internal(InternalError::DataStoreError(
            "rdf:List chain exceeds the supported length; is the graph cyclic?".to_string(),
        )))
    }

    fn term_to_scalar(&self, term: &SimpleTerm, attr: &Attribute) -> OldmResult<ScalarValue> {
        match term {
            SimpleTerm::Iri(iri) => Ok(ScalarValue::IriRef(iri.to_string())),
            SimpleTerm::LiteralDatatype(lit, _) | SimpleTerm::LiteralLanguage(lit, _) => {
                Ok(attr.from_lexical(&lit.to_string())?)
            }
            other => Err(OldmError::Internal(InternalError::DataStoreError(format!(
                "attribute {} cannot read RDF term {other:?}",
                attr.name()
            )))),
        }
    }

    fn subject_matches_pattern(
        &self,
        graph: &FastGraph,
        subject: &Iri<String>,
        predicate: &str,
        object: &SparqlObject,
    ) -> OldmResult<bool> {
        let pred = make_iri(predicate)?;
        match object {
            SparqlObject::Iri(iri) => {
                let obj = make_iri(iri)?;
                Ok(graph.triples_matching([subject], [&pred], [&obj]).next().is_some())
            }
            SparqlObject::Literal(text) => Ok(graph
                .triples_matching([subject], [&pred], Any)
                .filter_map(Result::ok)
                .any(|t| match t.o() {
                    SimpleTerm::LiteralDatatype(lit, _) | SimpleTerm::LiteralLanguage(lit, _) => {
                        lit.to_string() == *text
                    }
                    _ => false,
                })),
        }
    }

    fn invalidate_cache_for(&self, resource: &Resource) {
        let mut cache = self.cache.borrow_mut();
        cache.invalidate(resource.id().iri());
        for iri in resource.referenced_iris().into_iter().chain(resource.former_referenced_iris()) {
            cache.invalidate(&iri);
        }
    }
}

impl CounterBackend for GraphStore {
    fn read_counter(&self, key: &str) -> OldmResult<Option<u64>> {
        Ok(self.counters.borrow().get(key).copied())
    }

    fn try_advance_counter(&self, key: &str, expected: u64) -> OldmResult<bool> {
        let mut counters = self.counters.borrow_mut();
        let current = counters.get(key).copied().unwrap_or(0);
        if current == expected {
            counters.insert(key.to_string(), expected + 1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reset_counter(&self, key: &str) -> OldmResult<()> {
        self.counters.borrow_mut().remove(key);
        Ok(())
    }
}

impl BaseIriLookup for GraphStore {
    fn resource_iris_with_base(&self, base_iri: &str) -> AccessResult2 {
        let graph = self.graph.borrow();
        let prefix = format!("{base_iri}#");
        Ok(self
            .all_subjects(&graph)
            .into_iter()
            .filter(|s| s == base_iri || s.starts_with(&prefix))
            .collect())
    }
}

impl Store for GraphStore {
    fn exists(&self, iri: &str) -> OldmResult<bool> {
        let subject = make_iri(iri)?;
        let graph = self.graph.borrow();
        Ok(graph.triples_matching([&subject], Any, Any).next().is_some())
    }

    fn get(&self, iri: &str, types: Option<&BTreeSet<String>>) -> OldmResult<Option<Resource>> {
        if let Some(cached) = self.cache.borrow_mut().get(iri) {
            return Ok(Some(cached));
        }
        if !self.exists(iri)? {
            return Ok(None);
        }

        let discovered = {
            let graph = self.graph.borrow();
            let subject = make_iri(iri)?;
            self.rdf_types_of(&graph, &subject)
        };
        let type_set: BTreeSet<String> = match types {
            Some(hint) => hint.iter().cloned().chain(discovered).collect(),
            None => discovered,
        };

        let resource = self.load_resource(iri, type_set)?;
        self.cache.borrow_mut().put(iri.to_string(), resource.clone());
        Ok(Some(resource))
    }

    fn filter(&self, criteria: &FilterCriteria) -> OldmResult<Vec<Resource>> {
        let mut subjects = {
            let graph = self.graph.borrow();
            self.all_subjects(&graph)
        };

        if let Some(hashless) = &criteria.hashless_iri {
            subjects.retain(|s| s.split('#').next() == Some(hashless.as_str()));
        }
        if let Some(types) = &criteria.types {
            let graph = self.graph.borrow();
            subjects.retain(|s| {
                let Ok(subject) = make_iri(s) else { return false };
                types.iter().all(|t| {
                    let Ok(type_iri) = make_iri(t) else { return false };
                    graph.triples_matching([&subject], [rdf::type_], [&type_iri]).next().is_some()
                })
            });
        }

        let mut iris: Vec<String> = subjects.into_iter().collect();
        if let Some(limit) = criteria.limit {
            iris.truncate(limit);
        }

        let mut resources = Vec::with_capacity(iris.len());
        for iri in iris.drain(..) {
            if let Some(resource) = self.get(&iri, criteria.types.as_ref())? {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    /// Supports exactly one SPARQL shape: `SELECT ?s WHERE { ?s <p> <o> . ... }`,
    /// ANDing one or more triple patterns whose subject is always `?s`.
    /// `sophia` isn't built here with a query engine, so anything richer
    /// (OPTIONAL, FILTER, multiple variables) is rejected rather than
    /// half-interpreted.
    fn sparql_filter(&self, query: &str) -> OldmResult<Vec<Resource>> {
        let patterns = parse_sparql_patterns(query)?;
        let matches = {
            let graph = self.graph.borrow();
            let mut matches = Vec::new();
            for subject_str in self.all_subjects(&graph) {
                let subject = make_iri(&subject_str)?;
                let mut all_match = true;
                for (predicate, object) in &patterns {
                    if !self.subject_matches_pattern(&graph, &subject, predicate, object)? {
                        all_match = false;
                        break;
                    }
                }
                if all_match {
                    matches.push(subject_str);
                }
            }
            matches
        };

        let mut resources = Vec::with_capacity(matches.len());
        for iri in matches {
            if let Some(resource) = self.get(&iri, None)? {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    fn save(&self, resource: &Resource) -> OldmResult<()> {
        let subject = make_iri(resource.id().iri())?;
        {
            let mut graph = self.graph.borrow_mut();

            let old_types: Vec<SimpleTerm> = graph
                .triples_matching([&subject], [rdf::type_], Any)
                .filter_map(Result::ok)
                .map(|t| t.o().to_owned())
                .collect();
            for t in old_types {
                graph
                    .remove(&subject, rdf::type_, &t)
                    .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
            }
            for t in resource.types() {
                let type_iri = make_iri(t)?;
                graph
                    .insert(&subject, rdf::type_, &type_iri)
                    .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
            }

            let mut cleared: BTreeSet<String> = BTreeSet::new();
            for (attr, _) in resource.iter_attributes() {
                let property_iri = attr.property_iri().to_string();
                if !cleared.insert(property_iri.clone()) {
                    continue;
                }
                let predicate = make_iri(&property_iri)?;
                let old_objects: Vec<SimpleTerm> = graph
                    .triples_matching([&subject], [&predicate], Any)
                    .filter_map(Result::ok)
                    .map(|t| t.o().to_owned())
                    .collect();
                for object in old_objects {
                    graph
                        .remove(&subject, &predicate, &object)
                        .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
                }
            }

            for (attr, slot) in resource.iter_attributes() {
                let Some(value) = slot.current() else { continue };
                let predicate = make_iri(attr.property_iri())?;

                if let Value::List(items) = value {
                    insert_rdf_list(&mut graph, &subject, &predicate, attr, items)?;
                    continue;
                }

                for scalar in scalars_of(value) {
                    match scalar {
                        ScalarValue::IriRef(iri) => {
                            let object = make_iri(iri)?;
                            graph
                                .insert(&subject, &predicate, &object)
                                .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
                        }
                        other => {
                            let term = scalar_term(attr, other)?;
                            graph
                                .insert(&subject, &predicate, &term)
                                .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
                        }
                    }
                }
            }
        }

        debug!(iri = resource.id().iri(), "saved resource");
        self.invalidate_cache_for(resource);
        Ok(())
    }

    fn delete(&self, iri: &str) -> OldmResult<()> {
        let subject = make_iri(iri)?;
        let referenced = self
            .get(iri, None)?
            .map(|resource| resource.referenced_iris())
            .unwrap_or_default();
        {
            let mut graph = self.graph.borrow_mut();
            let triples: Vec<(SimpleTerm, SimpleTerm, SimpleTerm)> = graph
                .triples_matching([&subject], Any, Any)
                .filter_map(Result::ok)
                .map(|t| (t.s().to_owned(), t.p().to_owned(), t.o().to_owned()))
                .collect();
            for (s, p, o) in triples {
                graph
                    .remove(&s, &p, &o)
                    .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
            }
        }
        let mut cache = self.cache.borrow_mut();
        cache.invalidate(iri);
        for referenced_iri in referenced {
            cache.invalidate(&referenced_iri);
        }
        Ok(())
    }

    fn is_referenced(&self, iri: &str, excluding_subject: &str) -> OldmResult<bool> {
        let object = make_iri(iri)?;
        let graph = self.graph.borrow();
        Ok(graph
            .triples_matching(Any, Any, [&object])
            .filter_map(Result::ok)
            .any(|t| !matches!(t.s(), SimpleTerm::Iri(s) if s.as_str() == excluding_subject)))
    }
}

fn node_is_rdf_nil(term: &SimpleTerm) -> bool {
    matches!(term, SimpleTerm::Iri(iri) if iri.as_str() == RDF_NIL_IRI)
}

fn strip_angle_brackets(token: &str) -> OldmResult<String> {
    token
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .map(String::from)
        .ok_or_else(|| {
            OldmError::Internal(InternalError::SparqlParseError(format!(
                "expected <iri>, got {token}"
            )))
        })
}

fn parse_sparql_patterns(query: &str) -> OldmResult<Vec<(String, SparqlObject)>> {
    let open = query
        .find('{')
        .ok_or_else(|| OldmError::Internal(InternalError::SparqlParseError("missing WHERE {".to_string())))?;
    let close = query
        .rfind('}')
        .ok_or_else(|| OldmError::Internal(InternalError::SparqlParseError("missing closing }".to_string())))?;
    if close <= open {
        return Err(OldmError::Internal(InternalError::SparqlParseError(
            "malformed WHERE clause".to_string(),
        )));
    }

    let mut patterns = Vec::new();
    for clause in query[open + 1..close].split('.') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = clause.split_whitespace().collect();
        if tokens.len() != 3 || tokens[0] != "?s" {
            return Err(OldmError::Internal(InternalError::SparqlParseError(format!(
                "unsupported triple pattern (only `?s <p> <o>` or `?s a <T>` is supported): {clause}"
            ))));
        }

        let predicate = if tokens[1] == "a" {
            RDF_TYPE_IRI.to_string()
        } else {
            strip_angle_brackets(tokens[1])?
        };
        let object = if tokens[2].starts_with('<') {
            SparqlObject::Iri(strip_angle_brackets(tokens[2])?)
        } else if tokens[2].starts_with('"') {
            SparqlObject::Literal(tokens[2].trim_matches('"').to_string())
        } else {
            return Err(OldmError::Internal(InternalError::SparqlParseError(format!(
                "object must be <iri> or \"literal\": {}",
                tokens[2]
            ))));
        };
        patterns.push((predicate, object));
    }
    Ok(patterns)
}

// Type aliases kept local: `AccessResult`/`OldmResult<String>` read awkwardly
// inline above given how many arms return them.
type AccessResult2 = crate::error::AccessResult<BTreeSet<String>>;
type OldmResultString = crate::error::AccessResult<String>;
