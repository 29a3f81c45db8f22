//! Mediator (C11): the top-level facade. Compiles a schema graph plus
//! per-class JSON-LD contexts into a [`ModelRegistry`], then binds a store
//! so callers can open [`Session`]s against it.
//!
//! Grounded on `oldman/mediation/default.py`'s `DefaultCoreMediator`
//! (`model_manager` compiles models up front, a default untyped model is
//! always registered, `get_client_model`/`create_session` are the facade
//! surface) and `oldman/factory.py`'s `ModelFactory._generate` (the
//! per-class compile step: resolve ancestry, extract attributes from the
//! schema graph's property facts merged with the class's JSON-LD context,
//! pick an IRI generator, register).

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::error::{OldmResult, SchemaError, SchemaResult};
use crate::iri_gen::{CounterBackend, IriGenerator};
use crate::model::Model;
use crate::property::Property;
use crate::registry::ModelRegistry;
use crate::resource::Resource;
use crate::schema::context::{parse_context, terms_for_iri};
use crate::schema::graph::SchemaGraphFacts;
use crate::session::{FilterCriteria, Session, Store};

/// Everything needed to compile one Hydra class into a registered [`Model`]:
/// which class, what short name to register it under, its JSON-LD context,
/// and the generator that mints permanent IRIs for its instances.
pub struct ClassSpec {
    pub class_iri: String,
    pub short_name: String,
    pub context: JsonValue,
    pub iri_generator: Box<dyn IriGenerator>,
}

impl ClassSpec {
    pub fn new(
        class_iri: impl Into<String>,
        short_name: impl Into<String>,
        context: JsonValue,
        iri_generator: Box<dyn IriGenerator>,
    ) -> Self {
        ClassSpec {
            class_iri: class_iri.into(),
            short_name: short_name.into(),
            context,
            iri_generator,
        }
    }
}

/// Transitive `rdfs:subClassOf` closure of `class_iri` within `facts`. A
/// cycle in a malformed schema graph terminates the walk instead of looping,
/// since this reads untrusted external schema input.
fn ancestor_closure(facts: &SchemaGraphFacts, class_iri: &str) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut frontier = vec![class_iri.to_string()];
    while let Some(current) = frontier.pop() {
        let Some(fact) = facts.classes.get(&current) else {
            continue;
        };
        for parent in &fact.super_classes {
            if visited.insert(parent.clone()) {
                frontier.push(parent.clone());
            }
        }
    }
    visited
}

/// Compiles every [`ClassSpec`] against `facts` into a fresh [`ModelRegistry`],
/// plus a default untyped model registered under `default_model_name` for
/// resources whose types match nothing else.
pub fn compile_registry(
    facts: &SchemaGraphFacts,
    classes: Vec<ClassSpec>,
    default_model_name: impl Into<String>,
    default_generator: Box<dyn IriGenerator>,
) -> SchemaResult<ModelRegistry> {
    let default_model_name = default_model_name.into();
    let mut registry = ModelRegistry::new(default_model_name.clone());

    let default_model = Model::new(
        format!("urn:oldm:default-model:{default_model_name}"),
        default_model_name.clone(),
        BTreeSet::new(),
        Vec::new(),
        default_generator,
        serde_json::json!({}),
    )?;
    registry.register(default_model, default_model_name)?;

    for spec in classes {
        let class_fact = facts
            .classes
            .get(&spec.class_iri)
            .ok_or_else(|| SchemaError::UndeclaredClassNameError(spec.class_iri.clone()))?;

        let context_terms = parse_context(&spec.context)?;
        let ancestor_iris = ancestor_closure(facts, &spec.class_iri);

        let mut attributes = Vec::new();
        for property_iri in &class_fact.supported_property_iris {
            let Some(property_fact) = facts.properties.get(property_iri) else {
                continue;
            };
            let terms = terms_for_iri(&context_terms, property_iri);
            if terms.is_empty() {
                continue;
            }

            let mut property = Property::new(property_iri.clone(), spec.class_iri.clone())?;
            property.set_access(property_fact.read_only, property_fact.write_only)?;
            if property_fact.is_required {
                property.declare_required();
            }
            for range in &property_fact.ranges {
                property.add_range(range.clone())?;
            }
            for domain in &property_fact.domains {
                property.add_domain(domain.clone())?;
            }

            for term in terms {
                property.add_attribute_metadata(
                    term.name.clone(),
                    term.type_.clone(),
                    term.language.clone(),
                    term.container,
                    term.reversed,
                )?;
            }

            attributes.extend(property.generate_attributes()?);
        }

        let model = Model::new(
            spec.class_iri.clone(),
            spec.short_name.clone(),
            ancestor_iris,
            attributes,
            spec.iri_generator,
            spec.context.clone(),
        )?;
        registry.register(model, spec.short_name)?;
    }

    Ok(registry)
}

/// Facade over a compiled registry, not yet bound to a store. Call
/// [`Mediator::bind_store`] to get something that can open sessions.
pub struct Mediator {
    registry: Rc<RefCell<ModelRegistry>>,
}

impl Mediator {
    pub fn new(registry: ModelRegistry) -> Self {
        Mediator {
            registry: Rc::new(RefCell::new(registry)),
        }
    }

    /// Looks a model up by its registered short name, falling back to its
    /// class IRI.
    pub fn get_model(&self, name_or_iri: &str) -> Option<Rc<Model>> {
        let registry = self.registry.borrow();
        registry
            .get_model_by_name(name_or_iri)
            .or_else(|| registry.get_model(name_or_iri))
    }

    /// The shared registry handle, for constructing a store that needs to
    /// resolve types against the same compiled models (e.g.
    /// [`crate::store::GraphStore::new`]) before calling [`Mediator::bind_store`].
    pub fn registry_handle(&self) -> Rc<RefCell<ModelRegistry>> {
        self.registry.clone()
    }

    /// Binds a store, producing a [`BoundMediator`] that can hand out
    /// sessions. The store is wrapped in an `Rc` so every session opened
    /// from the result shares the same backing state.
    pub fn bind_store<S: Store>(&self, store: S) -> BoundMediator<S> {
        BoundMediator {
            registry: self.registry.clone(),
            store: Rc::new(store),
        }
    }
}

/// Parses `schema_graph` and compiles `classes` against it, the top-level
/// entry point described for this crate's facade.
pub fn create_mediator(
    facts: &SchemaGraphFacts,
    classes: Vec<ClassSpec>,
    default_model_name: impl Into<String>,
    default_generator: Box<dyn IriGenerator>,
) -> SchemaResult<Mediator> {
    let registry = compile_registry(facts, classes, default_model_name, default_generator)?;
    Ok(Mediator::new(registry))
}

/// A [`Mediator`] with a store bound, able to open sessions against it.
pub struct BoundMediator<S: Store> {
    registry: Rc<RefCell<ModelRegistry>>,
    store: Rc<S>,
}

impl<S: Store> BoundMediator<S> {
    pub fn create_session(&self) -> Session<Rc<S>> {
        Session::new(self.registry.clone(), self.store.clone())
    }

    pub fn get_model(&self, name_or_iri: &str) -> Option<Rc<Model>> {
        let registry = self.registry.borrow();
        registry
            .get_model_by_name(name_or_iri)
            .or_else(|| registry.get_model(name_or_iri))
    }
}

impl<T: CounterBackend> CounterBackend for Rc<T> {
    fn read_counter(&self, key: &str) -> OldmResult<Option<u64>> {
        (**self).read_counter(key)
    }

    fn try_advance_counter(&self, key: &str, expected: u64) -> OldmResult<bool> {
        (**self).try_advance_counter(key, expected)
    }

    fn reset_counter(&self, key: &str) -> OldmResult<()> {
        (**self).reset_counter(key)
    }
}

impl<T: Store> Store for Rc<T> {
    fn exists(&self, iri: &str) -> OldmResult<bool> {
        (**self).exists(iri)
    }

    fn get(&self, iri: &str, types: Option<&BTreeSet<String>>) -> OldmResult<Option<Resource>> {
        (**self).get(iri, types)
    }

    fn filter(&self, criteria: &FilterCriteria) -> OldmResult<Vec<Resource>> {
        (**self).filter(criteria)
    }

    fn sparql_filter(&self, query: &str) -> OldmResult<Vec<Resource>> {
        (**self).sparql_filter(query)
    }

    fn save(&self, resource: &Resource) -> OldmResult<()> {
        (**self).save(resource)
    }

    fn delete(&self, iri: &str) -> OldmResult<()> {
        (**self).delete(iri)
    }

    fn is_referenced(&self, iri: &str, excluding_subject: &str) -> OldmResult<bool> {
        (**self).is_referenced(iri, excluding_subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iri_gen::{BlankNodeGenerator, IncrementalGenerator};
    use crate::schema::graph::parse_schema_graph;
    use crate::value::{ScalarValue, Value};
    use std::collections::HashMap;

    const SCHEMA: &str = r#"
        @prefix hydra: <http://www.w3.org/ns/hydra/core#> .
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .
        @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
        @prefix ex: <http://example.org/reference#> .

        ex:Person a hydra:Class ;
            hydra:supportedProperty [
                hydra:property ex:name ;
                hydra:required true
            ] .

        ex:name a owl:DatatypeProperty ;
            rdfs:range xsd:string .
    "#;

    #[derive(Default)]
    struct FakeStore {
        counters: RefCell<HashMap<String, u64>>,
        saved: RefCell<Vec<String>>,
    }

    impl CounterBackend for FakeStore {
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

    impl Store for FakeStore {
        fn exists(&self, iri: &str) -> OldmResult<bool> {
            Ok(self.saved.borrow().iter().any(|s| s == iri))
        }

        fn get(&self, _iri: &str, _types: Option<&BTreeSet<String>>) -> OldmResult<Option<Resource>> {
            Ok(None)
        }

        fn filter(&self, _criteria: &FilterCriteria) -> OldmResult<Vec<Resource>> {
            Ok(Vec::new())
        }

        fn sparql_filter(&self, _query: &str) -> OldmResult<Vec<Resource>> {
            Ok(Vec::new())
        }

        fn save(&self, resource: &Resource) -> OldmResult<()> {
            self.saved.borrow_mut().push(resource.id().iri().to_string());
            Ok(())
        }

        fn delete(&self, iri: &str) -> OldmResult<()> {
            self.saved.borrow_mut().retain(|s| s != iri);
            Ok(())
        }

        fn is_referenced(&self, _iri: &str, _excluding_subject: &str) -> OldmResult<bool> {
            Ok(false)
        }
    }

    fn person_spec() -> ClassSpec {
        ClassSpec::new(
            "http://example.org/reference#Person",
            "Person",
            serde_json::json!({
                "name": { "@id": "http://example.org/reference#name", "@type": "http://www.w3.org/2001/XMLSchema#string" }
            }),
            Box::new(IncrementalGenerator::new(
                "http://example.org/people/",
                "http://example.org/reference#Person",
            )),
        )
    }

    #[test]
    fn compiles_person_model_with_required_name_attribute() {
        let facts = parse_schema_graph(SCHEMA.as_bytes()).unwrap();
        let registry = compile_registry(
            &facts,
            vec![person_spec()],
            "Default",
            Box::new(BlankNodeGenerator),
        )
        .unwrap();

        let model = registry.get_model_by_name("Person").unwrap();
        assert_eq!(model.attribute_count(), 1);
        let name_attr = model.attribute_by_name("name").unwrap();
        assert!(name_attr.is_required());
    }

    #[test]
    fn unbound_mediator_resolves_model_by_name_and_class_iri() {
        let facts = parse_schema_graph(SCHEMA.as_bytes()).unwrap();
        let mediator = create_mediator(&facts, vec![person_spec()], "Default", Box::new(BlankNodeGenerator)).unwrap();

        assert!(mediator.get_model("Person").is_some());
        assert!(mediator.get_model("http://example.org/reference#Person").is_some());
        assert!(mediator.get_model("NoSuchThing").is_none());
    }

    #[test]
    fn bound_mediator_opens_sessions_sharing_one_store() {
        let facts = parse_schema_graph(SCHEMA.as_bytes()).unwrap();
        let mediator = create_mediator(&facts, vec![person_spec()], "Default", Box::new(BlankNodeGenerator)).unwrap();
        let bound = mediator.bind_store(FakeStore::default());

        let mut session_a = bound.create_session();
        let handle = session_a
            .new_resource(
                Some("http://example.org/people/alice".to_string()),
                ["http://example.org/reference#Person".to_string()].into_iter().collect(),
                Default::default(),
                HashMap::from([(
                    "name".to_string(),
                    Value::Scalar(ScalarValue::String("Alice".into())),
                )]),
            )
            .unwrap();
        assert!(handle.borrow().is_valid());
        session_a.commit(true).unwrap();

        let mut session_b = bound.create_session();
        assert!(session_b.get("http://example.org/people/alice").unwrap().is_some());
    }

    #[test]
    fn unknown_class_spec_is_rejected() {
        let facts = parse_schema_graph(SCHEMA.as_bytes()).unwrap();
        let spec = ClassSpec::new(
            "http://example.org/reference#Nonexistent",
            "Nonexistent",
            serde_json::json!({}),
            Box::new(BlankNodeGenerator),
        );
        let err = compile_registry(&facts, vec![spec], "Default", Box::new(BlankNodeGenerator)).unwrap_err();
        assert!(matches!(err, SchemaError::UndeclaredClassNameError(_)));
    }
}
