//! Model registry (C7): tracks every compiled [`Model`], finds the most
//! specific model(s) for an arbitrary set of `rdf:type`s, and resolves a
//! resource's IRI from its document base.
//!
//! Grounded directly on the reference registry's leaf-model algorithm: a
//! model is a "leaf" for a given type set if none of its already-registered
//! descendants also appear in that type set. The result is cached on the
//! type set (and again on the exact set of IRIs it resolves to, since a
//! caller's type set need not be exhaustive).

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use tracing::warn;

use crate::error::{AccessError, AccessResult, SchemaError, SchemaResult};
use crate::model::Model;

/// Seam for resolving a document base IRI to the resource IRIs it describes,
/// without coupling the registry to a concrete store.
pub trait BaseIriLookup {
    fn resource_iris_with_base(&self, base_iri: &str) -> AccessResult<BTreeSet<String>>;
}

type CacheEntry = (Vec<Rc<Model>>, Vec<String>);

pub struct ModelRegistry {
    default_model_name: String,
    model_classes: HashMap<String, Rc<Model>>,
    model_names: HashMap<String, Rc<Model>>,
    /// For each registered class IRI, the already-registered classes that
    /// descend from it (i.e. declare it among their ancestors).
    model_descendants: HashMap<String, BTreeSet<String>>,
    type_set_cache: HashMap<BTreeSet<String>, CacheEntry>,
}

impl ModelRegistry {
    pub fn new(default_model_name: impl Into<String>) -> Self {
        ModelRegistry {
            default_model_name: default_model_name.into(),
            model_classes: HashMap::new(),
            model_names: HashMap::new(),
            model_descendants: HashMap::new(),
            type_set_cache: HashMap::new(),
        }
    }

    pub fn register(&mut self, model: Model, short_name: impl Into<String>) -> SchemaResult<()> {
        let class_iri = model.class_iri().to_string();
        let short_name = short_name.into();

        if self.model_classes.contains_key(&class_iri) {
            return Err(SchemaError::AlreadyAllocatedModel(class_iri));
        }
        if self.model_names.contains_key(&short_name) {
            return Err(SchemaError::AlreadyAllocatedModel(short_name));
        }

        let mut sub_model_iris = BTreeSet::new();
        for existing in self.model_classes.values() {
            if existing.ancestor_iris().contains(&class_iri) {
                sub_model_iris.insert(existing.class_iri().to_string());
            }
        }

        let model = Rc::new(model);
        self.model_descendants.insert(class_iri.clone(), sub_model_iris);
        self.model_classes.insert(class_iri, model.clone());
        self.model_names.insert(short_name, model);
        self.type_set_cache.clear();
        Ok(())
    }

    /// Drops a registered model. No-op if `class_iri` was never registered.
    pub fn unregister(&mut self, class_iri: &str) {
        if let Some(model) = self.model_classes.remove(class_iri) {
            self.model_descendants.remove(class_iri);
            self.model_names.retain(|_, m| !Rc::ptr_eq(m, &model));
            self.type_set_cache.clear();
        }
    }

    pub fn get_model(&self, class_iri: &str) -> Option<Rc<Model>> {
        self.model_classes.get(class_iri).cloned()
    }

    pub fn get_model_by_name(&self, name: &str) -> Option<Rc<Model>> {
        self.model_names.get(name).cloned()
    }

    fn find_leaf_models(&self, type_set: &BTreeSet<String>) -> Vec<Rc<Model>> {
        let mut leaf_models = Vec::new();
        for type_iri in type_set {
            let Some(descendants) = self.model_descendants.get(type_iri) else {
                continue;
            };
            if descendants.is_disjoint(type_set) {
                if let Some(model) = self.model_classes.get(type_iri) {
                    leaf_models.push(model.clone());
                }
            }
        }
        if leaf_models.is_empty() {
            if let Some(default) = self.model_names.get(&self.default_model_name) {
                return vec![default.clone()];
            }
        }
        leaf_models
    }

    /// Finds the most specific model(s) describing a set of `rdf:type` IRIs,
    /// plus the full type list those models plus any unmodelled types imply.
    /// An empty `type_set` resolves to the default model.
    pub fn find_models_and_types(
        &mut self,
        type_set: &BTreeSet<String>,
    ) -> AccessResult<(Vec<Rc<Model>>, Vec<String>)> {
        if type_set.is_empty() {
            let default = self.model_names.get(&self.default_model_name).cloned().ok_or_else(|| {
                AccessError::ObjectNotFoundError(format!(
                    "no model registered under default name {}",
                    self.default_model_name
                ))
            })?;
            return Ok((vec![default], Vec::new()));
        }

        if let Some(cached) = self.type_set_cache.get(type_set) {
            return Ok(cached.clone());
        }

        let leaf_models = self.find_leaf_models(type_set);
        let leaf_model_iris: BTreeSet<String> =
            leaf_models.iter().map(|m| m.class_iri().to_string()).collect();

        let mut ancestry_class_iris: BTreeSet<String> = leaf_models
            .iter()
            .flat_map(|m| m.ancestor_iris().iter().cloned())
            .collect();
        for iri in &leaf_model_iris {
            ancestry_class_iris.remove(iri);
        }

        let independent_class_iris: BTreeSet<String> = type_set
            .difference(&leaf_model_iris)
            .cloned()
            .collect::<BTreeSet<_>>()
            .difference(&ancestry_class_iris)
            .cloned()
            .collect();

        let mut types: Vec<String> = leaf_model_iris.iter().cloned().collect();
        types.extend(independent_class_iris.iter().cloned());
        types.extend(ancestry_class_iris.iter().cloned());

        let pair: CacheEntry = (leaf_models, types.clone());
        self.type_set_cache.insert(type_set.clone(), pair.clone());
        let types_set: BTreeSet<String> = types.into_iter().collect();
        self.type_set_cache.insert(types_set, pair.clone());

        Ok(pair)
    }
}

/// Resolves all resource IRIs documented under `base_iri` (same IRI, or an
/// IRI with `base_iri` followed by `#`). `base_iri` must not itself contain
/// a fragment.
pub fn find_resource_iris(
    lookup: &dyn BaseIriLookup,
    base_iri: &str,
) -> AccessResult<BTreeSet<String>> {
    if base_iri.contains('#') {
        return Err(AccessError::HashIriError(base_iri.to_string()));
    }
    lookup.resource_iris_with_base(base_iri)
}

/// As [`find_resource_iris`], but expects exactly one resource and returns
/// its IRI. When several resources share a base (a multi-subject document),
/// prefers the resource whose IRI equals the base itself; otherwise picks
/// the lexicographically first and warns, since the choice is arbitrary.
pub fn find_resource_from_base_uri(
    lookup: &dyn BaseIriLookup,
    base_iri: &str,
) -> AccessResult<String> {
    let iris = find_resource_iris(lookup, base_iri)?;
    if iris.is_empty() {
        return Err(AccessError::ObjectNotFoundError(format!(
            "no object with base uri {base_iri}"
        )));
    }
    if iris.len() > 1 {
        if iris.contains(base_iri) {
            return Ok(base_iri.to_string());
        }
        warn!(base_iri, count = iris.len(), "multiple objects share this base uri; picking arbitrarily");
    }
    Ok(iris.into_iter().next().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iri_gen::BlankNodeGenerator;

    fn model(class_iri: &str, name: &str, ancestors: &[&str]) -> Model {
        Model::new(
            class_iri,
            name,
            ancestors.iter().map(|s| s.to_string()).collect(),
            vec![],
            Box::new(BlankNodeGenerator),
            serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn empty_type_set_resolves_to_default_model() {
        let mut reg = ModelRegistry::new("Thing");
        reg.register(model("http://ex.org/Thing", "Thing", &[]), "Thing")
            .unwrap();
        let (models, types) = reg.find_models_and_types(&BTreeSet::new()).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].class_iri(), "http://ex.org/Thing");
        assert!(types.is_empty());
    }

    #[test]
    fn most_specific_registered_model_is_picked_as_leaf() {
        let mut reg = ModelRegistry::new("Thing");
        reg.register(model("http://ex.org/Thing", "Thing", &[]), "Thing")
            .unwrap();
        reg.register(
            model("http://ex.org/Person", "Person", &["http://ex.org/Thing"]),
            "Person",
        )
        .unwrap();

        let mut types = BTreeSet::new();
        types.insert("http://ex.org/Thing".to_string());
        types.insert("http://ex.org/Person".to_string());

        let (models, resolved_types) = reg.find_models_and_types(&types).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].class_iri(), "http://ex.org/Person");
        assert!(resolved_types.contains(&"http://ex.org/Thing".to_string()));
    }

    #[test]
    fn unmodelled_type_is_reported_independently() {
        let mut reg = ModelRegistry::new("Thing");
        reg.register(model("http://ex.org/Thing", "Thing", &[]), "Thing")
            .unwrap();

        let mut types = BTreeSet::new();
        types.insert("http://ex.org/Thing".to_string());
        types.insert("http://ex.org/Unmodelled".to_string());

        let (models, resolved_types) = reg.find_models_and_types(&types).unwrap();
        assert_eq!(models.len(), 1);
        assert!(resolved_types.contains(&"http://ex.org/Unmodelled".to_string()));
    }

    #[test]
    fn registering_duplicate_class_iri_is_rejected() {
        let mut reg = ModelRegistry::new("Thing");
        reg.register(model("http://ex.org/Thing", "Thing", &[]), "Thing")
            .unwrap();
        let err = reg
            .register(model("http://ex.org/Thing", "Other", &[]), "Other")
            .unwrap_err();
        assert!(matches!(err, SchemaError::AlreadyAllocatedModel(_)));
    }

    struct FakeLookup(BTreeSet<String>);
    impl BaseIriLookup for FakeLookup {
        fn resource_iris_with_base(&self, _base_iri: &str) -> AccessResult<BTreeSet<String>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn find_resource_iris_rejects_hash_iri() {
        let lookup = FakeLookup(BTreeSet::new());
        let err = find_resource_iris(&lookup, "http://ex.org/doc#frag").unwrap_err();
        assert!(matches!(err, AccessError::HashIriError(_)));
    }

    #[test]
    fn find_resource_from_base_uri_errors_when_empty() {
        let lookup = FakeLookup(BTreeSet::new());
        assert!(find_resource_from_base_uri(&lookup, "http://ex.org/doc").is_err());
    }

    #[test]
    fn find_resource_from_base_uri_prefers_exact_base_match() {
        let mut iris = BTreeSet::new();
        iris.insert("http://ex.org/doc".to_string());
        iris.insert("http://ex.org/doc/other".to_string());
        let lookup = FakeLookup(iris);
        let resolved = find_resource_from_base_uri(&lookup, "http://ex.org/doc").unwrap();
        assert_eq!(resolved, "http://ex.org/doc");
    }
}
