//! A compiled model (C6): one class's ancestry, attribute table, and the
//! IRI generator new resources of this type are minted with.
//!
//! Compilation itself (joining schema-graph facts with context terms into
//! `Model`s) is [`crate::registry`]'s job; this module is the compiled
//! artifact and its ordinal attribute lookup.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value as JsonValue;

use crate::attribute::Attribute;
use crate::error::{SchemaError, SchemaResult};
use crate::iri_gen::IriGenerator;

/// Attribute names a JSON-LD context must never bind, since they name
/// fields [`crate::resource::Resource`] exposes natively.
pub const RESERVED_ATTRIBUTE_NAMES: [&str; 4] = ["id", "types", "_attributes", "objects"];

/// A compiled class: its IRI, short name, ancestry, and attribute table.
#[derive(Debug)]
pub struct Model {
    class_iri: String,
    name: String,
    /// Transitive `rdfs:subClassOf` ancestors, not including `class_iri` itself.
    ancestor_iris: BTreeSet<String>,
    attributes: Vec<Attribute>,
    attribute_index: HashMap<String, usize>,
    iri_generator: Box<dyn IriGenerator>,
    /// The JSON-LD context document this model's attributes were compiled
    /// from, reused verbatim when serializing instances to JSON-LD.
    context: JsonValue,
}

impl Model {
    /// Assembles a model from its already-resolved parts, checking reserved
    /// names and required-attribute invariants. `ancestor_iris` must already
    /// be the transitive closure.
    pub fn new(
        class_iri: impl Into<String>,
        name: impl Into<String>,
        ancestor_iris: BTreeSet<String>,
        attributes: Vec<Attribute>,
        iri_generator: Box<dyn IriGenerator>,
        context: JsonValue,
    ) -> SchemaResult<Self> {
        let class_iri = class_iri.into();
        let name = name.into();

        let mut attribute_index = HashMap::with_capacity(attributes.len());
        for (ordinal, attr) in attributes.iter().enumerate() {
            if RESERVED_ATTRIBUTE_NAMES.contains(&attr.name()) {
                return Err(SchemaError::ReservedAttributeNameError(
                    attr.name().to_string(),
                ));
            }
            if attribute_index.insert(attr.name().to_string(), ordinal).is_some() {
                return Err(SchemaError::PropertyDefError(format!(
                    "model {class_iri} has two attributes named {}",
                    attr.name()
                )));
            }
        }

        Ok(Model {
            class_iri,
            name,
            ancestor_iris,
            attributes,
            attribute_index,
            iri_generator,
            context,
        })
    }

    pub fn class_iri(&self) -> &str {
        &self.class_iri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ancestor_iris(&self) -> &BTreeSet<String> {
        &self.ancestor_iris
    }

    /// True iff `class_iri` is this model's class or one of its ancestors,
    /// i.e. every resource of this model also satisfies that class.
    pub fn is_or_descends_from(&self, class_iri: &str) -> bool {
        self.class_iri == class_iri || self.ancestor_iris.contains(class_iri)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute_by_ordinal(&self, ordinal: usize) -> Option<&Attribute> {
        self.attributes.get(ordinal)
    }

    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.attribute_index.get(name).copied()
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&Attribute> {
        self.ordinal_of(name).and_then(|i| self.attributes.get(i))
    }

    pub fn iri_generator(&self) -> &dyn IriGenerator {
        self.iri_generator.as_ref()
    }

    pub fn context(&self) -> &JsonValue {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeMetadata, ScalarAttribute};
    use crate::iri_gen::BlankNodeGenerator;
    use crate::property::PropertyFacts;
    use crate::value::StringFormat;

    fn name_attribute() -> Attribute {
        Attribute::Scalar(ScalarAttribute::new(
            AttributeMetadata {
                name: "name".to_string(),
                jsonld_type: Some(crate::value::XSD_STRING.to_string()),
                language: None,
                container: None,
                reversed: false,
            },
            PropertyFacts {
                iri: "http://ex.org/name".to_string(),
                is_required: true,
                read_only: false,
                write_only: false,
            },
            Box::new(StringFormat),
        ))
    }

    #[test]
    fn reserved_attribute_name_is_rejected() {
        let reserved = Attribute::Scalar(ScalarAttribute::new(
            AttributeMetadata {
                name: "id".to_string(),
                jsonld_type: Some(crate::value::XSD_STRING.to_string()),
                language: None,
                container: None,
                reversed: false,
            },
            PropertyFacts {
                iri: "http://ex.org/id".to_string(),
                is_required: false,
                read_only: false,
                write_only: false,
            },
            Box::new(StringFormat),
        ));
        let err = Model::new(
            "http://ex.org/Person",
            "Person",
            BTreeSet::new(),
            vec![reserved],
            Box::new(BlankNodeGenerator),
            serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedAttributeNameError(_)));
    }

    #[test]
    fn attribute_lookup_by_name_and_ordinal_agree() {
        let model = Model::new(
            "http://ex.org/Person",
            "Person",
            BTreeSet::new(),
            vec![name_attribute()],
            Box::new(BlankNodeGenerator),
            serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(model.ordinal_of("name"), Some(0));
        assert_eq!(model.attribute_by_name("name").unwrap().name(), "name");
        assert_eq!(model.attribute_by_ordinal(0).unwrap().name(), "name");
    }

    #[test]
    fn is_or_descends_from_checks_ancestry() {
        let mut ancestors = BTreeSet::new();
        ancestors.insert("http://ex.org/Agent".to_string());
        let model = Model::new(
            "http://ex.org/Person",
            "Person",
            ancestors,
            vec![],
            Box::new(BlankNodeGenerator),
            serde_json::json!({}),
        )
        .unwrap();
        assert!(model.is_or_descends_from("http://ex.org/Agent"));
        assert!(model.is_or_descends_from("http://ex.org/Person"));
        assert!(!model.is_or_descends_from("http://ex.org/Other"));
    }
}
