//! Typed, named attributes (C5): the binding of a [`crate::property::Property`]
//! to a JSON-LD context term.
//!
//! Per-resource state (current/former value) is **not** stored here. Design
//! note: instead of a weak-reference-keyed side table per attribute, each
//! [`crate::resource::Resource`] carries its own `Vec<AttributeSlot>`
//! indexed by the attribute's ordinal position in its model — the
//! `Attribute` objects are immutable, shared schema metadata plus behaviour.

use tracing::warn;

use crate::error::{EditError, EditResult};
use crate::property::PropertyFacts;
use crate::value::{ScalarValue, Value, ValueFormat};

/// JSON-LD `@container` keyword declared for a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Set,
    List,
    /// Recognised but not implemented as a storage kind (see design notes).
    Language,
    /// Recognised but not implemented as a storage kind (see design notes).
    Index,
}

#[derive(Debug, Clone)]
pub struct AttributeMetadata {
    pub name: String,
    pub jsonld_type: Option<String>,
    pub language: Option<String>,
    pub container: Option<Container>,
    pub reversed: bool,
}

/// Per-resource storage for one attribute: current value plus, between a
/// mutation and the next successful commit, the value it replaced.
#[derive(Debug, Clone, Default)]
pub struct AttributeSlot {
    current: Option<Value>,
    /// `None` = no pending change this commit cycle. `Some(None)` = the
    /// value changed away from "absent". `Some(Some(v))` = it changed away
    /// from `v`. The outer `Option` is what lets "former value was absent"
    /// be distinguished from "nothing recorded yet".
    former: Option<Option<Value>>,
}

impl AttributeSlot {
    /// Builds a slot already holding `current`, with no pending former
    /// value. Used when a resource's model list is rebuilt (a type change)
    /// and a surviving attribute's value is carried across by name.
    pub fn seeded(current: Option<Value>) -> Self {
        AttributeSlot {
            current,
            former: None,
        }
    }

    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Value> {
        self.current.as_mut()
    }

    pub fn has_changed(&self) -> bool {
        self.former.is_some()
    }

    /// Pops the former value, to be called once it has been written to the
    /// store. Leaves the slot with no pending former value.
    pub fn pop_former_value(&mut self) -> Option<Value> {
        self.former.take().flatten()
    }

    /// Clears the former-value slot without returning it, once the store
    /// has acknowledged the current value.
    pub fn receive_storage_ack(&mut self) {
        self.former = None;
    }
}

#[derive(Debug)]
struct AttributeCore {
    metadata: AttributeMetadata,
    property: PropertyFacts,
    value_format: Box<dyn ValueFormat>,
}

impl AttributeCore {
    fn new(metadata: AttributeMetadata, property: PropertyFacts, value_format: Box<dyn ValueFormat>) -> Self {
        if matches!(
            metadata.container,
            Some(Container::Language) | Some(Container::Index)
        ) {
            warn!(
                attribute = %metadata.name,
                "@language/@index containers are not implemented as storage kinds; treating as scalar"
            );
        }
        AttributeCore {
            metadata,
            property,
            value_format,
        }
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn is_required(&self) -> bool {
        self.property.is_required
    }

    fn is_read_only(&self) -> bool {
        self.property.read_only
    }

    fn is_write_only(&self) -> bool {
        self.property.write_only
    }

    fn container(&self) -> Option<Container> {
        self.metadata.container
    }

    fn property_iri(&self) -> &str {
        &self.property.iri
    }

    /// Normalizes an empty container to `None`, per spec: empty `@set`/`@list` == absent.
    fn normalize(&self, value: Option<Value>) -> Option<Value> {
        match value {
            Some(Value::Set(items)) if items.is_empty() => None,
            Some(Value::List(items)) if items.is_empty() => None,
            other => other,
        }
    }

    fn check_shape(&self, value: &Value) -> EditResult<()> {
        let declared_list_or_set = matches!(self.container(), Some(Container::List) | Some(Container::Set));
        match (self.container(), value) {
            (Some(Container::Set), Value::Set(_)) => Ok(()),
            (Some(Container::List), Value::List(_)) => Ok(()),
            (None, Value::Scalar(_)) => Ok(()),
            // @language/@index are treated as scalar storage (unimplemented containers).
            (Some(Container::Language) | Some(Container::Index), Value::Scalar(_)) => Ok(()),
            (None, Value::List(_)) if !declared_list_or_set => Err(EditError::AttributeTypeError {
                name: self.name().to_string(),
                expected: "scalar (no @container: @list declared in context)".to_string(),
                found: "list".to_string(),
            }),
            _ => Err(EditError::AttributeTypeError {
                name: self.name().to_string(),
                expected: format!("{:?}", self.container()),
                found: format!("{value:?}"),
            }),
        }
    }

    fn check_value(&self, value: &Value) -> EditResult<()> {
        self.check_shape(value)?;
        match value {
            Value::Scalar(v) => self.value_format.check(v),
            Value::Set(items) => {
                let mut seen = Vec::with_capacity(items.len());
                for v in items {
                    self.value_format.check(v)?;
                    if seen.contains(v) {
                        return Err(EditError::UniquenessError(format!(
                            "duplicate value in @set attribute {}",
                            self.name()
                        )));
                    }
                    seen.push(v.clone());
                }
                Ok(())
            }
            Value::List(items) => {
                for v in items {
                    self.value_format.check(v)?;
                }
                Ok(())
            }
        }
    }

    fn set(&self, slot: &mut AttributeSlot, value: Option<Value>, is_end_user: bool) -> EditResult<()> {
        if is_end_user && self.is_read_only() {
            return Err(EditError::ReadOnlyAttributeError(self.name().to_string()));
        }
        let value = self.normalize(value);
        if let Some(v) = &value {
            self.check_value(v)?;
        }
        let value = value.map(|v| self.normalize_scalars(v));

        if slot.former.is_none() && slot.current != value {
            slot.former = Some(slot.current.clone());
        }
        slot.current = value;
        Ok(())
    }

    /// Coerces every scalar in `value` into its format's canonical shape,
    /// so a value set by an end user and the same value loaded back from
    /// the store compare equal (see [`ValueFormat::normalize`]).
    fn normalize_scalars(&self, value: Value) -> Value {
        match value {
            Value::Scalar(v) => Value::Scalar(self.value_format.normalize(v)),
            Value::Set(items) => {
                Value::Set(items.into_iter().map(|v| self.value_format.normalize(v)).collect())
            }
            Value::List(items) => {
                Value::List(items.into_iter().map(|v| self.value_format.normalize(v)).collect())
            }
        }
    }

    fn is_locally_satisfied(&self, slot: &AttributeSlot) -> bool {
        if !self.is_required() {
            return true;
        }
        slot.current.is_some()
    }

    fn jsonld_type(&self) -> Option<&str> {
        self.value_format.jsonld_type()
    }

    fn language(&self) -> Option<&str> {
        self.value_format.language()
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        self.value_format.to_lexical(value)
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        self.value_format.from_lexical(lexical)
    }
}

#[derive(Debug)]
pub struct ScalarAttribute(AttributeCore);

impl ScalarAttribute {
    pub fn new(metadata: AttributeMetadata, property: PropertyFacts, value_format: Box<dyn ValueFormat>) -> Self {
        ScalarAttribute(AttributeCore::new(metadata, property, value_format))
    }
}

#[derive(Debug)]
pub struct ObjectAttribute(AttributeCore);

impl ObjectAttribute {
    pub fn new(metadata: AttributeMetadata, property: PropertyFacts, value_format: Box<dyn ValueFormat>) -> Self {
        ObjectAttribute(AttributeCore::new(metadata, property, value_format))
    }

    /// IRIs referenced by the current value, for session reference-tracking
    /// and cache invalidation.
    pub fn referenced_iris(slot: &AttributeSlot) -> Vec<String> {
        match slot.current() {
            Some(Value::Scalar(ScalarValue::IriRef(iri))) => vec![iri.clone()],
            Some(Value::Set(items)) | Some(Value::List(items)) => {
                items.iter().filter_map(ScalarValue::as_iri).map(String::from).collect()
            }
            _ => Vec::new(),
        }
    }

    /// IRIs referenced by the value this attribute held before its pending
    /// change, if any. A retargeted object-attribute's old target needs
    /// invalidating just as much as its new one does.
    pub fn former_referenced_iris(slot: &AttributeSlot) -> Vec<String> {
        match &slot.former {
            Some(Some(Value::Scalar(ScalarValue::IriRef(iri)))) => vec![iri.clone()],
            Some(Some(Value::Set(items))) | Some(Some(Value::List(items))) => {
                items.iter().filter_map(ScalarValue::as_iri).map(String::from).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// An attribute, either scalar-valued or object-valued (`@id`-typed).
#[derive(Debug)]
pub enum Attribute {
    Scalar(ScalarAttribute),
    Object(ObjectAttribute),
}

impl Attribute {
    fn core(&self) -> &AttributeCore {
        match self {
            Attribute::Scalar(a) => &a.0,
            Attribute::Object(a) => &a.0,
        }
    }

    pub fn name(&self) -> &str {
        self.core().name()
    }

    pub fn is_required(&self) -> bool {
        self.core().is_required()
    }

    pub fn is_read_only(&self) -> bool {
        self.core().is_read_only()
    }

    pub fn is_write_only(&self) -> bool {
        self.core().is_write_only()
    }

    pub fn container(&self) -> Option<Container> {
        self.core().container()
    }

    pub fn property_iri(&self) -> &str {
        self.core().property_iri()
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Attribute::Object(_))
    }

    pub fn check_value(&self, value: &Value) -> EditResult<()> {
        self.core().check_value(value)
    }

    pub fn set(&self, slot: &mut AttributeSlot, value: Option<Value>, is_end_user: bool) -> EditResult<()> {
        self.core().set(slot, value, is_end_user)
    }

    pub fn get<'a>(&self, slot: &'a AttributeSlot) -> Option<&'a Value> {
        slot.current()
    }

    pub fn is_locally_satisfied(&self, slot: &AttributeSlot) -> bool {
        self.core().is_locally_satisfied(slot)
    }

    /// JSON-LD type IRI this attribute's values are encoded with, or `None`
    /// for an `@id` (object) attribute.
    pub fn jsonld_type(&self) -> Option<&str> {
        self.core().jsonld_type()
    }

    pub fn language(&self) -> Option<&str> {
        self.core().language()
    }

    pub fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        self.core().to_lexical(value)
    }

    /// Decodes a lexical RDF object (a plain literal's text, or an IRI for
    /// an `@id` attribute) back into a [`ScalarValue`] of this attribute's
    /// declared type.
    pub fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        self.core().from_lexical(lexical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StringFormat;

    fn facts(required: bool) -> PropertyFacts {
        PropertyFacts {
            iri: "http://ex.org/name".to_string(),
            is_required: required,
            read_only: false,
            write_only: false,
        }
    }

    fn scalar_attr(name: &str, required: bool, container: Option<Container>) -> Attribute {
        Attribute::Scalar(ScalarAttribute::new(
            AttributeMetadata {
                name: name.to_string(),
                jsonld_type: Some(crate::value::XSD_STRING.to_string()),
                language: None,
                container,
                reversed: false,
            },
            facts(required),
            Box::new(StringFormat),
        ))
    }

    #[test]
    fn empty_set_normalizes_to_none() {
        let attr = scalar_attr("tags", false, Some(Container::Set));
        let mut slot = AttributeSlot::default();
        attr.set(&mut slot, Some(Value::Set(vec![])), true).unwrap();
        assert!(slot.current().is_none());
    }

    #[test]
    fn undeclared_list_is_rejected() {
        let attr = scalar_attr("name", false, None);
        let mut slot = AttributeSlot::default();
        let err = attr
            .set(
                &mut slot,
                Some(Value::List(vec![ScalarValue::String("a".into())])),
                true,
            )
            .unwrap_err();
        assert!(matches!(err, EditError::AttributeTypeError { .. }));
    }

    #[test]
    fn duplicate_set_members_are_rejected() {
        let attr = scalar_attr("mboxes", false, Some(Container::Set));
        let mut slot = AttributeSlot::default();
        let dup = Value::Set(vec![
            ScalarValue::String("a@x".into()),
            ScalarValue::String("a@x".into()),
        ]);
        assert!(attr.set(&mut slot, Some(dup), true).is_err());
    }

    #[test]
    fn read_only_rejects_end_user_write() {
        let attr = Attribute::Scalar(ScalarAttribute::new(
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
                read_only: true,
                write_only: false,
            },
            Box::new(StringFormat),
        ));
        let mut slot = AttributeSlot::default();
        let err = attr
            .set(&mut slot, Some(Value::Scalar(ScalarValue::String("x".into()))), true)
            .unwrap_err();
        assert!(matches!(err, EditError::ReadOnlyAttributeError(_)));
    }

    #[test]
    fn first_mutation_snapshots_former_value() {
        let attr = scalar_attr("name", false, None);
        let mut slot = AttributeSlot::default();
        attr.set(&mut slot, Some(Value::Scalar(ScalarValue::String("Alice".into()))), true)
            .unwrap();
        assert!(slot.has_changed());
        assert_eq!(slot.pop_former_value(), None);
        assert!(!slot.has_changed());

        attr.set(&mut slot, Some(Value::Scalar(ScalarValue::String("Bob".into()))), true)
            .unwrap();
        attr.set(&mut slot, Some(Value::Scalar(ScalarValue::String("Carl".into()))), true)
            .unwrap();
        assert_eq!(
            slot.pop_former_value(),
            Some(Value::Scalar(ScalarValue::String("Alice".into())))
        );
    }

    #[test]
    fn required_attribute_unsatisfied_when_absent() {
        let attr = scalar_attr("mbox", true, None);
        let slot = AttributeSlot::default();
        assert!(!attr.is_locally_satisfied(&slot));
    }

    #[test]
    fn lang_string_attribute_normalizes_plain_string_on_set() {
        let attr = Attribute::Scalar(ScalarAttribute::new(
            AttributeMetadata {
                name: "shortBio".to_string(),
                jsonld_type: Some(crate::value::RDF_LANG_STRING.to_string()),
                language: Some("en".to_string()),
                container: None,
                reversed: false,
            },
            facts(false),
            Box::new(crate::value::LangStringFormat { lang: "en".to_string() }),
        ));
        let mut slot = AttributeSlot::default();
        attr.set(&mut slot, Some(Value::Scalar(ScalarValue::String("hi".into()))), true)
            .unwrap();
        assert_eq!(
            attr.get(&slot),
            Some(&Value::Scalar(ScalarValue::LangString {
                text: "hi".to_string(),
                lang: "en".to_string(),
            }))
        );
    }

    #[test]
    fn object_attribute_former_referenced_iris_tracks_retargeting() {
        let attr = Attribute::Object(ObjectAttribute::new(
            AttributeMetadata {
                name: "friend".to_string(),
                jsonld_type: Some(crate::value::JSONLD_ID.to_string()),
                language: None,
                container: None,
                reversed: false,
            },
            facts(false),
            Box::new(crate::value::IriRefFormat),
        ));
        let mut slot = AttributeSlot::default();
        attr.set(
            &mut slot,
            Some(Value::Scalar(ScalarValue::IriRef("http://ex.org/a".to_string()))),
            true,
        )
        .unwrap();
        slot.receive_storage_ack();
        attr.set(
            &mut slot,
            Some(Value::Scalar(ScalarValue::IriRef("http://ex.org/b".to_string()))),
            true,
        )
        .unwrap();

        assert_eq!(ObjectAttribute::referenced_iris(&slot), vec!["http://ex.org/b".to_string()]);
        assert_eq!(
            ObjectAttribute::former_referenced_iris(&slot),
            vec!["http://ex.org/a".to_string()]
        );
    }
}
