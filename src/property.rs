//! Schema-level support of an RDF property by a class (C4).
//!
//! A [`Property`] gathers the JSON-LD context terms that will become its
//! [`crate::attribute::Attribute`] objects. It accumulates metadata during
//! schema compilation, then freezes the moment [`Property::generate_attributes`]
//! is called — mirroring the "declare now, generate once" two-phase
//! construction of the system this crate descends from.

use std::collections::BTreeSet;

use tracing::warn;

use crate::attribute::{Attribute, AttributeMetadata, Container, ObjectAttribute, ScalarAttribute};
use crate::error::{SchemaError, SchemaResult};
use crate::value::{select_value_format, JSONLD_ID, XSD_STRING};

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Datatype,
    Object,
}

/// Facts about a property that an [`Attribute`] needs at runtime, copied
/// out of the (now-frozen) [`Property`] rather than held as a back-reference.
#[derive(Debug, Clone)]
pub struct PropertyFacts {
    pub iri: String,
    pub is_required: bool,
    pub read_only: bool,
    pub write_only: bool,
}

#[derive(Debug, Clone)]
pub struct Property {
    iri: String,
    supporter_class_iri: String,
    is_required: bool,
    read_only: bool,
    write_only: bool,
    reversed: bool,
    property_type: Option<PropertyType>,
    ranges: BTreeSet<String>,
    domains: BTreeSet<String>,
    link_class_iri: Option<String>,
    pending_metadata: Vec<AttributeMetadata>,
    frozen: bool,
}

impl Property {
    pub fn new(iri: impl Into<String>, supporter_class_iri: impl Into<String>) -> SchemaResult<Self> {
        Ok(Property {
            iri: iri.into(),
            supporter_class_iri: supporter_class_iri.into(),
            is_required: false,
            read_only: false,
            write_only: false,
            reversed: false,
            property_type: None,
            ranges: BTreeSet::new(),
            domains: BTreeSet::new(),
            link_class_iri: None,
            pending_metadata: Vec::new(),
            frozen: false,
        })
    }

    pub fn iri(&self) -> &str {
        &self.iri
    }

    pub fn supporter_class_iri(&self) -> &str {
        &self.supporter_class_iri
    }

    pub fn property_type(&self) -> Option<PropertyType> {
        self.property_type
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }

    pub fn declare_required(&mut self) {
        self.is_required = true;
    }

    pub fn set_access(&mut self, read_only: bool, write_only: bool) -> SchemaResult<()> {
        if read_only && write_only {
            return Err(SchemaError::PropertyDefError(self.iri.clone()));
        }
        self.read_only = read_only;
        self.write_only = write_only;
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_write_only(&self) -> bool {
        self.write_only
    }

    pub fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }

    pub fn reversed(&self) -> bool {
        self.reversed
    }

    pub fn link_class_iri(&self) -> Option<&str> {
        self.link_class_iri.as_deref()
    }

    pub fn set_link_class_iri(&mut self, iri: impl Into<String>) {
        self.link_class_iri = Some(iri.into());
    }

    pub fn ranges(&self) -> &BTreeSet<String> {
        &self.ranges
    }

    pub fn domains(&self) -> &BTreeSet<String> {
        &self.domains
    }

    fn set_type(&mut self, new_type: PropertyType) -> SchemaResult<()> {
        match self.property_type {
            None => {
                self.property_type = Some(new_type);
                Ok(())
            }
            Some(existing) if existing == new_type => Ok(()),
            Some(existing) => Err(SchemaError::PropertyDefTypeError {
                iri: self.iri.clone(),
                declared: format!("{existing:?}"),
                requested: format!("{new_type:?}"),
            }),
        }
    }

    pub fn add_range(&mut self, range_iri: impl Into<String>) -> SchemaResult<()> {
        let range_iri = range_iri.into();
        if range_iri.starts_with(XSD_NS) {
            self.set_type(PropertyType::Datatype)?;
        }
        if self.property_type == Some(PropertyType::Datatype)
            && !self.ranges.contains(&range_iri)
            && !self.ranges.is_empty()
        {
            return Err(SchemaError::AlreadyDeclaredDatatypeError {
                name: self.iri.clone(),
                found: range_iri,
                expected: self.ranges.iter().next().cloned().unwrap_or_default(),
            });
        }
        self.ranges.insert(range_iri);
        Ok(())
    }

    pub fn add_domain(&mut self, domain_iri: impl Into<String>) -> SchemaResult<()> {
        let domain_iri = domain_iri.into();
        if domain_iri.starts_with(XSD_NS) {
            return Err(SchemaError::PropertyDefError(format!(
                "domain of {} cannot be a literal datatype ({domain_iri})",
                self.iri
            )));
        }
        self.domains.insert(domain_iri);
        Ok(())
    }

    /// The datatype this property defaults to when a term declares none,
    /// i.e. the sole member of `ranges` for a datatype property.
    pub fn default_datatype(&self) -> Option<&str> {
        if self.property_type == Some(PropertyType::Datatype) {
            self.ranges.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Registers metadata for a future attribute. May be called many times
    /// before [`Property::generate_attributes`], never after.
    pub fn add_attribute_metadata(
        &mut self,
        name: impl Into<String>,
        jsonld_type: Option<String>,
        language: Option<String>,
        container: Option<Container>,
        reversed: bool,
    ) -> SchemaResult<()> {
        if self.frozen {
            return Err(SchemaError::AlreadyGeneratedAttributeError(
                self.iri.clone(),
            ));
        }
        let name = name.into();

        if reversed {
            return Err(SchemaError::ReversedPropertyUnsupported(name));
        }
        if self.reversed != reversed {
            return Err(SchemaError::PropertyDefError(format!(
                "{} and attribute {name} disagree on reversed",
                self.iri
            )));
        }

        let jsonld_type = match jsonld_type {
            Some(t) if t == JSONLD_ID => {
                self.set_type(PropertyType::Object)?;
                Some(t)
            }
            Some(t) => {
                self.set_type(PropertyType::Datatype)?;
                if !self.ranges.contains(&t) && !self.ranges.is_empty() {
                    return Err(SchemaError::AlreadyDeclaredDatatypeError {
                        name: name.clone(),
                        found: t,
                        expected: self.ranges.iter().next().cloned().unwrap_or_default(),
                    });
                }
                Some(t)
            }
            None => {
                if language.is_none() {
                    warn!(property = %self.iri, attribute = %name, "no datatype declared in JSON-LD context");
                }
                match self.property_type {
                    Some(PropertyType::Object) => Some(JSONLD_ID.to_string()),
                    Some(PropertyType::Datatype) => {
                        self.default_datatype().map(|s| s.to_string())
                    }
                    None if language.is_none() => {
                        warn!(property = %self.iri, attribute = %name, "untyped attribute with no range; presuming object property");
                        Some(JSONLD_ID.to_string())
                    }
                    None => None,
                }
            }
        };

        if self
            .pending_metadata
            .iter()
            .any(|md| md.name == name)
        {
            return Err(SchemaError::PropertyDefError(format!(
                "multiple attributes named {name} on property {}",
                self.iri
            )));
        }

        self.pending_metadata.push(AttributeMetadata {
            name,
            jsonld_type,
            language,
            container,
            reversed,
        });
        Ok(())
    }

    /// Consumes the pending metadata and produces the [`Attribute`] objects
    /// it describes. Idempotent guard: calling this twice is a schema error.
    pub fn generate_attributes(&mut self) -> SchemaResult<Vec<Attribute>> {
        if self.frozen {
            return Err(SchemaError::AlreadyGeneratedAttributeError(
                self.iri.clone(),
            ));
        }
        self.frozen = true;

        let facts = PropertyFacts {
            iri: self.iri.clone(),
            is_required: self.is_required,
            read_only: self.read_only,
            write_only: self.write_only,
        };

        let pending = std::mem::take(&mut self.pending_metadata);
        let mut attributes = Vec::with_capacity(pending.len());
        for md in pending {
            let value_format = select_value_format(
                md.jsonld_type.as_deref().or(Some(XSD_STRING)),
                md.language.as_deref(),
            );
            let attribute = if md.jsonld_type.as_deref() == Some(JSONLD_ID) {
                Attribute::Object(ObjectAttribute::new(md, facts.clone(), value_format))
            } else {
                Attribute::Scalar(ScalarAttribute::new(md, facts.clone(), value_format))
            };
            attributes.push(attribute);
        }
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_and_write_only_is_rejected() {
        let mut p = Property::new("http://ex.org/p", "http://ex.org/C").unwrap();
        assert!(p.set_access(true, true).is_err());
    }

    #[test]
    fn xsd_range_classifies_as_datatype() {
        let mut p = Property::new("http://ex.org/age", "http://ex.org/Person").unwrap();
        p.add_range(XSD_STRING).unwrap();
        assert_eq!(p.property_type(), Some(PropertyType::Datatype));
    }

    #[test]
    fn conflicting_datatype_range_is_rejected() {
        let mut p = Property::new("http://ex.org/age", "http://ex.org/Person").unwrap();
        p.add_range(XSD_STRING).unwrap();
        assert!(p.add_range("http://www.w3.org/2001/XMLSchema#integer").is_err());
    }

    #[test]
    fn reversed_attribute_metadata_is_rejected_at_schema_time() {
        let mut p = Property::new("http://ex.org/knows", "http://ex.org/Person").unwrap();
        let err = p
            .add_attribute_metadata("knownBy", Some(JSONLD_ID.to_string()), None, None, true)
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReversedPropertyUnsupported(_)));
    }

    #[test]
    fn generate_attributes_freezes_property() {
        let mut p = Property::new("http://ex.org/name", "http://ex.org/Person").unwrap();
        p.add_attribute_metadata("name", Some(XSD_STRING.to_string()), None, None, false)
            .unwrap();
        let attrs = p.generate_attributes().unwrap();
        assert_eq!(attrs.len(), 1);
        assert!(p
            .add_attribute_metadata("again", Some(XSD_STRING.to_string()), None, None, false)
            .is_err());
        assert!(p.generate_attributes().is_err());
    }
}
