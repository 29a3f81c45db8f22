//! Per-datatype value validation and lexical encoding.
//!
//! A [`ValueFormat`] is selected for an attribute from the pair
//! `(jsonld_type, language)` during schema compilation and then used on
//! every `get`/`set` to validate shape and convert between an in-memory
//! [`ScalarValue`] and the RDF lexical form stored in the graph.

use crate::error::{EditError, EditResult};

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
pub const XSD_DATETIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
pub const XSD_HEX_BINARY: &str = "http://www.w3.org/2001/XMLSchema#hexBinary";
pub const JSONLD_ID: &str = "@id";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// A single, non-container value held by an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    /// Lexical `xsd:date` form, e.g. `2024-01-31`. Validated, not parsed,
    /// to avoid pulling in a date library the teacher's stack does not use.
    Date(String),
    /// Lexical `xsd:dateTime` form, e.g. `2024-01-31T10:00:00Z`.
    DateTime(String),
    /// Lowercase hex digits, even length.
    HexBinary(String),
    LangString { text: String, lang: String },
    /// An object reference: the IRI of another resource.
    IriRef(String),
}

impl ScalarValue {
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            ScalarValue::IriRef(iri) => Some(iri),
            _ => None,
        }
    }
}

/// The shape an attribute's value takes: a single scalar, an unordered set
/// (no duplicates), or an ordered list (duplicates allowed).
///
/// Per spec: an empty `@list` or `@set` is normalized to `None` by the
/// attribute layer before it ever reaches a `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(ScalarValue),
    Set(Vec<ScalarValue>),
    List(Vec<ScalarValue>),
}

/// Validates and lexically encodes/decodes values of one datatype (or
/// `@id`, or a language-tagged string).
pub trait ValueFormat: std::fmt::Debug + Send + Sync {
    /// The JSON-LD type this format corresponds to, or `None` for `@id`.
    fn jsonld_type(&self) -> Option<&str>;

    fn language(&self) -> Option<&str> {
        None
    }

    /// Coerces an already-`check`ed value into this format's canonical
    /// in-memory representation. Most formats store the value as given;
    /// [`LangStringFormat`] folds a bare `String` into its `LangString`
    /// shape so a value set as plain text and one loaded back from the
    /// store compare equal.
    fn normalize(&self, value: ScalarValue) -> ScalarValue {
        value
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()>;

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String>;

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue>;
}

macro_rules! type_mismatch {
    ($name:expr, $expected:expr, $value:expr) => {
        Err(EditError::AttributeTypeError {
            name: $name.to_string(),
            expected: $expected.to_string(),
            found: format!("{:?}", $value),
        })
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringFormat;

impl ValueFormat for StringFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_STRING)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::String(_) => Ok(()),
            other => type_mismatch!("xsd:string", "string", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::String(s) => Ok(s.clone()),
            other => type_mismatch!("xsd:string", "string", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        Ok(ScalarValue::String(lexical.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanFormat;

impl ValueFormat for BooleanFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_BOOLEAN)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::Boolean(_) => Ok(()),
            other => type_mismatch!("xsd:boolean", "boolean", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::Boolean(b) => Ok(b.to_string()),
            other => type_mismatch!("xsd:boolean", "boolean", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        match lexical {
            "true" | "1" => Ok(ScalarValue::Boolean(true)),
            "false" | "0" => Ok(ScalarValue::Boolean(false)),
            other => type_mismatch!("xsd:boolean", "boolean", other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerFormat;

impl ValueFormat for IntegerFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_INTEGER)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::Integer(_) => Ok(()),
            other => type_mismatch!("xsd:integer", "integer", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::Integer(i) => Ok(i.to_string()),
            other => type_mismatch!("xsd:integer", "integer", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        lexical
            .parse::<i64>()
            .map(ScalarValue::Integer)
            .map_err(|_| EditError::AttributeTypeError {
                name: "xsd:integer".to_string(),
                expected: "integer".to_string(),
                found: lexical.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecimalFormat;

impl ValueFormat for DecimalFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_DECIMAL)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::Decimal(_) => Ok(()),
            other => type_mismatch!("xsd:decimal", "decimal", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::Decimal(d) => Ok(d.to_string()),
            other => type_mismatch!("xsd:decimal", "decimal", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        lexical
            .parse::<f64>()
            .map(ScalarValue::Decimal)
            .map_err(|_| EditError::AttributeTypeError {
                name: "xsd:decimal".to_string(),
                expected: "decimal".to_string(),
                found: lexical.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateFormat;

fn looks_like_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && s[..4].chars().all(|c| c.is_ascii_digit())
        && s[5..7].chars().all(|c| c.is_ascii_digit())
        && s[8..10].chars().all(|c| c.is_ascii_digit())
}

impl ValueFormat for DateFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_DATE)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::Date(s) if looks_like_date(s) => Ok(()),
            other => type_mismatch!("xsd:date", "YYYY-MM-DD", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::Date(s) => Ok(s.clone()),
            other => type_mismatch!("xsd:date", "YYYY-MM-DD", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        if looks_like_date(lexical) {
            Ok(ScalarValue::Date(lexical.to_string()))
        } else {
            type_mismatch!("xsd:date", "YYYY-MM-DD", lexical)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeFormat;

impl ValueFormat for DateTimeFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_DATETIME)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::DateTime(s) if s.len() >= 19 && s.as_bytes()[10] == b'T' => Ok(()),
            other => type_mismatch!("xsd:dateTime", "YYYY-MM-DDTHH:MM:SS", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::DateTime(s) => Ok(s.clone()),
            other => type_mismatch!("xsd:dateTime", "YYYY-MM-DDTHH:MM:SS", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        self.check(&ScalarValue::DateTime(lexical.to_string()))?;
        Ok(ScalarValue::DateTime(lexical.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HexBinaryFormat;

impl ValueFormat for HexBinaryFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(XSD_HEX_BINARY)
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::HexBinary(s)
                if s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Ok(())
            }
            other => type_mismatch!("xsd:hexBinary", "even-length hex string", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::HexBinary(s) => Ok(s.clone()),
            other => type_mismatch!("xsd:hexBinary", "even-length hex string", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        self.check(&ScalarValue::HexBinary(lexical.to_string()))?;
        Ok(ScalarValue::HexBinary(lexical.to_string()))
    }
}

/// `@id`-typed attributes: the value is an IRI referring to another resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct IriRefFormat;

impl ValueFormat for IriRefFormat {
    fn jsonld_type(&self) -> Option<&str> {
        None
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::IriRef(_) => Ok(()),
            other => type_mismatch!("@id", "IRI", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::IriRef(iri) => Ok(iri.clone()),
            other => type_mismatch!("@id", "IRI", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        Ok(ScalarValue::IriRef(lexical.to_string()))
    }
}

/// A language-tagged string, e.g. `"hi"@en`.
#[derive(Debug, Clone)]
pub struct LangStringFormat {
    pub lang: String,
}

impl ValueFormat for LangStringFormat {
    fn jsonld_type(&self) -> Option<&str> {
        Some(RDF_LANG_STRING)
    }

    fn language(&self) -> Option<&str> {
        Some(&self.lang)
    }

    fn normalize(&self, value: ScalarValue) -> ScalarValue {
        match value {
            ScalarValue::String(text) => ScalarValue::LangString {
                text,
                lang: self.lang.clone(),
            },
            other => other,
        }
    }

    fn check(&self, value: &ScalarValue) -> EditResult<()> {
        match value {
            ScalarValue::LangString { lang, .. } if lang == &self.lang => Ok(()),
            ScalarValue::String(_) => Ok(()),
            other => type_mismatch!(format!("lang-string@{}", self.lang), "string", other),
        }
    }

    fn to_lexical(&self, value: &ScalarValue) -> EditResult<String> {
        match value {
            ScalarValue::LangString { text, .. } => Ok(text.clone()),
            ScalarValue::String(s) => Ok(s.clone()),
            other => type_mismatch!(format!("lang-string@{}", self.lang), "string", other),
        }
    }

    fn from_lexical(&self, lexical: &str) -> EditResult<ScalarValue> {
        Ok(ScalarValue::LangString {
            text: lexical.to_string(),
            lang: self.lang.clone(),
        })
    }
}

/// Picks the concrete [`ValueFormat`] for an attribute from its declared
/// JSON-LD type and language, as derived during schema compilation (C7).
pub fn select_value_format(
    jsonld_type: Option<&str>,
    language: Option<&str>,
) -> Box<dyn ValueFormat> {
    if let Some(lang) = language {
        return Box::new(LangStringFormat {
            lang: lang.to_string(),
        });
    }
    match jsonld_type {
        Some(JSONLD_ID) | None => Box::new(IriRefFormat),
        Some(XSD_STRING) => Box::new(StringFormat),
        Some(XSD_BOOLEAN) => Box::new(BooleanFormat),
        Some(XSD_INTEGER) => Box::new(IntegerFormat),
        Some(XSD_DECIMAL) => Box::new(DecimalFormat),
        Some(XSD_DATE) => Box::new(DateFormat),
        Some(XSD_DATETIME) => Box::new(DateTimeFormat),
        Some(XSD_HEX_BINARY) => Box::new(HexBinaryFormat),
        Some(_) => Box::new(StringFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_format_round_trips() {
        let fmt = StringFormat;
        let v = ScalarValue::String("Alice".to_string());
        fmt.check(&v).unwrap();
        let lex = fmt.to_lexical(&v).unwrap();
        assert_eq!(lex, "Alice");
        assert_eq!(fmt.from_lexical(&lex).unwrap(), v);
    }

    #[test]
    fn integer_format_rejects_non_numeric_lexical() {
        let fmt = IntegerFormat;
        assert!(fmt.from_lexical("not-a-number").is_err());
    }

    #[test]
    fn date_format_rejects_malformed_date() {
        let fmt = DateFormat;
        assert!(fmt.check(&ScalarValue::Date("2024-1-1".to_string())).is_err());
        assert!(fmt.check(&ScalarValue::Date("2024-01-01".to_string())).is_ok());
    }

    #[test]
    fn hex_binary_rejects_odd_length_and_non_hex() {
        let fmt = HexBinaryFormat;
        assert!(fmt.check(&ScalarValue::HexBinary("abc".to_string())).is_err());
        assert!(fmt.check(&ScalarValue::HexBinary("zz".to_string())).is_err());
        assert!(fmt
            .check(&ScalarValue::HexBinary("deadbeef".to_string()))
            .is_ok());
    }

    #[test]
    fn lang_string_normalize_folds_plain_string_into_lang_string() {
        let fmt = LangStringFormat { lang: "en".to_string() };
        let normalized = fmt.normalize(ScalarValue::String("hi".to_string()));
        assert_eq!(
            normalized,
            ScalarValue::LangString {
                text: "hi".to_string(),
                lang: "en".to_string(),
            }
        );
        assert_eq!(normalized, fmt.from_lexical("hi").unwrap());
    }

    #[test]
    fn select_value_format_prefers_language_over_jsonld_type() {
        let fmt = select_value_format(Some(XSD_STRING), Some("en"));
        assert_eq!(fmt.language(), Some("en"));
    }

    #[test]
    fn select_value_format_defaults_untyped_to_iri_ref() {
        let fmt = select_value_format(None, None);
        assert_eq!(fmt.jsonld_type(), None);
        assert!(fmt.check(&ScalarValue::IriRef("http://x".to_string())).is_ok());
    }
}
