//! JSON-LD context parsing: term name, `@id`, `@type`, `@language`,
//! `@container`, `@reverse`.
//!
//! A hand-rolled reader over `serde_json::Value` rather than a dependency on
//! a full JSON-LD processor, since the core only needs term metadata, not
//! expansion/compaction algorithms (those are assumed to live in the RDF
//! parsing library at the system boundary).

use serde_json::Value;
use tracing::warn;

use crate::attribute::Container;
use crate::error::{SchemaError, SchemaResult};

/// One entry of a JSON-LD context: a short name bound to a property/class
/// IRI plus optional type/language/container/reverse metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTerm {
    pub name: String,
    pub id: String,
    pub type_: Option<String>,
    pub language: Option<String>,
    pub container: Option<Container>,
    pub reversed: bool,
}

fn parse_container(raw: &str) -> Option<Container> {
    match raw {
        "@set" => Some(Container::Set),
        "@list" => Some(Container::List),
        "@language" => Some(Container::Language),
        "@index" => Some(Container::Index),
        other => {
            warn!(container = other, "unrecognised @container keyword, ignoring");
            None
        }
    }
}

/// Parses a JSON-LD context object. Accepts either the inner term map or a
/// document wrapped in `{"@context": {...}}`.
pub fn parse_context(value: &Value) -> SchemaResult<Vec<ContextTerm>> {
    let map = match value.get("@context") {
        Some(inner) => inner,
        None => value,
    };
    let map = map
        .as_object()
        .ok_or_else(|| SchemaError::ContextParse("context is not a JSON object".to_string()))?;

    let mut terms = Vec::with_capacity(map.len());
    for (name, entry) in map {
        if name.starts_with('@') {
            continue;
        }
        match entry {
            Value::String(id) => terms.push(ContextTerm {
                name: name.clone(),
                id: id.clone(),
                type_: None,
                language: None,
                container: None,
                reversed: false,
            }),
            Value::Object(obj) => {
                let reversed = obj.contains_key("@reverse");
                let id = obj
                    .get("@id")
                    .or_else(|| obj.get("@reverse"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SchemaError::ContextParse(format!("term {name} has no @id or @reverse"))
                    })?
                    .to_string();
                let type_ = obj.get("@type").and_then(Value::as_str).map(String::from);
                let language = obj
                    .get("@language")
                    .and_then(Value::as_str)
                    .map(String::from);
                let container = obj
                    .get("@container")
                    .and_then(Value::as_str)
                    .and_then(parse_container);

                terms.push(ContextTerm {
                    name: name.clone(),
                    id,
                    type_,
                    language,
                    container,
                    reversed,
                });
            }
            other => {
                return Err(SchemaError::ContextParse(format!(
                    "term {name} has unsupported shape: {other}"
                )))
            }
        }
    }
    Ok(terms)
}

/// All terms whose `@id`/`@reverse` target equals `iri`.
pub fn terms_for_iri<'a>(terms: &'a [ContextTerm], iri: &str) -> Vec<&'a ContextTerm> {
    terms.iter().filter(|t| t.id == iri).collect()
}
