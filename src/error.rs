//! Error taxonomy for schema compilation, attribute editing, resource access,
//! and store internals.
//!
//! Errors are grouped into four families, matching the propagation rules
//! each one gets: schema errors are fatal and block model compilation; user
//! and access errors are local and leave the session usable; internal
//! errors escalate and leave no guarantee about session consistency.

use thiserror::Error;

/// Errors raised while compiling a schema graph and JSON-LD context into models.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("property {0} cannot be both read-only and write-only")]
    PropertyDefError(String),

    #[error("property {iri} already declared as {declared} so cannot also be {requested}")]
    PropertyDefTypeError {
        iri: String,
        declared: String,
        requested: String,
    },

    #[error("attribute {name} cannot have a different datatype ({found}) than the property's ({expected})")]
    AlreadyDeclaredDatatypeError {
        name: String,
        found: String,
        expected: String,
    },

    #[error("attribute name {0} is reserved and must not appear in a JSON-LD context")]
    ReservedAttributeNameError(String),

    #[error("no short name declared for class {0} in the JSON-LD context")]
    UndeclaredClassNameError(String),

    #[error("attributes for property {0} were already generated; cannot add more metadata")]
    AlreadyGeneratedAttributeError(String),

    #[error("reversed properties are not supported (term {0} declares @reverse)")]
    ReversedPropertyUnsupported(String),

    #[error("property cardinality is not yet supported (property {0})")]
    CardinalityUnsupported(String),

    #[error("model {class_iri} is missing required attribute {attribute}")]
    MissingClassAttributeError { class_iri: String, attribute: String },

    #[error("model class/name already allocated: {0}")]
    AlreadyAllocatedModel(String),

    #[error("failed to parse schema graph: {0}")]
    GraphParse(String),

    #[error("failed to parse JSON-LD context: {0}")]
    ContextParse(String),
}

/// Errors raised while editing attributes or committing a session.
#[derive(Error, Debug)]
pub enum EditError {
    #[error("attribute {name} expected {expected}, got {found}")]
    AttributeTypeError {
        name: String,
        expected: String,
        found: String,
    },

    #[error("required property {0} has no value")]
    RequiredPropertyError(String),

    #[error("attribute {0} is read-only and cannot be set by an end user")]
    ReadOnlyAttributeError(String),

    #[error("uniqueness violation on {0}")]
    UniquenessError(String),

    #[error("update targeted {expected} but payload declared id {found}")]
    WrongResourceError { expected: String, found: String },

    #[error("resource {0} has a different base IRI than the target document")]
    DifferentBaseIriError(String),

    #[error("subject {subject} does not share hashless IRI {expected}")]
    DifferentHashlessIriError { subject: String, expected: String },

    #[error("skolemized IRI {0} is forbidden as input")]
    ForbiddenSkolemizedIriError(String),

    #[error("a valid base IRI is required but none was given")]
    RequiredBaseIriError,

    #[error("type change from {from:?} to {to:?} requires allow_new_type/allow_type_removal")]
    UnauthorizedTypeChangeError { from: Vec<String>, to: Vec<String> },
}

/// Errors raised while looking up attributes or resources.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("no such attribute: {0}")]
    AttributeAccessError(String),

    #[error("object not found: {0}")]
    ObjectNotFoundError(String),

    #[error("{0} is a hash IRI, a base IRI was expected")]
    HashIriError(String),

    #[error("resource {iri} is not an instance of {expected}")]
    ClassInstanceError { iri: String, expected: String },
}

/// Errors that should not normally occur; if one surfaces, the session is
/// not guaranteed to be consistent afterwards.
#[derive(Error, Debug)]
pub enum InternalError {
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("invalid SPARQL: {0}")]
    SparqlParseError(String),

    #[error("data store error: {0}")]
    DataStoreError(String),

    #[error("IRI counter allocation exhausted its retry budget for class {0}")]
    CounterExhausted(String),
}

/// Top-level error type unifying all four families.
#[derive(Error, Debug)]
pub enum OldmError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type OldmResult<T> = Result<T, OldmError>;
pub type SchemaResult<T> = Result<T, SchemaError>;
pub type EditResult<T> = Result<T, EditError>;
pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_displays_variant_detail() {
        let err = SchemaError::ReservedAttributeNameError("id".to_string());
        assert_eq!(
            err.to_string(),
            "attribute name id is reserved and must not appear in a JSON-LD context"
        );
    }

    #[test]
    fn oldm_error_wraps_family_errors_transparently() {
        let err: OldmError = EditError::RequiredPropertyError("mbox".to_string()).into();
        assert!(err.to_string().contains("mbox"));
    }
}
