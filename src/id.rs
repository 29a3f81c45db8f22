//! Resource identity: temporary vs. permanent IRIs and blank-node classification.

use uuid::Uuid;

/// Host and path prefix used to mint skolemized blank nodes.
pub const BLANK_NODE_AUTHORITY: &str = "http://localhost/.well-known/genid/";

/// Scheme used for temporary (not-yet-allocated) resource identifiers.
const TEMP_SCHEME: &str = "urn:oldm:tmp:";

/// A suggestion that a permanent-IRI generator may use or ignore when a
/// resource is flushed. Carried from resource creation to commit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IriHint {
    pub hashless_iri: Option<String>,
    pub fragment: Option<String>,
    pub collection_iri: Option<String>,
}

/// Identity of a single resource.
///
/// A temporary `Id` is a unique placeholder minted at resource-creation
/// time so the resource has a stable map key in the session before it is
/// ever flushed to a store. A permanent `Id` is either supplied by the
/// caller or allocated by an [`crate::iri_gen::IriGenerator`] at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    iri: String,
    is_permanent: bool,
}

impl Id {
    /// Wraps an already-known, permanent IRI.
    pub fn permanent(iri: impl Into<String>) -> Self {
        Id {
            iri: iri.into(),
            is_permanent: true,
        }
    }

    /// Mints a fresh temporary identifier. The returned `Id` is a valid,
    /// unique map key but must be replaced via [`Id::promote`] before commit.
    pub fn temporary() -> Self {
        Id {
            iri: format!("{TEMP_SCHEME}{}", Uuid::new_v4()),
            is_permanent: false,
        }
    }

    pub fn iri(&self) -> &str {
        &self.iri
    }

    pub fn is_permanent(&self) -> bool {
        self.is_permanent
    }

    /// IRI with any `#fragment` removed.
    pub fn hashless_iri(&self) -> &str {
        match self.iri.find('#') {
            Some(idx) => &self.iri[..idx],
            None => &self.iri,
        }
    }

    /// True iff the hostname is `localhost` and the path contains the
    /// well-known skolem genid segment. External IRIs that happen to look
    /// similar (different host) are not blank nodes.
    pub fn is_blank_node(&self) -> bool {
        self.iri.starts_with(BLANK_NODE_AUTHORITY)
    }

    /// Replaces a temporary identifier with a permanent one allocated by a
    /// generator. Panics if called on an already-permanent `Id`, since
    /// promotion happens exactly once per resource at commit time.
    pub fn promote(&mut self, permanent_iri: impl Into<String>) {
        assert!(
            !self.is_permanent,
            "attempted to promote an already-permanent Id"
        );
        self.iri = permanent_iri.into();
        self.is_permanent = true;
    }
}
