//! Permanent-IRI generators.
//!
//! A generator turns a temporary [`crate::id::Id`] into a permanent one at
//! commit time. Three strategies are provided, matching the reference
//! semantics: skolemized blank nodes, random-prefixed IRIs, and a
//! per-class incrementing counter stored in the backing graph.

use tracing::{debug, warn};

use crate::error::{InternalError, OldmError, OldmResult};
use crate::id::{IriHint, BLANK_NODE_AUTHORITY};

/// Bound on compare-and-set retries for [`IncrementalGenerator`] before it
/// gives up and surfaces [`InternalError::CounterExhausted`].
const MAX_CAS_RETRIES: u32 = 64;

/// Backing-store seam for per-class counters. A `Store` implements this so
/// `IncrementalGenerator` can allocate numbers without knowing how they are
/// physically stored.
pub trait CounterBackend {
    /// Reads the current counter value for `key`, or `None` if never set.
    fn read_counter(&self, key: &str) -> OldmResult<Option<u64>>;

    /// Attempts to atomically replace the counter for `key` with
    /// `expected + 1`, succeeding only if the counter still equals
    /// `expected` (or is absent, when `expected == 0`). Returns whether the
    /// compare-and-set succeeded.
    fn try_advance_counter(&self, key: &str, expected: u64) -> OldmResult<bool>;

    /// Clears the counter for `key`. Intended for test setup.
    fn reset_counter(&self, key: &str) -> OldmResult<()>;
}

/// Produces a permanent IRI for a resource being flushed for the first time.
pub trait IriGenerator: std::fmt::Debug + Send + Sync {
    fn generate(
        &self,
        class_iri: Option<&str>,
        hint: &IriHint,
        counters: &dyn CounterBackend,
    ) -> OldmResult<String>;
}

/// Mints `http://localhost/.well-known/genid/<uuid>`, i.e. a skolemized
/// blank node.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankNodeGenerator;

impl IriGenerator for BlankNodeGenerator {
    fn generate(
        &self,
        _class_iri: Option<&str>,
        _hint: &IriHint,
        _counters: &dyn CounterBackend,
    ) -> OldmResult<String> {
        Ok(format!("{BLANK_NODE_AUTHORITY}{}", uuid::Uuid::new_v4()))
    }
}

/// Returns `prefix + <random>`, optionally with a `#fragment`.
#[derive(Debug, Clone)]
pub struct RandomPrefixedGenerator {
    pub prefix: String,
    pub fragment: Option<String>,
}

impl RandomPrefixedGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        RandomPrefixedGenerator {
            prefix: prefix.into(),
            fragment: None,
        }
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }
}

impl IriGenerator for RandomPrefixedGenerator {
    fn generate(
        &self,
        _class_iri: Option<&str>,
        _hint: &IriHint,
        _counters: &dyn CounterBackend,
    ) -> OldmResult<String> {
        let id = uuid::Uuid::new_v4();
        Ok(match &self.fragment {
            Some(frag) => format!("{}{id}#{frag}", self.prefix),
            None => format!("{}{id}", self.prefix),
        })
    }
}

/// Hands out `prefix + n` where `n` is a per-class counter stored in the
/// backing graph. Idempotent under concurrent creators via a
/// compare-and-set retry loop.
#[derive(Debug, Clone)]
pub struct IncrementalGenerator {
    pub prefix: String,
    pub class_iri: String,
    pub fragment: Option<String>,
}

impl IncrementalGenerator {
    pub fn new(prefix: impl Into<String>, class_iri: impl Into<String>) -> Self {
        IncrementalGenerator {
            prefix: prefix.into(),
            class_iri: class_iri.into(),
            fragment: None,
        }
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    fn counter_key(&self) -> String {
        format!("oldm:counter:{}", self.class_iri)
    }

    /// Resets the counter to zero. Intended for tests.
    pub fn reset(&self, counters: &dyn CounterBackend) -> OldmResult<()> {
        counters.reset_counter(&self.counter_key())
    }
}

impl IriGenerator for IncrementalGenerator {
    fn generate(
        &self,
        _class_iri: Option<&str>,
        _hint: &IriHint,
        counters: &dyn CounterBackend,
    ) -> OldmResult<String> {
        let key = self.counter_key();
        for attempt in 0..MAX_CAS_RETRIES {
            let current = counters.read_counter(&key)?.unwrap_or(0);
            if counters.try_advance_counter(&key, current)? {
                let n = current + 1;
                debug!(class_iri = %self.class_iri, n, "allocated incremental IRI");
                return Ok(match &self.fragment {
                    Some(frag) => format!("{}{n}#{frag}", self.prefix),
                    None => format!("{}{n}", self.prefix),
                });
            }
            warn!(attempt, key = %key, "counter CAS conflict, retrying");
        }
        Err(OldmError::Internal(InternalError::CounterExhausted(
            self.class_iri.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemCounters(RefCell<HashMap<String, u64>>);

    impl CounterBackend for MemCounters {
        fn read_counter(&self, key: &str) -> OldmResult<Option<u64>> {
            Ok(self.0.borrow().get(key).copied())
        }

        fn try_advance_counter(&self, key: &str, expected: u64) -> OldmResult<bool> {
            let mut map = self.0.borrow_mut();
            let current = map.get(key).copied().unwrap_or(0);
            if current == expected {
                map.insert(key.to_string(), expected + 1);
                Ok(true)
            } else {
                Ok(false)
            }
        }

        fn reset_counter(&self, key: &str) -> OldmResult<()> {
            self.0.borrow_mut().remove(key);
            Ok(())
        }
    }

    #[test]
    fn blank_node_generator_mints_localhost_genid() {
        let gen = BlankNodeGenerator;
        let counters = MemCounters::default();
        let iri = gen.generate(None, &IriHint::default(), &counters).unwrap();
        assert!(iri.starts_with(BLANK_NODE_AUTHORITY));
    }

    #[test]
    fn incremental_generator_increments_per_class() {
        let gen = IncrementalGenerator::new("http://example.org/people/", "Person");
        let counters = MemCounters::default();
        let first = gen.generate(None, &IriHint::default(), &counters).unwrap();
        let second = gen.generate(None, &IriHint::default(), &counters).unwrap();
        assert_eq!(first, "http://example.org/people/1");
        assert_eq!(second, "http://example.org/people/2");
    }

    #[test]
    fn incremental_generator_reset_restarts_counter() {
        let gen = IncrementalGenerator::new("http://example.org/people/", "Person");
        let counters = MemCounters::default();
        gen.generate(None, &IriHint::default(), &counters).unwrap();
        gen.reset(&counters).unwrap();
        let after_reset = gen.generate(None, &IriHint::default(), &counters).unwrap();
        assert_eq!(after_reset, "http://example.org/people/1");
    }

    #[test]
    fn random_prefixed_generator_appends_fragment() {
        let gen = RandomPrefixedGenerator::new("http://example.org/r/").with_fragment("this");
        let counters = MemCounters::default();
        let iri = gen.generate(None, &IriHint::default(), &counters).unwrap();
        assert!(iri.starts_with("http://example.org/r/"));
        assert!(iri.ends_with("#this"));
    }
}
