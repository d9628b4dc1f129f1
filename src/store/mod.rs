//! Atomic document storage.
//!
//! Every piece of state the service coordinates on (challenges, rate-limit
//! records, profiles) is a keyed JSON document. [`AtomicStore`] is the single
//! capability the domain code uses: an atomic read-modify-write where a
//! closure observes the current document and decides the outcome. The
//! Postgres implementation drives this with an optimistic compare-and-set
//! loop; the in-memory implementation backs tests.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Challenges,
    RateLimits,
    Profiles,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Challenges => "otp_challenges",
            Self::RateLimits => "otp_rate_limits",
            Self::Profiles => "users",
        }
    }
}

/// Outcome of one read-modify-write closure application.
#[derive(Debug)]
pub enum Mutation<T> {
    /// Persist `doc` (insert or replace) and return `output`.
    Write { doc: Value, output: T },
    /// Leave the stored document untouched and return `output`.
    Keep { output: T },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A concurrent writer kept winning the compare-and-set race.
    #[error("write conflict persisted after {0} attempts")]
    ConflictExhausted(u32),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Atomic read-modify-write over keyed JSON documents.
///
/// `apply` sees the current document (or `None` when the key is absent) and
/// returns a [`Mutation`]. The store guarantees the write only lands if the
/// observed document was still current, retrying internally on write
/// conflicts. `apply` must therefore be a pure function of its input; it may
/// run more than once per call.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    async fn read_modify_write<T, F>(
        &self,
        kind: RecordKind,
        key: &str,
        apply: F,
    ) -> Result<T, StoreError>
    where
        T: Send,
        F: Fn(Option<&Value>) -> Result<Mutation<T>, StoreError> + Send + Sync;

    /// Point read of a single document.
    async fn read(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, StoreError>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kinds_map_to_collection_names() {
        assert_eq!(RecordKind::Challenges.as_str(), "otp_challenges");
        assert_eq!(RecordKind::RateLimits.as_str(), "otp_rate_limits");
        assert_eq!(RecordKind::Profiles.as_str(), "users");
    }

    #[test]
    fn serialization_errors_convert() {
        let bad = serde_json::from_str::<Value>("{not json");
        let err: StoreError = bad.expect_err("must fail").into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
