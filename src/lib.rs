//! # Sezamo (Passwordless OTP Sign-In)
//!
//! `sezamo` issues short-lived numeric one-time codes over SMS or email,
//! verifies them, and provisions the authentication identity and user profile
//! on first successful sign-in. Codes are delivered through an external
//! message gateway and identities live in an external directory; both are
//! reached over HTTP with bounded timeouts.
//!
//! ## Correctness under concurrency
//!
//! The interesting part of the service is that issue and verify requests for
//! the same target may race. All shared state (challenge, rate-limit record,
//! profile) lives in a `PostgreSQL` document table and every mutation goes
//! through an atomic read-modify-write with compare-and-set semantics
//! ([`store::AtomicStore`]). The challenge state machine and the
//! sliding-window rate limiter are pure functions over a loaded document and
//! a timestamp, applied inside one such atomic unit, which gives:
//!
//! 1. **At-most-one verification:** concurrent verify calls with the correct
//!    code produce exactly one success; the rest observe the terminal state.
//! 2. **Exact quota accounting:** concurrent issue calls never overspend the
//!    per-target window.
//!
//! ## Storage
//!
//! One `documents` table keyed by `(kind, key)` with a `version` column for
//! optimistic concurrency. Challenges are keyed by ULID, rate-limit records
//! by `channel + "_" + sanitized target`, profiles by uid. Expired state is
//! never actively evicted; expiry is evaluated lazily on verify.

pub mod cli;
pub mod directory;
pub mod gateway;
pub mod otp;
pub mod sezamo;
pub mod store;
pub mod testing;

/// User agent sent on outbound HTTP calls, `sezamo/<version>`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use anyhow::{ensure, Context, Result};
    use std::fs;
    use std::path::{Path, PathBuf};

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonicalize_sql(sql: &str) -> String {
        sql.chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect()
    }

    fn canonical_sql(path: &Path) -> Result<String> {
        let sql = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(canonicalize_sql(&sql))
    }

    fn assert_contains(path: &Path, canonical: &str, needle: &str) -> Result<()> {
        ensure!(
            canonical.contains(needle),
            "Expected {needle} is missing in {}",
            path.display()
        );
        Ok(())
    }

    fn schema_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/schema.sql")
    }

    #[test]
    fn schema_sql_defines_documents_table() -> Result<()> {
        let path = schema_path();
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, "createtableifnotexistsdocuments")?;
        assert_contains(&path, &canonical, "docjsonbnotnull")?;
        assert_contains(&path, &canonical, "primarykey(kind,key)")
    }

    #[test]
    fn schema_sql_versions_documents_for_cas() -> Result<()> {
        // The optimistic write path relies on version starting at 1.
        let path = schema_path();
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, "versionbigintnotnulldefault1")
    }

    #[test]
    fn schema_sql_keeps_timestamps() -> Result<()> {
        let path = schema_path();
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, "created_attimestamptznotnull")?;
        assert_contains(&path, &canonical, "updated_attimestamptznotnull")
    }
}
