//! Storage errors.
//!
//! Business rejections (sold out, already used, ...) are ordinary results and never
//! appear here. A [`StoreError`] means the storage layer itself could not complete
//! a request; callers are responsible for retry and backoff.

use crate::version::Version;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: expected version doesn't match current version.
    ///
    /// Another writer replaced the record between our read and our swap. The
    /// engine re-reads and re-validates on this error; it only escapes to callers
    /// wrapped in [`StoreError::RetriesExhausted`].
    #[error("Concurrency conflict on {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The record key where the conflict occurred.
        key: String,
        /// The version we expected the record to be at.
        expected: Version,
        /// The actual current version of the record.
        actual: Version,
    },

    /// A record with this key already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// A record the caller expected to exist is missing.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Contention did not settle within the retry budget.
    #[error("Gave up on {key} after {attempts} conflicting attempts")]
    RetriesExhausted {
        /// The record key that kept conflicting.
        key: String,
        /// Number of attempts made.
        attempts: usize,
    },

    /// The backend could not be reached or refused the request.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data violates an invariant and cannot be trusted.
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Returns true if re-running the read-validate-swap cycle may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns true if the backend failed in a way that may clear up on its own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = StoreError::ConcurrencyConflict {
            key: "ticket-type/abc".to_string(),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
        assert!(error.is_conflict());
    }

    #[test]
    fn not_found_error_display() {
        let error = StoreError::NotFound("ticket/missing".to_string());
        assert!(format!("{error}").contains("ticket/missing"));
        assert!(!error.is_conflict());
    }
}
