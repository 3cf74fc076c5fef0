//! Record versioning for optimistic concurrency control.
//!
//! Every mutable record (a ticket type's inventory counters, a ticket, a purchase
//! log entry) is stored together with a [`Version`]. A writer reads the record,
//! validates its business rules against that snapshot, and asks the store to
//! replace it only if the version is still the one it read. Two writers can never
//! both succeed from the same snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record version number for optimistic concurrency control.
///
/// A freshly inserted record is at version 1; every successful compare-and-swap
/// increments the version by exactly one.
///
/// # Examples
///
/// ```
/// use ticketing_core::version::Version;
///
/// let v = Version::initial();
/// assert_eq!(v.value(), 1);
/// assert_eq!(v.next(), Version::new(2));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Create a new `Version` from a number.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// The version assigned to a record when it is first inserted.
    #[must_use]
    pub const fn initial() -> Self {
        Self(1)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The version a record moves to after one successful swap.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A record read from storage together with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The stored record
    pub value: T,
    /// Version of the record at read time
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pair a record with its version.
    #[must_use]
    pub const fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Discard the version.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Transform the record while keeping its version.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}
