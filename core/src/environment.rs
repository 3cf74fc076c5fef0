//! Environment module - Dependency injection traits
//!
//! External dependencies of the engine are abstracted behind traits and injected
//! at construction time so tests can substitute deterministic implementations.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Sale windows, issuance timestamps, transfer history and check-in times all
/// read the current time through this trait.
///
/// # Examples
///
/// ```
/// use ticketing_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let earlier = clock.now();
/// assert!(clock.now() >= earlier);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
