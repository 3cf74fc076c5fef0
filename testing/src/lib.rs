//! # Ticketing Testing
//!
//! Testing utilities for the ticket inventory and lifecycle engine.
//!
//! This crate provides:
//! - Deterministic [`Clock`] implementations (`FixedClock`, `ManualClock`)
//! - A tracing initializer that is safe to call from every test
//!
//! ## Example
//!
//! ```ignore
//! use ticketing_testing::{ManualClock, test_clock};
//!
//! #[tokio::test]
//! async fn sale_window_closes() {
//!     let clock = ManualClock::starting_at(test_clock().now());
//!     let engine = TicketingEngine::in_memory(Config::default(), Arc::new(clock.clone()));
//!     clock.advance(chrono::Duration::days(2));
//!     // reservations are now outside the window
//! }
//! ```

use chrono::{DateTime, Utc};
use ticketing_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticketing_testing::mocks::FixedClock;
    /// use ticketing_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock that only moves when a test tells it to.
    ///
    /// Clones share the same underlying time, so a test can keep one handle and
    /// give another to the engine.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward (or backward, with a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut guard = match self.time.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, time: DateTime<Utc>) {
            let mut guard = match self.time.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            match self.time.read() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            }
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// The instant every deterministic clock in this crate starts from.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Test helpers and utilities
pub mod helpers {
    use std::sync::Once;

    static TRACING: Once = Once::new();

    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`; defaults to warnings so passing tests stay quiet.
    pub fn init_test_tracing() {
        TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "warn".into()),
                )
                .with_test_writer()
                .try_init();
        });
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
