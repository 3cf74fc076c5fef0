//! # Ticketing Core
//!
//! Storage-agnostic building blocks for the ticket inventory and lifecycle engine.
//!
//! The engine keeps two kinds of shared mutable state: the sold counter of each
//! ticket type and the status/owner/listing fields of each ticket. Both are stored
//! as versioned records and mutated exclusively through compare-and-swap, so this
//! crate provides:
//!
//! - [`version`]: `Version` and `Versioned<T>` for optimistic concurrency control
//! - [`error`]: `StoreError`, the only fatal error a storage backend may raise
//! - [`retry`]: bounded, backed-off re-execution of a load → validate → swap loop
//! - [`environment`]: injected dependencies (`Clock`)
//!
//! ## Example
//!
//! ```ignore
//! use ticketing_core::retry::{RetryPolicy, retry_on_conflict};
//!
//! let version = retry_on_conflict(&RetryPolicy::default(), "ticket-42", || async {
//!     let current = store.load(id).await?.ok_or(StoreError::NotFound(id.to_string()))?;
//!     let mut ticket = current.value;
//!     ticket.mark_used(now, validator)?;
//!     store.compare_and_swap(current.version, ticket).await
//! })
//! .await?;
//! ```

pub mod environment;
pub mod error;
pub mod retry;
pub mod version;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use environment::{Clock, SystemClock};
pub use error::StoreError;
pub use retry::{Conflict, RetryPolicy, retry_on_conflict, retry_through_outages};
pub use version::{Version, Versioned};
