//! # Ticketing
//!
//! Ticket inventory and lifecycle engine.
//!
//! Events define ticket types with a fixed capacity. Buyers acquire tickets
//! against that capacity; owners transfer or resell them; organizers check them
//! in. The engine keeps the sold counter, ticket status and ticket ownership
//! consistent no matter how many callers act on the same event at once:
//!
//! - a ticket type is never oversold
//! - a ticket is checked in at most once
//! - a ticket has exactly one owner, and every ownership change is in its history
//! - used, void, refunded and cancelled tickets never change again
//!
//! ## Architecture
//!
//! ```text
//! TicketingEngine
//!   ├── InventoryLedger      (ticket types, sold counters)
//!   ├── PurchaseOrchestrator (reserve + issue, idempotent per PurchaseId)
//!   ├── TransferManager      ┐
//!   ├── ResaleManager        ├── ticket state machine (lifecycle)
//!   ├── ValidationEngine     │
//!   └── RevocationManager    ┘
//!         │
//!         ▼
//!   store::{InventoryStore, TicketStore, PurchaseLog}  (versioned compare-and-swap)
//! ```
//!
//! Every mutating entry point first asks the [`gate::AccessPolicy`]. Resale
//! notifications and on-chain ownership updates are emitted after the fact and
//! never fail an operation.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ticketing::{Config, TicketingEngine};
//! use ticketing_core::SystemClock;
//!
//! let engine = TicketingEngine::in_memory(Config::from_env(), Arc::new(SystemClock));
//! ```

pub mod config;
pub mod directory;
pub mod engine;
pub mod environment;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod purchase;
pub mod resale;
pub mod revocation;
pub mod store;
pub mod transfer;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use directory::{IdentityDirectory, InMemoryDirectory};
pub use engine::{TicketingEngine, TicketingEngineBuilder};
pub use environment::TicketingEnvironment;
pub use error::{LedgerRejection, Result, TicketingError};
pub use gate::{AccessPolicy, GuardedAction, RoleAccessPolicy};
pub use ledger::{InventoryLedger, Reservation};
pub use notify::{
    InMemoryResalePublisher, NoopResalePublisher, NoopTokenBridge, NotifyError, OwnershipChange, ResaleNotification,
    ResalePublisher, TokenBridge,
};
pub use purchase::{PurchaseOrchestrator, PurchaseOutcome, PurchaseRecord, PurchaseRequest, PurchaseState, UnitFailure};
pub use resale::ResaleManager;
pub use revocation::RevocationManager;
pub use transfer::TransferManager;
pub use types::*;
pub use validation::ValidationEngine;
