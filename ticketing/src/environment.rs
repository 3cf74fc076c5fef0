//! Dependencies shared by every engine component.

use crate::config::Config;
use crate::directory::IdentityDirectory;
use crate::gate::AccessPolicy;
use crate::notify::{ResalePublisher, TokenBridge};
use crate::store::{InventoryStore, PurchaseLog, TicketStore};
use std::sync::Arc;
use ticketing_core::{Clock, RetryPolicy};

/// Environment dependencies for the ledger, the orchestrator and the managers.
///
/// Cloning is cheap; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct TicketingEnvironment {
    /// Ticket-type counters
    pub inventory: Arc<dyn InventoryStore>,
    /// Issued tickets
    pub tickets: Arc<dyn TicketStore>,
    /// Purchase idempotency records
    pub purchases: Arc<dyn PurchaseLog>,
    /// Identity & authorization gate
    pub gate: Arc<dyn AccessPolicy>,
    /// Recipient and profile lookups
    pub directory: Arc<dyn IdentityDirectory>,
    /// Resale notifications
    pub publisher: Arc<dyn ResalePublisher>,
    /// On-chain ownership hook
    pub bridge: Arc<dyn TokenBridge>,
    /// Clock for timestamps and sale windows
    pub clock: Arc<dyn Clock>,
    /// Business limits and retry settings
    pub config: Config,
    /// Conflict retry policy derived from `config`
    pub retry: RetryPolicy,
}
