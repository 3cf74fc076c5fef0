//! Typed outcomes of every engine operation.
//!
//! Sold-out ticket types, already-used tickets, missing ownership and the like are
//! normal results and are reported as variants of [`TicketingError`] so callers
//! can turn them into messages. Only [`TicketingError::Storage`] is fatal.

use crate::types::{EventId, PurchaseId, TicketId, TicketStatus, TicketTypeId};
use thiserror::Error;
use ticketing_core::StoreError;
use ticketing_core::retry::Conflict;

/// Why the inventory ledger refused a reservation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerRejection {
    /// The event or ticket type does not exist.
    #[error("Ticket type {ticket_type_id} not found for event {event_id}")]
    NotFound {
        /// Requested event
        event_id: EventId,
        /// Requested ticket type
        ticket_type_id: TicketTypeId,
    },

    /// The ticket type is switched off.
    #[error("Ticket type {0} is not on sale")]
    Inactive(TicketTypeId),

    /// The current time is outside the ticket type's sale window.
    #[error("Ticket type {0} is outside its sale window")]
    OutOfWindow(TicketTypeId),

    /// Not enough units remain.
    #[error("Insufficient inventory: requested {requested}, remaining {remaining}")]
    InsufficientInventory {
        /// Units requested
        requested: u32,
        /// Units left at the time of the attempt
        remaining: u32,
    },
}

impl LedgerRejection {
    /// Short label used in logs and metrics
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Inactive(_) => "inactive",
            Self::OutOfWindow(_) => "out_of_window",
            Self::InsufficientInventory { .. } => "insufficient_inventory",
        }
    }
}

/// Errors returned by engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketingError {
    /// Reservation refused by the inventory ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerRejection),

    /// The event does not exist.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// The ticket does not exist.
    #[error("Ticket {0} not found")]
    TicketNotFound(TicketId),

    /// Requested quantity must be at least one.
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    /// Requested quantity is above the per-purchase limit.
    #[error("Requested {requested} tickets, limit per purchase is {limit}")]
    QuantityLimitExceeded {
        /// Units requested
        requested: u32,
        /// Configured limit
        limit: u32,
    },

    /// Attendee overrides must be empty or one per ticket.
    #[error("Expected 0 or {expected} attendees, got {actual}")]
    AttendeeCountMismatch {
        /// Requested quantity
        expected: u32,
        /// Attendees supplied
        actual: usize,
    },

    /// A purchase id was reused for a different request.
    #[error("Purchase id was already used for a different request")]
    IdempotencyMismatch,

    /// Another call with the same purchase id has not reserved inventory yet.
    #[error("Purchase {0} is still being processed")]
    PurchaseInProgress(PurchaseId),

    /// The purchase id has never been used.
    #[error("Purchase {0} not found")]
    PurchaseNotFound(PurchaseId),

    /// The caller does not hold the ticket.
    #[error("Caller does not own ticket {0}")]
    NotOwner(TicketId),

    /// The caller's role or identity is not allowed to perform the action.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The ticket was issued as non-transferable.
    #[error("Ticket {0} is not transferable")]
    NotTransferable(TicketId),

    /// The recipient could not be resolved to an identity.
    #[error("Recipient not found")]
    RecipientNotFound,

    /// Source and destination identities are the same.
    #[error("Ticket {0} is already held by that identity")]
    SameOwner(TicketId),

    /// The ticket is used, refunded, cancelled or void.
    #[error("Ticket {ticket_id} is {status} and can no longer change")]
    TicketNotActive {
        /// Affected ticket
        ticket_id: TicketId,
        /// Its terminal status
        status: TicketStatus,
    },

    /// The ticket has already been checked in.
    #[error("Ticket {0} has already been used")]
    AlreadyUsed(TicketId),

    /// The ticket already has an open resale listing.
    #[error("Ticket {0} is already listed for resale")]
    AlreadyListed(TicketId),

    /// The ticket is not listed for resale.
    #[error("Ticket {0} is not listed for resale")]
    NotListed(TicketId),

    /// Another buyer completed the resale first.
    #[error("Ticket {0} was already sold")]
    AlreadySold(TicketId),

    /// Asking price is above the resale cap.
    #[error("Resale price {price} exceeds the cap of {cap}")]
    PriceCapExceeded {
        /// Asking price in minor units
        price: u64,
        /// Highest allowed price in minor units
        cap: u64,
    },

    /// Asking price must be positive.
    #[error("Resale price must be greater than zero")]
    InvalidPrice,

    /// Storage failure (fatal for this request).
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl TicketingError {
    /// True for expected business outcomes.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !self.is_fatal()
    }

    /// True when storage failed and the caller should retry or back off.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl Conflict for TicketingError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Storage(error) if error.is_conflict())
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(error) if error.is_transient())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, TicketingError>;
