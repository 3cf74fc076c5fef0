//! Storage contracts for inventory, tickets and purchase records.
//!
//! Every mutable record is read as a [`Versioned`] value and written back with a
//! compare-and-swap against the version that was read. A backend must perform
//! the version check and the write as one indivisible step; that single property
//! is what keeps `sold <= quantity` and gives each ticket at most one successful
//! validation, regardless of how many workers call in concurrently.
//!
//! # Implementations
//!
//! - [`memory`]: `HashMap` backed stores guarded by one lock per store
//!
//! # Dyn Compatibility
//!
//! These traits return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! engine can hold them as `Arc<dyn TicketStore>`.

pub mod memory;

use crate::ledger::Reservation;
use crate::purchase::PurchaseRecord;
use crate::types::{Event, EventId, IdentityId, PurchaseId, Ticket, TicketId, TicketType, TicketTypeId};
use std::future::Future;
use std::pin::Pin;
use ticketing_core::{StoreError, Version, Versioned};

pub use memory::{InMemoryInventoryStore, InMemoryPurchaseLog, InMemoryTicketStore};

/// Boxed future returned by every storage operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable home of events and their ticket-type counters.
pub trait InventoryStore: Send + Sync {
    /// Store a new event together with its ticket types.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: an event with this id is already stored
    fn insert_event(&self, event: Event, ticket_types: Vec<TicketType>) -> StoreFuture<'_, ()>;

    /// Load an event.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>>;

    /// Load one ticket type with its current version.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn load_ticket_type(
        &self,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
    ) -> StoreFuture<'_, Option<Versioned<TicketType>>>;

    /// Load every ticket type of an event in display order.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn load_ticket_types(&self, event_id: EventId) -> StoreFuture<'_, Vec<Versioned<TicketType>>>;

    /// Replace a ticket type if it is still at `expected`.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stored version is not `expected`
    /// - `NotFound`: the ticket type does not exist
    fn compare_and_swap_ticket_type(
        &self,
        event_id: EventId,
        expected: Version,
        updated: TicketType,
    ) -> StoreFuture<'_, Version>;

    /// Replace a ticket type if it is still at `expected` and, in the same
    /// write, remember `reservation` as taken by `purchase_id`.
    ///
    /// The remembered reservation is what lets a purchase whose own record
    /// was never updated find out that its inventory is already taken.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stored version is not `expected`
    /// - `NotFound`: the ticket type does not exist
    /// - `AlreadyExists`: `purchase_id` already holds a reservation
    fn reserve_ticket_type(
        &self,
        event_id: EventId,
        expected: Version,
        updated: TicketType,
        purchase_id: PurchaseId,
        reservation: Reservation,
    ) -> StoreFuture<'_, Version>;

    /// The reservation taken by a purchase id, if any.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn load_reservation(&self, purchase_id: &PurchaseId) -> StoreFuture<'_, Option<Reservation>>;
}

/// Durable home of issued tickets.
pub trait TicketStore: Send + Sync {
    /// Store a newly issued ticket at [`Version::initial`].
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: a ticket with this id is already stored
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Version>;

    /// Load a ticket with its current version.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn load(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Versioned<Ticket>>>;

    /// Replace a ticket if it is still at `expected`, keeping the owner index in step.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stored version is not `expected`
    /// - `NotFound`: the ticket does not exist
    fn compare_and_swap(&self, expected: Version, ticket: Ticket) -> StoreFuture<'_, Version>;

    /// Tickets currently held by `owner`, in the order they were acquired.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn owned_by(&self, owner: IdentityId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Every ticket issued for an event.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>>;
}

/// Idempotency records, one per logical purchase attempt.
pub trait PurchaseLog: Send + Sync {
    /// Claim a purchase id by storing its first record.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: the id has been claimed before
    fn insert(&self, record: PurchaseRecord) -> StoreFuture<'_, Version>;

    /// Load the record for a purchase id.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn load(&self, purchase_id: &PurchaseId) -> StoreFuture<'_, Option<Versioned<PurchaseRecord>>>;

    /// Replace a record if it is still at `expected`.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stored version is not `expected`
    /// - `NotFound`: no record for this purchase id
    fn compare_and_swap(&self, expected: Version, record: PurchaseRecord) -> StoreFuture<'_, Version>;
}

/// Storage key for a ticket type, used in conflicts and logs.
#[must_use]
pub fn ticket_type_key(event_id: EventId, ticket_type_id: TicketTypeId) -> String {
    format!("ticket-type/{event_id}/{ticket_type_id}")
}

/// Storage key for a ticket, used in conflicts and logs.
#[must_use]
pub fn ticket_key(ticket_id: TicketId) -> String {
    format!("ticket/{ticket_id}")
}

/// Storage key for a purchase record, used in conflicts and logs.
#[must_use]
pub fn purchase_key(purchase_id: &PurchaseId) -> String {
    format!("purchase/{purchase_id}")
}
