//! Inventory ledger: per-event ticket types and their sold counters.
//!
//! `sold` is only ever changed by `InventoryLedger::reserve`, which increments
//! it with a compare-and-swap against the version it validated. Reserving is
//! crate-internal: the purchase orchestrator is its only caller, so every sold
//! unit belongs to a purchase that owes a ticket for it. There is no release: a
//! reservation whose tickets are never issued is written off as cancelled
//! tickets instead, so the counter stays monotonic.

use crate::environment::TicketingEnvironment;
use crate::error::{LedgerRejection, Result, TicketingError};
use crate::gate::GuardedAction;
use crate::metrics;
use crate::store::ticket_type_key;
use crate::types::{Event, EventId, Money, PriceSnapshot, Principal, PurchaseId, TicketType, TicketTypeId};
use serde::{Deserialize, Serialize};
use ticketing_core::retry_on_conflict;
use tracing::{debug, info};

/// A successful reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Name, price and currency to copy onto the issued tickets
    pub snapshot: PriceSnapshot,
    /// Units reserved
    pub quantity: u32,
    /// The ticket type's sold counter after this reservation
    pub sold_after: u32,
    /// Whether tickets of this type may change hands
    pub transferable: bool,
}

/// Owner of every ticket type's capacity and sold counter.
#[derive(Clone)]
pub struct InventoryLedger {
    env: TicketingEnvironment,
}

impl InventoryLedger {
    /// Creates a ledger over the environment's inventory store
    #[must_use]
    pub const fn new(env: TicketingEnvironment) -> Self {
        Self { env }
    }

    /// Register an event with its ticket types.
    ///
    /// The event's ticket-type order follows `ticket_types`, and every type
    /// starts with nothing sold.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless the principal is an admin or the event's organizer;
    /// `Storage(AlreadyExists)` if the event id is taken.
    pub async fn register_event(
        &self,
        principal: &Principal,
        mut event: Event,
        mut ticket_types: Vec<TicketType>,
    ) -> Result<Event> {
        self.env
            .gate
            .authorize(principal, GuardedAction::ManageInventory, Some(&event))?;

        for ticket_type in &mut ticket_types {
            ticket_type.sold = 0;
        }
        event.ticket_types = ticket_types.iter().map(|ticket_type| ticket_type.id).collect();

        self.env.inventory.insert_event(event.clone(), ticket_types).await?;

        metrics::record_event_registered();
        info!(
            event_id = %event.id,
            ticket_types = event.ticket_types.len(),
            "Event registered"
        );
        Ok(event)
    }

    /// Atomically take `quantity` units of a ticket type for `purchase_id`.
    ///
    /// Checks, in order, that the ticket type exists, is active, is inside its
    /// sale window and has enough units left, then increments `sold`. Concurrent
    /// reservations on the same type are linearized by the compare-and-swap; a
    /// reservation that loses the race re-validates against the new counter.
    ///
    /// The reservation is stored with the counter in one write, keyed by the
    /// purchase id. Calling again for a purchase id that already holds one
    /// returns the stored reservation and takes nothing.
    ///
    /// # Errors
    ///
    /// `InvalidQuantity`, a [`LedgerRejection`], or a fatal storage error.
    pub(crate) async fn reserve(
        &self,
        purchase_id: &PurchaseId,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
        quantity: u32,
    ) -> Result<Reservation> {
        if quantity == 0 {
            return Err(TicketingError::InvalidQuantity);
        }

        let key = ticket_type_key(event_id, ticket_type_id);
        let env = &self.env;
        let result = retry_on_conflict(&env.retry, &key, move || async move {
            if let Some(existing) = env.inventory.load_reservation(purchase_id).await? {
                return Ok((existing, false));
            }

            let current = env
                .inventory
                .load_ticket_type(event_id, ticket_type_id)
                .await?
                .ok_or(LedgerRejection::NotFound {
                    event_id,
                    ticket_type_id,
                })?;
            let mut ticket_type = current.value;

            if !ticket_type.active {
                return Err(LedgerRejection::Inactive(ticket_type_id).into());
            }
            if !ticket_type.sale_window.contains(env.clock.now()) {
                return Err(LedgerRejection::OutOfWindow(ticket_type_id).into());
            }
            let remaining = ticket_type.remaining();
            if quantity > remaining {
                return Err(LedgerRejection::InsufficientInventory {
                    requested: quantity,
                    remaining,
                }
                .into());
            }

            ticket_type.sold += quantity;
            let reservation = Reservation {
                snapshot: ticket_type.snapshot(),
                quantity,
                sold_after: ticket_type.sold,
                transferable: ticket_type.transferable,
            };
            env.inventory
                .reserve_ticket_type(
                    event_id,
                    current.version,
                    ticket_type,
                    purchase_id.clone(),
                    reservation.clone(),
                )
                .await?;
            Ok::<_, TicketingError>((reservation, true))
        })
        .await;

        match result {
            Ok((reservation, true)) => {
                info!(
                    %event_id,
                    %ticket_type_id,
                    %purchase_id,
                    quantity,
                    sold = reservation.sold_after,
                    "Inventory reserved"
                );
                Ok(reservation)
            },
            Ok((reservation, false)) => {
                debug!(%purchase_id, quantity = reservation.quantity, "Reservation already held");
                Ok(reservation)
            },
            Err(TicketingError::Ledger(rejection)) => {
                metrics::record_reservation_rejected(rejection.reason());
                debug!(%event_id, %ticket_type_id, quantity, %rejection, "Reservation refused");
                Err(TicketingError::Ledger(rejection))
            },
            Err(error) => Err(error),
        }
    }

    /// The reservation held by a purchase id, if inventory was ever taken for it.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the store cannot be read.
    pub async fn reservation_for(&self, purchase_id: &PurchaseId) -> Result<Option<Reservation>> {
        Ok(self.env.inventory.load_reservation(purchase_id).await?)
    }

    /// Put a ticket type on or off sale.
    ///
    /// # Errors
    ///
    /// `EventNotFound`, `Unauthorized`, `Ledger(NotFound)` or a fatal storage error.
    pub async fn set_active(
        &self,
        principal: &Principal,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
        active: bool,
    ) -> Result<TicketType> {
        let updated = self
            .maintain(principal, event_id, ticket_type_id, move |ticket_type| {
                ticket_type.active = active;
            })
            .await?;
        info!(%event_id, %ticket_type_id, active, "Ticket type availability changed");
        Ok(updated)
    }

    /// Change the list price for future issuance. Issued tickets keep the price paid.
    ///
    /// # Errors
    ///
    /// `EventNotFound`, `Unauthorized`, `Ledger(NotFound)` or a fatal storage error.
    pub async fn reprice(
        &self,
        principal: &Principal,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
        price: Money,
    ) -> Result<TicketType> {
        let updated = self
            .maintain(principal, event_id, ticket_type_id, move |ticket_type| {
                ticket_type.price = price;
            })
            .await?;
        info!(%event_id, %ticket_type_id, %price, "Ticket type repriced");
        Ok(updated)
    }

    /// Current ticket types of an event in display order.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or a fatal storage error.
    pub async fn availability(&self, event_id: EventId) -> Result<Vec<TicketType>> {
        self.load_event(event_id).await?;
        let ticket_types = self.env.inventory.load_ticket_types(event_id).await?;
        Ok(ticket_types.into_iter().map(|record| record.value).collect())
    }

    /// Load an event or fail with `EventNotFound`.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or a fatal storage error.
    pub async fn load_event(&self, event_id: EventId) -> Result<Event> {
        self.env
            .inventory
            .load_event(event_id)
            .await?
            .ok_or(TicketingError::EventNotFound(event_id))
    }

    /// Organizer maintenance that never touches `quantity` or `sold`.
    async fn maintain<F>(
        &self,
        principal: &Principal,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
        change: F,
    ) -> Result<TicketType>
    where
        F: Fn(&mut TicketType) + Sync,
    {
        let event = self.load_event(event_id).await?;
        self.env
            .gate
            .authorize(principal, GuardedAction::ManageInventory, Some(&event))?;

        let key = ticket_type_key(event_id, ticket_type_id);
        let env = &self.env;
        let change = &change;
        retry_on_conflict(&env.retry, &key, move || async move {
            let current = env
                .inventory
                .load_ticket_type(event_id, ticket_type_id)
                .await?
                .ok_or(LedgerRejection::NotFound {
                    event_id,
                    ticket_type_id,
                })?;
            let mut ticket_type = current.value;
            change(&mut ticket_type);
            env.inventory
                .compare_and_swap_ticket_type(event_id, current.version, ticket_type.clone())
                .await?;
            Ok::<_, TicketingError>(ticket_type)
        })
        .await
    }
}
