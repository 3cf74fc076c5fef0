//! In-memory storage backends.
//!
//! Each store keeps its tables behind a single `RwLock`. Version checks and writes
//! happen while the write lock is held, so every compare-and-swap is atomic with
//! respect to every other operation on the same store. Clones share state.

use super::{
    InventoryStore, PurchaseLog, StoreFuture, TicketStore, purchase_key, ticket_key, ticket_type_key,
};
use crate::ledger::Reservation;
use crate::purchase::PurchaseRecord;
use crate::types::{Event, EventId, IdentityId, PurchaseId, Ticket, TicketId, TicketType, TicketTypeId};
use futures::future;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use ticketing_core::{StoreError, Version, Versioned};

fn read_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable(format!("{what} lock poisoned during read")))
}

fn write_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable(format!("{what} lock poisoned during write")))
}

/// Replace `slot` if it is still at `expected`, returning the new version.
fn swap_versioned<T>(
    slot: &mut Versioned<T>,
    key: String,
    expected: Version,
    updated: T,
) -> Result<Version, StoreError> {
    if slot.version != expected {
        return Err(StoreError::ConcurrencyConflict {
            key,
            expected,
            actual: slot.version,
        });
    }
    slot.version = slot.version.next();
    slot.value = updated;
    Ok(slot.version)
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Debug, Default)]
struct InventoryTables {
    events: HashMap<EventId, Event>,
    ticket_types: HashMap<(EventId, TicketTypeId), Versioned<TicketType>>,
    reservations: HashMap<PurchaseId, Reservation>,
}

/// `HashMap` backed [`InventoryStore`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    tables: Arc<RwLock<InventoryTables>>,
}

impl InMemoryInventoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_event_sync(&self, event: Event, ticket_types: Vec<TicketType>) -> Result<(), StoreError> {
        let mut tables = write_lock(&self.tables, "inventory")?;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::AlreadyExists(format!("event/{}", event.id)));
        }
        for ticket_type in ticket_types {
            tables
                .ticket_types
                .insert((event.id, ticket_type.id), Versioned::new(ticket_type, Version::initial()));
        }
        tables.events.insert(event.id, event);
        Ok(())
    }

    fn load_ticket_types_sync(&self, event_id: EventId) -> Result<Vec<Versioned<TicketType>>, StoreError> {
        let tables = read_lock(&self.tables, "inventory")?;
        let Some(event) = tables.events.get(&event_id) else {
            return Ok(Vec::new());
        };
        event
            .ticket_types
            .iter()
            .map(|ticket_type_id| {
                tables
                    .ticket_types
                    .get(&(event_id, *ticket_type_id))
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::Corrupted(format!(
                            "event {event_id} lists missing {}",
                            ticket_type_key(event_id, *ticket_type_id)
                        ))
                    })
            })
            .collect()
    }

    fn swap_ticket_type_sync(
        &self,
        event_id: EventId,
        expected: Version,
        updated: TicketType,
    ) -> Result<Version, StoreError> {
        let key = ticket_type_key(event_id, updated.id);
        let mut tables = write_lock(&self.tables, "inventory")?;
        let slot = tables
            .ticket_types
            .get_mut(&(event_id, updated.id))
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        swap_versioned(slot, key, expected, updated)
    }

    fn reserve_ticket_type_sync(
        &self,
        event_id: EventId,
        expected: Version,
        updated: TicketType,
        purchase_id: PurchaseId,
        reservation: Reservation,
    ) -> Result<Version, StoreError> {
        let key = ticket_type_key(event_id, updated.id);
        let mut tables = write_lock(&self.tables, "inventory")?;
        let InventoryTables {
            ticket_types,
            reservations,
            ..
        } = &mut *tables;

        if reservations.contains_key(&purchase_id) {
            return Err(StoreError::AlreadyExists(format!("reservation/{purchase_id}")));
        }
        let slot = ticket_types
            .get_mut(&(event_id, updated.id))
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let version = swap_versioned(slot, key, expected, updated)?;
        reservations.insert(purchase_id, reservation);
        Ok(version)
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_event(&self, event: Event, ticket_types: Vec<TicketType>) -> StoreFuture<'_, ()> {
        Box::pin(future::ready(self.insert_event_sync(event, ticket_types)))
    }

    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        let result = read_lock(&self.tables, "inventory").map(|tables| tables.events.get(&event_id).cloned());
        Box::pin(future::ready(result))
    }

    fn load_ticket_type(
        &self,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
    ) -> StoreFuture<'_, Option<Versioned<TicketType>>> {
        let result = read_lock(&self.tables, "inventory")
            .map(|tables| tables.ticket_types.get(&(event_id, ticket_type_id)).cloned());
        Box::pin(future::ready(result))
    }

    fn load_ticket_types(&self, event_id: EventId) -> StoreFuture<'_, Vec<Versioned<TicketType>>> {
        Box::pin(future::ready(self.load_ticket_types_sync(event_id)))
    }

    fn compare_and_swap_ticket_type(
        &self,
        event_id: EventId,
        expected: Version,
        updated: TicketType,
    ) -> StoreFuture<'_, Version> {
        Box::pin(future::ready(self.swap_ticket_type_sync(event_id, expected, updated)))
    }

    fn reserve_ticket_type(
        &self,
        event_id: EventId,
        expected: Version,
        updated: TicketType,
        purchase_id: PurchaseId,
        reservation: Reservation,
    ) -> StoreFuture<'_, Version> {
        Box::pin(future::ready(self.reserve_ticket_type_sync(
            event_id,
            expected,
            updated,
            purchase_id,
            reservation,
        )))
    }

    fn load_reservation(&self, purchase_id: &PurchaseId) -> StoreFuture<'_, Option<Reservation>> {
        let result =
            read_lock(&self.tables, "inventory").map(|tables| tables.reservations.get(purchase_id).cloned());
        Box::pin(future::ready(result))
    }
}

// ============================================================================
// Tickets
// ============================================================================

#[derive(Debug, Default)]
struct TicketTables {
    tickets: HashMap<TicketId, Versioned<Ticket>>,
    by_owner: HashMap<IdentityId, Vec<TicketId>>,
    by_event: HashMap<EventId, Vec<TicketId>>,
}

impl TicketTables {
    fn collect(&self, ids: Option<&Vec<TicketId>>) -> Vec<Ticket> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.tickets.get(id))
                .map(|record| record.value.clone())
                .collect()
        })
        .unwrap_or_default()
    }
}

/// `HashMap` backed [`TicketStore`] with owner and event indexes.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    tables: Arc<RwLock<TicketTables>>,
}

impl InMemoryTicketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(read_lock(&self.tables, "tickets")?.tickets.len())
    }

    /// Check if the store is empty
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn insert_sync(&self, ticket: Ticket) -> Result<Version, StoreError> {
        let mut tables = write_lock(&self.tables, "tickets")?;
        if tables.tickets.contains_key(&ticket.id) {
            return Err(StoreError::AlreadyExists(ticket_key(ticket.id)));
        }
        tables.by_owner.entry(ticket.owner).or_default().push(ticket.id);
        tables.by_event.entry(ticket.event_id).or_default().push(ticket.id);
        tables.tickets.insert(ticket.id, Versioned::new(ticket, Version::initial()));
        Ok(Version::initial())
    }

    fn swap_sync(&self, expected: Version, ticket: Ticket) -> Result<Version, StoreError> {
        let key = ticket_key(ticket.id);
        let mut tables = write_lock(&self.tables, "tickets")?;
        let TicketTables {
            tickets, by_owner, ..
        } = &mut *tables;

        let slot = tickets
            .get_mut(&ticket.id)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let previous_owner = slot.value.owner;
        let ticket_id = ticket.id;
        let new_owner = ticket.owner;

        let version = swap_versioned(slot, key, expected, ticket)?;

        if previous_owner != new_owner {
            if let Some(held) = by_owner.get_mut(&previous_owner) {
                held.retain(|id| *id != ticket_id);
            }
            by_owner.entry(new_owner).or_default().push(ticket_id);
        }
        Ok(version)
    }
}

impl TicketStore for InMemoryTicketStore {
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Version> {
        Box::pin(future::ready(self.insert_sync(ticket)))
    }

    fn load(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Versioned<Ticket>>> {
        let result = read_lock(&self.tables, "tickets").map(|tables| tables.tickets.get(&ticket_id).cloned());
        Box::pin(future::ready(result))
    }

    fn compare_and_swap(&self, expected: Version, ticket: Ticket) -> StoreFuture<'_, Version> {
        Box::pin(future::ready(self.swap_sync(expected, ticket)))
    }

    fn owned_by(&self, owner: IdentityId) -> StoreFuture<'_, Vec<Ticket>> {
        let result = read_lock(&self.tables, "tickets").map(|tables| tables.collect(tables.by_owner.get(&owner)));
        Box::pin(future::ready(result))
    }

    fn for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>> {
        let result =
            read_lock(&self.tables, "tickets").map(|tables| tables.collect(tables.by_event.get(&event_id)));
        Box::pin(future::ready(result))
    }
}

// ============================================================================
// Purchases
// ============================================================================

/// `HashMap` backed [`PurchaseLog`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryPurchaseLog {
    records: Arc<RwLock<HashMap<PurchaseId, Versioned<PurchaseRecord>>>>,
}

impl InMemoryPurchaseLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_sync(&self, record: PurchaseRecord) -> Result<Version, StoreError> {
        let mut records = write_lock(&self.records, "purchases")?;
        if records.contains_key(&record.purchase_id) {
            return Err(StoreError::AlreadyExists(purchase_key(&record.purchase_id)));
        }
        records.insert(record.purchase_id.clone(), Versioned::new(record, Version::initial()));
        Ok(Version::initial())
    }

    fn swap_sync(&self, expected: Version, record: PurchaseRecord) -> Result<Version, StoreError> {
        let key = purchase_key(&record.purchase_id);
        let mut records = write_lock(&self.records, "purchases")?;
        let slot = records
            .get_mut(&record.purchase_id)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        swap_versioned(slot, key, expected, record)
    }
}

impl PurchaseLog for InMemoryPurchaseLog {
    fn insert(&self, record: PurchaseRecord) -> StoreFuture<'_, Version> {
        Box::pin(future::ready(self.insert_sync(record)))
    }

    fn load(&self, purchase_id: &PurchaseId) -> StoreFuture<'_, Option<Versioned<PurchaseRecord>>> {
        let result = read_lock(&self.records, "purchases").map(|records| records.get(purchase_id).cloned());
        Box::pin(future::ready(result))
    }

    fn compare_and_swap(&self, expected: Version, record: PurchaseRecord) -> StoreFuture<'_, Version> {
        Box::pin(future::ready(self.swap_sync(expected, record)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::{Attendee, Currency, Money, PurchaseId, TicketStatus};
    use chrono::Utc;

    fn ticket(owner: IdentityId) -> Ticket {
        let tier = TicketType::new("GA", Money::from_minor(1000), Currency::usd(), 10);
        Ticket {
            id: TicketId::new(),
            event_id: EventId::new(),
            purchase_id: PurchaseId::new("p-1"),
            ticket_type: tier.snapshot(),
            owner,
            attendee: Attendee::new("Ada", None),
            status: TicketStatus::Active,
            is_transferable: true,
            transfer_history: Vec::new(),
            listing: None,
            issued_at: Utc::now(),
            used_at: None,
            verified_by: None,
            revocation: None,
        }
    }

    #[tokio::test]
    async fn ticket_swap_rejects_stale_version() {
        let store = InMemoryTicketStore::new();
        let original = ticket(IdentityId::new());
        let ticket_id = original.id;
        store.insert(original.clone()).await.unwrap();

        let mut first = original.clone();
        first.status = TicketStatus::Used;
        let v2 = store.compare_and_swap(Version::initial(), first).await.unwrap();
        assert_eq!(v2, Version::new(2));

        let mut second = original;
        second.status = TicketStatus::Void;
        let error = store.compare_and_swap(Version::initial(), second).await.unwrap_err();
        assert!(error.is_conflict());

        let stored = store.load(ticket_id).await.unwrap().unwrap();
        assert_eq!(stored.value.status, TicketStatus::Used);
        assert_eq!(stored.version, v2);
    }

    #[tokio::test]
    async fn owner_index_follows_ownership() {
        let store = InMemoryTicketStore::new();
        let alice = IdentityId::new();
        let bob = IdentityId::new();
        let original = ticket(alice);
        store.insert(original.clone()).await.unwrap();

        let mut moved = original;
        moved.owner = bob;
        store.compare_and_swap(Version::initial(), moved).await.unwrap();

        assert!(store.owned_by(alice).await.unwrap().is_empty());
        assert_eq!(store.owned_by(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ticket_insert_is_rejected() {
        let store = InMemoryTicketStore::new();
        let original = ticket(IdentityId::new());
        store.insert(original.clone()).await.unwrap();
        let error = store.insert(original).await.unwrap_err();
        assert!(matches!(error, StoreError::AlreadyExists(_)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn ticket_types_load_in_display_order() {
        let store = InMemoryInventoryStore::new();
        let vip = TicketType::new("VIP", Money::from_minor(5000), Currency::usd(), 5);
        let ga = TicketType::new("GA", Money::from_minor(1000), Currency::usd(), 50);
        let mut event = crate::types::Event::new("Show", IdentityId::new());
        event.ticket_types = vec![vip.id, ga.id];
        let event_id = event.id;
        store.insert_event(event, vec![ga, vip]).await.unwrap();

        let names: Vec<_> = store
            .load_ticket_types(event_id)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.value.name)
            .collect();
        assert_eq!(names, vec!["VIP", "GA"]);
    }
    #[tokio::test]
    async fn reservation_is_recorded_with_the_counter() {
        let store = InMemoryInventoryStore::new();
        let ga = TicketType::new("GA", Money::from_minor(1000), Currency::usd(), 10);
        let mut event = crate::types::Event::new("Show", IdentityId::new());
        event.ticket_types = vec![ga.id];
        let event_id = event.id;
        store.insert_event(event, vec![ga.clone()]).await.unwrap();

        let mut taken = ga.clone();
        taken.sold = 2;
        let reservation = Reservation {
            snapshot: taken.snapshot(),
            quantity: 2,
            sold_after: 2,
            transferable: true,
        };
        let order = PurchaseId::new("order-1");

        // A stale swap leaves no trace
        let stale = store
            .reserve_ticket_type(event_id, Version::new(9), taken.clone(), order.clone(), reservation.clone())
            .await
            .unwrap_err();
        assert!(stale.is_conflict());
        assert_eq!(store.load_reservation(&order).await.unwrap(), None);

        store
            .reserve_ticket_type(event_id, Version::initial(), taken.clone(), order.clone(), reservation.clone())
            .await
            .unwrap();
        assert_eq!(store.load_reservation(&order).await.unwrap(), Some(reservation.clone()));

        let twice = store
            .reserve_ticket_type(event_id, Version::new(2), taken, order, reservation)
            .await
            .unwrap_err();
        assert!(matches!(twice, StoreError::AlreadyExists(_)));
        let stored = store.load_ticket_type(event_id, ga.id).await.unwrap().unwrap();
        assert_eq!(stored.value.sold, 2);
        assert_eq!(stored.version, Version::new(2));
    }
}
