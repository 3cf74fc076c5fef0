//! Shared harness for the engine integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use futures::future;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use ticketing::store::{InMemoryPurchaseLog, InMemoryTicketStore, PurchaseLog, StoreFuture, TicketStore};
use ticketing::{
    Config, Currency, Event, EventId, IdentityId, InMemoryDirectory, InMemoryResalePublisher, Money, Principal,
    PurchaseId, PurchaseRecord, PurchaseRequest, Ticket, TicketId, TicketType, TicketTypeId, TicketingEngine,
};
use ticketing_core::{Clock, StoreError, Version, Versioned};
use ticketing_testing::{init_test_tracing, test_clock};
use tokio::sync::Semaphore;

/// Engine plus handles on the collaborators tests inspect.
pub struct Harness {
    pub engine: TicketingEngine,
    pub directory: InMemoryDirectory,
    pub publisher: InMemoryResalePublisher,
    pub organizer: Principal,
    pub admin: Principal,
}

/// Config with a retry budget large enough for heavy contention.
pub fn test_config() -> Config {
    Config::default().with_max_retries(10_000)
}

pub fn harness() -> Harness {
    harness_with(test_config(), Arc::new(test_clock()), None)
}

pub fn harness_with(config: Config, clock: Arc<dyn Clock>, tickets: Option<Arc<dyn TicketStore>>) -> Harness {
    build_harness(config, clock, tickets, None)
}

pub fn harness_with_purchase_log(config: Config, purchases: Arc<dyn PurchaseLog>) -> Harness {
    build_harness(config, Arc::new(test_clock()), None, Some(purchases))
}

fn build_harness(
    config: Config,
    clock: Arc<dyn Clock>,
    tickets: Option<Arc<dyn TicketStore>>,
    purchases: Option<Arc<dyn PurchaseLog>>,
) -> Harness {
    init_test_tracing();
    let directory = InMemoryDirectory::new();
    let publisher = InMemoryResalePublisher::default();
    let mut builder = TicketingEngine::builder()
        .config(config)
        .clock(clock)
        .directory(Arc::new(directory.clone()))
        .resale_publisher(Arc::new(publisher.clone()));
    if let Some(tickets) = tickets {
        builder = builder.ticket_store(tickets);
    }
    if let Some(purchases) = purchases {
        builder = builder.purchase_log(purchases);
    }
    Harness {
        engine: builder.build(),
        directory,
        publisher,
        organizer: Principal::organizer(IdentityId::new()),
        admin: Principal::admin(IdentityId::new()),
    }
}

impl Harness {
    /// Register an event with one ticket type and return both ids.
    pub async fn event_with(&self, ticket_type: TicketType) -> (EventId, TicketTypeId) {
        let ticket_type_id = ticket_type.id;
        let event = self
            .engine
            .register_event(
                &self.organizer,
                Event::new("Test Show", self.organizer.identity),
                vec![ticket_type],
            )
            .await
            .unwrap();
        (event.id, ticket_type_id)
    }

    /// Register an event with a general admission type priced at 10.00.
    pub async fn event(&self, capacity: u32) -> (EventId, TicketTypeId) {
        self.event_with(general_admission(capacity)).await
    }

    /// A buyer known to the directory.
    pub fn buyer(&self, name: &str) -> Principal {
        let identity = IdentityId::new();
        let email = format!("{}@example.com", name.to_lowercase());
        self.directory.register(identity, name, Some(email.as_str())).unwrap();
        Principal::buyer(identity)
    }

    /// Buy `quantity` tickets with a fresh purchase id.
    pub async fn buy(&self, buyer: &Principal, event: (EventId, TicketTypeId), quantity: u32) -> Vec<Ticket> {
        let outcome = self
            .engine
            .purchase(PurchaseRequest::new(
                PurchaseId::generate(),
                event.0,
                event.1,
                quantity,
                *buyer,
            ))
            .await
            .unwrap();
        assert!(outcome.is_complete());
        outcome.tickets
    }

    /// Buy a single ticket.
    pub async fn buy_one(&self, buyer: &Principal) -> Ticket {
        let event = self.event(10).await;
        self.buy(buyer, event, 1).await.remove(0)
    }

    /// Current sold counter of a ticket type.
    pub async fn sold(&self, event: (EventId, TicketTypeId)) -> u32 {
        self.engine
            .availability(event.0)
            .await
            .unwrap()
            .into_iter()
            .find(|ticket_type| ticket_type.id == event.1)
            .unwrap()
            .sold
    }
}

pub fn general_admission(capacity: u32) -> TicketType {
    TicketType::new("General Admission", Money::from_minor(1000), Currency::usd(), capacity)
}

/// Ticket store whose inserts fail on demand.
///
/// `fail_insert_calls` holds 1-based insert call numbers that return
/// `Unavailable` instead of writing.
#[derive(Clone, Default)]
pub struct FlakyTicketStore {
    inner: InMemoryTicketStore,
    insert_calls: Arc<AtomicUsize>,
    fail_insert_calls: Arc<Mutex<HashSet<usize>>>,
}

impl FlakyTicketStore {
    pub fn failing_inserts(calls: impl IntoIterator<Item = usize>) -> Self {
        let store = Self::default();
        store.fail_insert_calls.lock().unwrap().extend(calls);
        store
    }

    pub fn heal(&self) {
        self.fail_insert_calls.lock().unwrap().clear();
    }
}

impl TicketStore for FlakyTicketStore {
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Version> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_insert_calls.lock().unwrap().contains(&call) {
            return Box::pin(future::ready(Err(StoreError::Unavailable(format!(
                "injected failure on insert {call}"
            )))));
        }
        self.inner.insert(ticket)
    }

    fn load(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Versioned<Ticket>>> {
        self.inner.load(ticket_id)
    }

    fn compare_and_swap(&self, expected: Version, ticket: Ticket) -> StoreFuture<'_, Version> {
        self.inner.compare_and_swap(expected, ticket)
    }

    fn owned_by(&self, owner: IdentityId) -> StoreFuture<'_, Vec<Ticket>> {
        self.inner.owned_by(owner)
    }

    fn for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>> {
        self.inner.for_event(event_id)
    }
}

/// Ticket store whose inserts wait until the test opens the gate.
#[derive(Clone)]
pub struct GatedTicketStore {
    inner: InMemoryTicketStore,
    gate: Arc<Semaphore>,
}

impl GatedTicketStore {
    pub fn closed() -> Self {
        Self {
            inner: InMemoryTicketStore::new(),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1_000);
    }
}

impl TicketStore for GatedTicketStore {
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| StoreError::Unavailable("ticket gate closed".to_string()))?;
            self.inner.insert(ticket).await
        })
    }

    fn load(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Versioned<Ticket>>> {
        self.inner.load(ticket_id)
    }

    fn compare_and_swap(&self, expected: Version, ticket: Ticket) -> StoreFuture<'_, Version> {
        self.inner.compare_and_swap(expected, ticket)
    }

    fn owned_by(&self, owner: IdentityId) -> StoreFuture<'_, Vec<Ticket>> {
        self.inner.owned_by(owner)
    }

    fn for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>> {
        self.inner.for_event(event_id)
    }
}

/// Purchase log whose record updates fail with `Unavailable`.
///
/// The next `remaining_failures` calls to `compare_and_swap` fail; claims and
/// reads always go through.
#[derive(Clone, Default)]
pub struct FlakyPurchaseLog {
    inner: InMemoryPurchaseLog,
    remaining_failures: Arc<AtomicUsize>,
    failed_swaps: Arc<AtomicUsize>,
}

impl FlakyPurchaseLog {
    pub fn failing_swaps(count: usize) -> Self {
        let log = Self::default();
        log.remaining_failures.store(count, Ordering::SeqCst);
        log
    }

    /// Fail every update until [`heal`](Self::heal) is called.
    pub fn down() -> Self {
        Self::failing_swaps(usize::MAX)
    }

    pub fn heal(&self) {
        self.remaining_failures.store(0, Ordering::SeqCst);
    }

    pub fn failed_swaps(&self) -> usize {
        self.failed_swaps.load(Ordering::SeqCst)
    }
}

impl PurchaseLog for FlakyPurchaseLog {
    fn insert(&self, record: PurchaseRecord) -> StoreFuture<'_, Version> {
        self.inner.insert(record)
    }

    fn load(&self, purchase_id: &PurchaseId) -> StoreFuture<'_, Option<Versioned<PurchaseRecord>>> {
        self.inner.load(purchase_id)
    }

    fn compare_and_swap(&self, expected: Version, record: PurchaseRecord) -> StoreFuture<'_, Version> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            self.failed_swaps.fetch_add(1, Ordering::SeqCst);
            return Box::pin(future::ready(Err(StoreError::Unavailable(
                "injected purchase log outage".to_string(),
            ))));
        }
        self.inner.compare_and_swap(expected, record)
    }
}
