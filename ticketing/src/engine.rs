//! The engine facade: one handle wiring every component to shared collaborators.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = TicketingEngine::in_memory(Config::default(), Arc::new(SystemClock));
//! let event = engine.register_event(&organizer, event, vec![general_admission]).await?;
//! let outcome = engine.purchase(PurchaseRequest::new(
//!     PurchaseId::generate(), event.id, ga_id, 2, buyer,
//! )).await?;
//! engine.validate(outcome.tickets[0].id, &organizer).await?;
//! ```

use crate::config::Config;
use crate::directory::{IdentityDirectory, InMemoryDirectory};
use crate::environment::TicketingEnvironment;
use crate::error::Result;
use crate::gate::{AccessPolicy, RoleAccessPolicy};
use crate::ledger::InventoryLedger;
use crate::lifecycle::load_ticket;
use crate::notify::{NoopResalePublisher, NoopTokenBridge, ResalePublisher, TokenBridge};
use crate::purchase::{PurchaseOrchestrator, PurchaseOutcome, PurchaseRecord, PurchaseRequest};
use crate::resale::ResaleManager;
use crate::revocation::RevocationManager;
use crate::store::{
    InMemoryInventoryStore, InMemoryPurchaseLog, InMemoryTicketStore, InventoryStore, PurchaseLog, TicketStore,
};
use crate::transfer::TransferManager;
use crate::types::{
    Event, EventId, IdentityId, Money, Principal, PurchaseId, Recipient, Ticket, TicketId, TicketType, TicketTypeId,
};
use crate::validation::ValidationEngine;
use std::sync::Arc;
use ticketing_core::{Clock, SystemClock};

/// Ticket inventory and lifecycle engine.
#[derive(Clone)]
pub struct TicketingEngine {
    env: TicketingEnvironment,
    ledger: InventoryLedger,
    purchases: PurchaseOrchestrator,
    transfers: TransferManager,
    resale: ResaleManager,
    validation: ValidationEngine,
    revocation: RevocationManager,
}

impl TicketingEngine {
    /// Start configuring an engine.
    #[must_use]
    pub fn builder() -> TicketingEngineBuilder {
        TicketingEngineBuilder::default()
    }

    /// An engine on in-memory storage with the default gate and no-op side effects.
    #[must_use]
    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self::builder().config(config).clock(clock).build()
    }

    fn from_env(env: TicketingEnvironment) -> Self {
        let ledger = InventoryLedger::new(env.clone());
        Self {
            purchases: PurchaseOrchestrator::new(env.clone(), ledger.clone()),
            transfers: TransferManager::new(env.clone()),
            resale: ResaleManager::new(env.clone()),
            validation: ValidationEngine::new(env.clone()),
            revocation: RevocationManager::new(env.clone()),
            ledger,
            env,
        }
    }

    /// The inventory ledger, for its read-only and gated maintenance operations
    #[must_use]
    pub const fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.env.config
    }

    // ------------------------------------------------------------------
    // Inventory
    // ------------------------------------------------------------------

    /// See [`InventoryLedger::register_event`].
    ///
    /// # Errors
    ///
    /// `Unauthorized` or a fatal storage error.
    pub async fn register_event(
        &self,
        principal: &Principal,
        event: Event,
        ticket_types: Vec<TicketType>,
    ) -> Result<Event> {
        self.ledger.register_event(principal, event, ticket_types).await
    }

    /// See [`InventoryLedger::set_active`].
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
        self.ledger.set_active(principal, event_id, ticket_type_id, active).await
    }

    /// See [`InventoryLedger::reprice`].
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
        self.ledger.reprice(principal, event_id, ticket_type_id, price).await
    }

    /// See [`InventoryLedger::availability`].
    ///
    /// # Errors
    ///
    /// `EventNotFound` or a fatal storage error.
    pub async fn availability(&self, event_id: EventId) -> Result<Vec<TicketType>> {
        self.ledger.availability(event_id).await
    }

    // ------------------------------------------------------------------
    // Purchases
    // ------------------------------------------------------------------

    /// See [`PurchaseOrchestrator::purchase`].
    ///
    /// # Errors
    ///
    /// Request validation, ledger, idempotency or fatal storage errors.
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseOutcome> {
        self.purchases.purchase(request).await
    }

    /// See [`PurchaseOrchestrator::void_unissued`].
    ///
    /// # Errors
    ///
    /// `PurchaseNotFound`, `Unauthorized`, `PurchaseInProgress` or a fatal storage error.
    pub async fn void_unissued(&self, principal: &Principal, purchase_id: &PurchaseId) -> Result<Vec<Ticket>> {
        self.purchases.void_unissued(principal, purchase_id).await
    }

    /// The idempotency record for a purchase id, if any.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the log cannot be read.
    pub async fn purchase_record(&self, purchase_id: &PurchaseId) -> Result<Option<PurchaseRecord>> {
        self.purchases.record(purchase_id).await
    }

    // ------------------------------------------------------------------
    // Ticket lifecycle
    // ------------------------------------------------------------------

    /// See [`TransferManager::transfer`].
    ///
    /// # Errors
    ///
    /// Ownership, status, recipient or fatal storage errors.
    pub async fn transfer(&self, ticket_id: TicketId, caller: &Principal, recipient: &Recipient) -> Result<Ticket> {
        self.transfers.transfer(ticket_id, caller, recipient).await
    }

    /// See [`ResaleManager::list`].
    ///
    /// # Errors
    ///
    /// Ownership, status, price or fatal storage errors.
    pub async fn list_for_resale(&self, ticket_id: TicketId, caller: &Principal, price: Money) -> Result<Ticket> {
        self.resale.list(ticket_id, caller, price).await
    }

    /// See [`ResaleManager::cancel_listing`].
    ///
    /// # Errors
    ///
    /// Ownership, status or fatal storage errors.
    pub async fn cancel_listing(&self, ticket_id: TicketId, caller: &Principal) -> Result<Ticket> {
        self.resale.cancel_listing(ticket_id, caller).await
    }

    /// See [`ResaleManager::purchase`].
    ///
    /// # Errors
    ///
    /// `NotListed`, `AlreadySold`, `SameOwner`, status or fatal storage errors.
    pub async fn purchase_resale(&self, ticket_id: TicketId, buyer: &Principal) -> Result<Ticket> {
        self.resale.purchase(ticket_id, buyer).await
    }

    /// See [`ValidationEngine::validate`].
    ///
    /// # Errors
    ///
    /// `AlreadyUsed`, `TicketNotActive`, `Unauthorized` or fatal storage errors.
    pub async fn validate(&self, ticket_id: TicketId, validator: &Principal) -> Result<Ticket> {
        self.validation.validate(ticket_id, validator).await
    }

    /// See [`RevocationManager::void`].
    ///
    /// # Errors
    ///
    /// `TicketNotActive`, `Unauthorized` or fatal storage errors.
    pub async fn void(&self, ticket_id: TicketId, principal: &Principal, reason: impl Into<String>) -> Result<Ticket> {
        self.revocation.void(ticket_id, principal, reason).await
    }

    /// See [`RevocationManager::refund`].
    ///
    /// # Errors
    ///
    /// `TicketNotActive`, `Unauthorized` or fatal storage errors.
    pub async fn refund(&self, ticket_id: TicketId, principal: &Principal, reason: impl Into<String>) -> Result<Ticket> {
        self.revocation.refund(ticket_id, principal, reason).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Load one ticket.
    ///
    /// # Errors
    ///
    /// `TicketNotFound` or a fatal storage error.
    pub async fn ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        load_ticket(self.env.tickets.as_ref(), ticket_id).await
    }

    /// Tickets currently held by `owner`.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the store cannot be read.
    pub async fn tickets_owned_by(&self, owner: IdentityId) -> Result<Vec<Ticket>> {
        Ok(self.env.tickets.owned_by(owner).await?)
    }

    /// Every ticket issued for an event, including terminal ones.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the store cannot be read.
    pub async fn tickets_for_event(&self, event_id: EventId) -> Result<Vec<Ticket>> {
        Ok(self.env.tickets.for_event(event_id).await?)
    }
}

/// Builder for [`TicketingEngine`]. Anything left unset gets an in-memory or
/// no-op default.
#[derive(Default)]
pub struct TicketingEngineBuilder {
    inventory: Option<Arc<dyn InventoryStore>>,
    tickets: Option<Arc<dyn TicketStore>>,
    purchases: Option<Arc<dyn PurchaseLog>>,
    gate: Option<Arc<dyn AccessPolicy>>,
    directory: Option<Arc<dyn IdentityDirectory>>,
    publisher: Option<Arc<dyn ResalePublisher>>,
    bridge: Option<Arc<dyn TokenBridge>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<Config>,
}

impl TicketingEngineBuilder {
    /// Use a custom inventory store
    #[must_use]
    pub fn inventory_store(mut self, store: Arc<dyn InventoryStore>) -> Self {
        self.inventory = Some(store);
        self
    }

    /// Use a custom ticket store
    #[must_use]
    pub fn ticket_store(mut self, store: Arc<dyn TicketStore>) -> Self {
        self.tickets = Some(store);
        self
    }

    /// Use a custom purchase log
    #[must_use]
    pub fn purchase_log(mut self, log: Arc<dyn PurchaseLog>) -> Self {
        self.purchases = Some(log);
        self
    }

    /// Use a custom access policy
    #[must_use]
    pub fn access_policy(mut self, gate: Arc<dyn AccessPolicy>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Use a custom identity directory
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Publish resale notifications through `publisher`
    #[must_use]
    pub fn resale_publisher(mut self, publisher: Arc<dyn ResalePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Mirror ownership changes through `bridge`
    #[must_use]
    pub fn token_bridge(mut self, bridge: Arc<dyn TokenBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Use a custom clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom configuration
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> TicketingEngine {
        let config = self.config.unwrap_or_default();
        let retry = config.retry_policy();
        TicketingEngine::from_env(TicketingEnvironment {
            inventory: self
                .inventory
                .unwrap_or_else(|| Arc::new(InMemoryInventoryStore::new())),
            tickets: self.tickets.unwrap_or_else(|| Arc::new(InMemoryTicketStore::new())),
            purchases: self.purchases.unwrap_or_else(|| Arc::new(InMemoryPurchaseLog::new())),
            gate: self.gate.unwrap_or_else(|| Arc::new(RoleAccessPolicy)),
            directory: self.directory.unwrap_or_else(|| Arc::new(InMemoryDirectory::new())),
            publisher: self.publisher.unwrap_or_else(|| Arc::new(NoopResalePublisher)),
            bridge: self.bridge.unwrap_or_else(|| Arc::new(NoopTokenBridge)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config,
            retry,
        })
    }
}
