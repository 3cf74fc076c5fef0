//! Purchase orchestrator: reserve inventory, then issue one ticket per unit.
//!
//! # Idempotency
//!
//! Every purchase carries a caller-chosen [`PurchaseId`]. The id is claimed in the
//! [`PurchaseLog`](crate::store::PurchaseLog) before inventory is touched, and the
//! record then moves through
//!
//! ```text
//! Claimed ──► Reserved ──► Completed
//!    │            └──────► Voided     (owed units written off)
//!    └──► Rejected ──► Claimed        (the ledger refused; a replay may try again)
//! ```
//!
//! The claim already fixes the ticket id and attendee of every unit, so a replay
//! resumes issuance exactly where a failed or abandoned call stopped and never
//! reserves a second time.
//!
//! # Recovery
//!
//! The ledger stores each reservation under its purchase id in the same write
//! that raises `sold`. A `Claimed` record whose purchase id already holds a
//! reservation lost its `Reserved` write; a replay or
//! [`PurchaseOrchestrator::void_unissued`] promotes it from the stored
//! reservation instead of reporting the purchase as in progress.
//!
//! # Cancellation
//!
//! The reserve-and-issue body runs on a detached tokio task. Dropping the future
//! returned by [`PurchaseOrchestrator::purchase`] abandons the wait, not the work.

use crate::environment::TicketingEnvironment;
use crate::error::{LedgerRejection, Result, TicketingError};
use crate::gate::GuardedAction;
use crate::ledger::{InventoryLedger, Reservation};
use crate::metrics;
use crate::store::{purchase_key, ticket_key};
use crate::types::{
    Attendee, EventId, IdentityId, PriceSnapshot, Principal, PurchaseId, Revocation, Ticket, TicketId, TicketStatus,
    TicketTypeId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ticketing_core::{StoreError, Versioned, retry_through_outages};
use tracing::{debug, error, info, warn};

/// Reason recorded on units written off by [`PurchaseOrchestrator::void_unissued`].
pub const UNISSUED_REASON: &str = "purchase abandoned before issuance";

/// Progress of a purchase attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseState {
    /// Id claimed, inventory not yet reserved
    Claimed,
    /// The ledger refused the reservation
    Rejected,
    /// Inventory reserved, tickets (possibly partially) issued
    Reserved,
    /// Every unit issued
    Completed,
    /// Owed units written off as cancelled tickets
    Voided,
}

/// Idempotency record for one purchase id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Idempotency key
    pub purchase_id: PurchaseId,
    /// Requested event
    pub event_id: EventId,
    /// Requested ticket type
    pub ticket_type_id: TicketTypeId,
    /// Requested units
    pub quantity: u32,
    /// Buyer identity
    pub buyer: IdentityId,
    /// Attendee overrides exactly as requested
    pub requested_attendees: Vec<Attendee>,
    /// Current progress
    pub state: PurchaseState,
    /// Price snapshot from the reservation
    pub snapshot: Option<PriceSnapshot>,
    /// Transferability from the reservation
    pub transferable: bool,
    /// Ticket id of every unit, assigned at claim
    pub ticket_ids: Vec<TicketId>,
    /// Attendee of every unit, resolved at claim
    pub attendees: Vec<Attendee>,
    /// When the id was first claimed
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRecord {
    fn claim(request: &PurchaseRequest, attendees: Vec<Attendee>, now: DateTime<Utc>) -> Self {
        Self {
            purchase_id: request.purchase_id.clone(),
            event_id: request.event_id,
            ticket_type_id: request.ticket_type_id,
            quantity: request.quantity,
            buyer: request.buyer.identity,
            requested_attendees: request.attendees.clone(),
            state: PurchaseState::Claimed,
            snapshot: None,
            transferable: true,
            ticket_ids: (0..request.quantity).map(|_| TicketId::new()).collect(),
            attendees,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `request` asks for the same thing this record was claimed for.
    #[must_use]
    pub fn matches(&self, request: &PurchaseRequest) -> bool {
        self.event_id == request.event_id
            && self.ticket_type_id == request.ticket_type_id
            && self.quantity == request.quantity
            && self.buyer == request.buyer.identity
            && self.requested_attendees == request.attendees
    }

    fn unit(&self, index: usize, status: TicketStatus, now: DateTime<Utc>) -> Result<Ticket> {
        let corrupted = || StoreError::Corrupted(format!("{} is missing unit {index}", purchase_key(&self.purchase_id)));
        let snapshot = self.snapshot.clone().ok_or_else(corrupted)?;
        let id = *self.ticket_ids.get(index).ok_or_else(corrupted)?;
        let attendee = self.attendees.get(index).cloned().ok_or_else(corrupted)?;

        let revocation = (status == TicketStatus::Cancelled).then(|| Revocation {
            by: self.buyer,
            at: now,
            reason: UNISSUED_REASON.to_string(),
        });

        Ok(Ticket {
            id,
            event_id: self.event_id,
            purchase_id: self.purchase_id.clone(),
            ticket_type: snapshot,
            owner: self.buyer,
            attendee,
            status,
            is_transferable: self.transferable,
            transfer_history: Vec::new(),
            listing: None,
            issued_at: now,
            used_at: None,
            verified_by: None,
            revocation,
        })
    }
}

/// Request to buy `quantity` tickets of one type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Idempotency key for this logical purchase
    pub purchase_id: PurchaseId,
    /// Event to buy for
    pub event_id: EventId,
    /// Ticket type to buy
    pub ticket_type_id: TicketTypeId,
    /// Units to buy, at least one
    pub quantity: u32,
    /// Paying caller; becomes the owner of every ticket
    pub buyer: Principal,
    /// Either empty (use the buyer's profile) or one attendee per unit
    pub attendees: Vec<Attendee>,
}

impl PurchaseRequest {
    /// A request with no attendee overrides.
    #[must_use]
    pub fn new(
        purchase_id: PurchaseId,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        buyer: Principal,
    ) -> Self {
        Self {
            purchase_id,
            event_id,
            ticket_type_id,
            quantity,
            buyer,
            attendees: Vec::new(),
        }
    }

    /// Name an attendee for each unit.
    #[must_use]
    pub fn with_attendees(mut self, attendees: Vec<Attendee>) -> Self {
        self.attendees = attendees;
        self
    }
}

/// A unit whose ticket could not be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitFailure {
    /// Position of the unit within the purchase
    pub index: usize,
    /// Ticket id reserved for the unit
    pub ticket_id: TicketId,
    /// Why the write failed
    pub error: StoreError,
}

/// Result of a purchase call.
///
/// Inventory is reserved for every unit; `failed_units` lists those still owed.
/// Replaying the same request issues them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseOutcome {
    /// Idempotency key
    pub purchase_id: PurchaseId,
    /// Issued tickets in unit order
    pub tickets: Vec<Ticket>,
    /// Units still owed
    pub failed_units: Vec<UnitFailure>,
    /// True when nothing new was reserved by this call
    pub replayed: bool,
}

impl PurchaseOutcome {
    /// Whether every unit has a ticket.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_units.is_empty()
    }
}

/// Turns reservations into tickets.
#[derive(Clone)]
pub struct PurchaseOrchestrator {
    env: TicketingEnvironment,
    ledger: InventoryLedger,
}

impl PurchaseOrchestrator {
    /// Creates an orchestrator issuing against `ledger`
    #[must_use]
    pub const fn new(env: TicketingEnvironment, ledger: InventoryLedger) -> Self {
        Self { env, ledger }
    }

    /// Reserve inventory and issue tickets, idempotently per `purchase_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity`, `QuantityLimitExceeded`, `AttendeeCountMismatch`: malformed request
    /// - `Ledger(..)`: the ticket type cannot be sold right now
    /// - `IdempotencyMismatch`: the id was used for a different request
    /// - `PurchaseInProgress`: a concurrent call holds the id and has not reserved yet
    /// - `Storage(..)`: fatal storage failure; replaying the request is safe
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseOutcome> {
        self.check_request(&request)?;

        let event = self.ledger.load_event(request.event_id).await.map_err(|error| match error {
            TicketingError::EventNotFound(event_id) => TicketingError::Ledger(LedgerRejection::NotFound {
                event_id,
                ticket_type_id: request.ticket_type_id,
            }),
            other => other,
        })?;
        self.env
            .gate
            .authorize(&request.buyer, GuardedAction::Purchase, Some(&event))?;

        let worker = self.clone();
        let purchase_id = request.purchase_id.clone();
        tokio::spawn(async move { worker.execute(request).await })
            .await
            .map_err(|join_error| {
                error!(%purchase_id, error = %join_error, "Purchase task failed");
                TicketingError::Storage(StoreError::Unavailable(format!(
                    "purchase task for {purchase_id} failed: {join_error}"
                )))
            })?
    }

    /// Write off every unit of a reserved purchase that never got its ticket.
    ///
    /// Each owed unit is stored as a `Cancelled` ticket owned by the buyer; the
    /// sold counter is left as it is. Returns the cancelled tickets, which is
    /// empty when nothing was owed. A `Claimed` purchase whose inventory was
    /// taken but never recorded is promoted to `Reserved` and written off too.
    ///
    /// # Errors
    ///
    /// `PurchaseNotFound`, `EventNotFound`, `Unauthorized`, `PurchaseInProgress`
    /// or a fatal storage error.
    pub async fn void_unissued(&self, principal: &Principal, purchase_id: &PurchaseId) -> Result<Vec<Ticket>> {
        let record = self
            .env
            .purchases
            .load(purchase_id)
            .await?
            .ok_or_else(|| TicketingError::PurchaseNotFound(purchase_id.clone()))?;
        let event = self.ledger.load_event(record.value.event_id).await?;
        self.env
            .gate
            .authorize(principal, GuardedAction::Revoke, Some(&event))?;

        let record = match record.value.state {
            PurchaseState::Reserved => record,
            PurchaseState::Completed | PurchaseState::Voided => return Ok(Vec::new()),
            state @ (PurchaseState::Claimed | PurchaseState::Rejected) => {
                let Some(reservation) = self.ledger.reservation_for(purchase_id).await? else {
                    if state == PurchaseState::Claimed {
                        return Err(TicketingError::PurchaseInProgress(purchase_id.clone()));
                    }
                    return Ok(Vec::new());
                };
                warn!(%purchase_id, "Promoting unrecorded reservation before write-off");
                let promoted = self.record_reservation(purchase_id, &reservation).await?;
                if promoted.value.state != PurchaseState::Reserved {
                    return Ok(Vec::new());
                }
                promoted
            },
        };

        let now = self.env.clock.now();
        let mut cancelled = Vec::new();
        for (index, ticket_id) in record.value.ticket_ids.iter().copied().enumerate() {
            if self.env.tickets.load(ticket_id).await?.is_some() {
                continue;
            }
            let ticket = record.value.unit(index, TicketStatus::Cancelled, now)?;
            match self.env.tickets.insert(ticket.clone()).await {
                Ok(_) => cancelled.push(ticket),
                // Issued concurrently
                Err(StoreError::AlreadyExists(_)) => {},
                Err(error) => return Err(error.into()),
            }
        }

        self.finish(purchase_id, PurchaseState::Voided).await?;

        metrics::record_tickets_cancelled(cancelled.len());
        info!(
            %purchase_id,
            cancelled = cancelled.len(),
            by = %principal.identity,
            "Unissued purchase units written off"
        );
        Ok(cancelled)
    }

    fn check_request(&self, request: &PurchaseRequest) -> Result<()> {
        if request.quantity == 0 {
            return Err(TicketingError::InvalidQuantity);
        }
        let limit = self.env.config.limits.max_tickets_per_purchase;
        if request.quantity > limit {
            return Err(TicketingError::QuantityLimitExceeded {
                requested: request.quantity,
                limit,
            });
        }
        let expected = request.quantity as usize;
        if !request.attendees.is_empty() && request.attendees.len() != expected {
            return Err(TicketingError::AttendeeCountMismatch {
                expected: request.quantity,
                actual: request.attendees.len(),
            });
        }
        Ok(())
    }

    async fn execute(self, request: PurchaseRequest) -> Result<PurchaseOutcome> {
        let purchase_id = &request.purchase_id;
        let attendees = self.attendees_for(&request).await;

        let claim = PurchaseRecord::claim(&request, attendees, self.env.clock.now());
        let claimed = match self.env.purchases.insert(claim.clone()).await {
            Ok(version) => Versioned::new(claim, version),
            Err(StoreError::AlreadyExists(_)) => match self.resume(&request).await? {
                Resume::Reserve(record) => record,
                Resume::Recover(reservation) => {
                    info!(%purchase_id, "Recovering reservation whose record was never saved");
                    let record = self.settle(purchase_id, &reservation, request.quantity).await?;
                    return self.issue(record, true).await;
                },
                Resume::Issue(record) => return self.issue(record, true).await,
                Resume::Done(outcome) => return Ok(outcome),
            },
            Err(error) => return Err(error.into()),
        };

        let reservation = match self
            .ledger
            .reserve(purchase_id, request.event_id, request.ticket_type_id, request.quantity)
            .await
        {
            Ok(reservation) => reservation,
            Err(rejection) => {
                self.mark_rejected(claimed).await;
                return Err(rejection);
            },
        };

        let record = self.settle(purchase_id, &reservation, request.quantity).await?;
        self.issue(record, false).await
    }

    /// Attendee overrides, or the buyer's profile for every unit.
    async fn attendees_for(&self, request: &PurchaseRequest) -> Vec<Attendee> {
        if !request.attendees.is_empty() {
            return request.attendees.clone();
        }
        let profile = self
            .env
            .directory
            .profile(request.buyer.identity)
            .await
            .unwrap_or_else(|error| {
                warn!(
                    purchase_id = %request.purchase_id,
                    %error,
                    "Profile lookup failed, using identity as attendee"
                );
                None
            })
            .unwrap_or_else(|| Attendee::new(request.buyer.identity.to_string(), None));
        vec![profile; request.quantity as usize]
    }

    /// Record a reservation on its purchase, logging loudly if that cannot be done.
    async fn settle(
        &self,
        purchase_id: &PurchaseId,
        reservation: &Reservation,
        quantity: u32,
    ) -> Result<Versioned<PurchaseRecord>> {
        self.record_reservation(purchase_id, reservation)
            .await
            .inspect_err(|error| {
                error!(
                    %purchase_id,
                    quantity,
                    %error,
                    "Inventory reserved but purchase record could not be saved; replay or void to recover"
                );
            })
    }

    /// Move a `Claimed` or `Rejected` record to `Reserved` with the reservation's
    /// price and transferability. A record that is already further along is
    /// returned as stored.
    ///
    /// Runs after inventory is taken, so transient backend failures are retried
    /// along with conflicts.
    async fn record_reservation(
        &self,
        purchase_id: &PurchaseId,
        reservation: &Reservation,
    ) -> Result<Versioned<PurchaseRecord>> {
        let key = purchase_key(purchase_id);
        let env = &self.env;
        retry_through_outages(&env.retry, &key, move || async move {
            let current = env
                .purchases
                .load(purchase_id)
                .await?
                .ok_or_else(|| TicketingError::PurchaseNotFound(purchase_id.clone()))?;
            match current.value.state {
                PurchaseState::Claimed | PurchaseState::Rejected => {},
                PurchaseState::Reserved | PurchaseState::Completed | PurchaseState::Voided => return Ok(current),
            }

            let mut record = current.value;
            record.state = PurchaseState::Reserved;
            record.snapshot = Some(reservation.snapshot.clone());
            record.transferable = reservation.transferable;
            record.updated_at = env.clock.now();
            let version = env.purchases.compare_and_swap(current.version, record.clone()).await?;
            Ok::<_, TicketingError>(Versioned::new(record, version))
        })
        .await
    }

    /// Decide what a repeated purchase id should do.
    async fn resume(&self, request: &PurchaseRequest) -> Result<Resume> {
        let purchase_id = &request.purchase_id;
        let existing = self
            .env
            .purchases
            .load(purchase_id)
            .await?
            .ok_or_else(|| StoreError::Corrupted(format!("{} vanished after claim", purchase_key(purchase_id))))?;

        if !existing.value.matches(request) {
            warn!(%purchase_id, "Purchase id reused for a different request");
            return Err(TicketingError::IdempotencyMismatch);
        }

        match existing.value.state {
            PurchaseState::Claimed => match self.ledger.reservation_for(purchase_id).await? {
                Some(reservation) => Ok(Resume::Recover(reservation)),
                None => Err(TicketingError::PurchaseInProgress(purchase_id.clone())),
            },
            PurchaseState::Rejected => {
                let mut record = existing.value;
                record.state = PurchaseState::Claimed;
                record.updated_at = self.env.clock.now();
                match self
                    .env
                    .purchases
                    .compare_and_swap(existing.version, record.clone())
                    .await
                {
                    Ok(version) => {
                        debug!(%purchase_id, "Retrying previously refused purchase");
                        Ok(Resume::Reserve(Versioned::new(record, version)))
                    },
                    Err(error) if error.is_conflict() => Err(TicketingError::PurchaseInProgress(purchase_id.clone())),
                    Err(error) => Err(error.into()),
                }
            },
            PurchaseState::Reserved => Ok(Resume::Issue(existing)),
            PurchaseState::Completed | PurchaseState::Voided => {
                let tickets = self.stored_tickets(&existing.value).await?;
                metrics::record_purchase("replayed");
                debug!(%purchase_id, tickets = tickets.len(), "Purchase replayed");
                Ok(Resume::Done(PurchaseOutcome {
                    purchase_id: purchase_id.clone(),
                    tickets,
                    failed_units: Vec::new(),
                    replayed: true,
                }))
            },
        }
    }

    /// Write every unit's ticket that is not stored yet.
    async fn issue(&self, record: Versioned<PurchaseRecord>, replayed: bool) -> Result<PurchaseOutcome> {
        let record = record.value;
        let purchase_id = record.purchase_id.clone();
        let now = self.env.clock.now();

        let mut tickets = Vec::with_capacity(record.ticket_ids.len());
        let mut failed_units = Vec::new();
        let mut newly_issued = 0_usize;

        for (index, ticket_id) in record.ticket_ids.iter().copied().enumerate() {
            let ticket = record.unit(index, TicketStatus::Active, now)?;
            match self.env.tickets.insert(ticket.clone()).await {
                Ok(_) => {
                    newly_issued += 1;
                    tickets.push(ticket);
                },
                Err(StoreError::AlreadyExists(_)) => match self.env.tickets.load(ticket_id).await {
                    Ok(Some(stored)) => tickets.push(stored.value),
                    Ok(None) => failed_units.push(UnitFailure {
                        index,
                        ticket_id,
                        error: StoreError::NotFound(ticket_key(ticket_id)),
                    }),
                    Err(error) => failed_units.push(UnitFailure { index, ticket_id, error }),
                },
                Err(error) => {
                    warn!(%purchase_id, index, %ticket_id, %error, "Ticket write failed");
                    failed_units.push(UnitFailure { index, ticket_id, error });
                },
            }
        }

        metrics::record_tickets_issued(newly_issued);

        if failed_units.is_empty() {
            self.finish(&purchase_id, PurchaseState::Completed).await?;
            metrics::record_purchase(if replayed { "replayed" } else { "complete" });
            info!(
                %purchase_id,
                buyer = %record.buyer,
                quantity = record.quantity,
                issued = newly_issued,
                replayed,
                "Purchase completed"
            );
        } else {
            metrics::record_purchase("partial");
            error!(
                %purchase_id,
                issued = tickets.len(),
                owed = failed_units.len(),
                "Purchase partially issued; replay to issue the owed units"
            );
        }

        Ok(PurchaseOutcome {
            purchase_id,
            tickets,
            failed_units,
            replayed,
        })
    }

    /// Move a `Reserved` record to a final state. Already-final records are left alone.
    async fn finish(&self, purchase_id: &PurchaseId, state: PurchaseState) -> Result<()> {
        let key = purchase_key(purchase_id);
        let env = &self.env;
        retry_through_outages(&env.retry, &key, move || async move {
            let current = env
                .purchases
                .load(purchase_id)
                .await?
                .ok_or_else(|| TicketingError::PurchaseNotFound(purchase_id.clone()))?;
            if current.value.state != PurchaseState::Reserved {
                return Ok(());
            }
            let mut record = current.value;
            record.state = state;
            record.updated_at = env.clock.now();
            env.purchases.compare_and_swap(current.version, record).await?;
            Ok::<_, TicketingError>(())
        })
        .await
    }

    /// Best effort: let a replay of a refused purchase try again.
    async fn mark_rejected(&self, claimed: Versioned<PurchaseRecord>) {
        let purchase_id = claimed.value.purchase_id.clone();
        let mut record = claimed.value;
        record.state = PurchaseState::Rejected;
        record.updated_at = self.env.clock.now();
        if let Err(error) = self.env.purchases.compare_and_swap(claimed.version, record).await {
            warn!(%purchase_id, %error, "Could not release refused purchase id");
        }
    }

    async fn stored_tickets(&self, record: &PurchaseRecord) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::with_capacity(record.ticket_ids.len());
        for ticket_id in &record.ticket_ids {
            if let Some(stored) = self.env.tickets.load(*ticket_id).await? {
                tickets.push(stored.value);
            }
        }
        Ok(tickets)
    }

    /// Look up the record for a purchase id.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the log cannot be read.
    pub async fn record(&self, purchase_id: &PurchaseId) -> Result<Option<PurchaseRecord>> {
        Ok(self
            .env
            .purchases
            .load(purchase_id)
            .await?
            .map(|record| record.value))
    }
}

enum Resume {
    Reserve(Versioned<PurchaseRecord>),
    /// Inventory was taken but the record still says `Claimed`
    Recover(Reservation),
    Issue(Versioned<PurchaseRecord>),
    Done(PurchaseOutcome),
}
