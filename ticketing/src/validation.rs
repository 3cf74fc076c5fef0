//! Validation engine: the check-in state machine.
//!
//! `Active → Used` happens at most once per ticket. The status check and the
//! write are one compare-and-swap, so two gates scanning the same code at the
//! same moment produce one admission and one `AlreadyUsed`.

use crate::environment::TicketingEnvironment;
use crate::error::{Result, TicketingError};
use crate::gate::GuardedAction;
use crate::lifecycle::{load_ticket, update_ticket};
use crate::metrics;
use crate::notify::{ResaleNotification, publish_logged};
use crate::types::{Principal, Ticket, TicketId};
use tracing::{debug, info};

/// Checks tickets in at the door.
#[derive(Clone)]
pub struct ValidationEngine {
    env: TicketingEnvironment,
}

impl ValidationEngine {
    /// Creates a validation engine
    #[must_use]
    pub const fn new(env: TicketingEnvironment) -> Self {
        Self { env }
    }

    /// Mark `ticket_id` used by `validator`.
    ///
    /// The validator must be an admin or the organizer of the ticket's event.
    ///
    /// # Errors
    ///
    /// `TicketNotFound`, `EventNotFound`, `Unauthorized`, `AlreadyUsed`,
    /// `TicketNotActive` or a fatal storage error.
    pub async fn validate(&self, ticket_id: TicketId, validator: &Principal) -> Result<Ticket> {
        let current = load_ticket(self.env.tickets.as_ref(), ticket_id).await?;
        let event = self
            .env
            .inventory
            .load_event(current.event_id)
            .await?
            .ok_or(TicketingError::EventNotFound(current.event_id))?;
        self.env
            .gate
            .authorize(validator, GuardedAction::Validate, Some(&event))?;

        let now = self.env.clock.now();
        let verified_by = validator.identity;
        let result = update_ticket(self.env.tickets.as_ref(), &self.env.retry, ticket_id, |ticket| {
            ticket.mark_used(verified_by, now)
        })
        .await;

        let (ticket, closed_listing) = match result {
            Ok(done) => done,
            Err(rejection) => {
                if rejection.is_rejection() {
                    metrics::record_validation(false);
                }
                debug!(%ticket_id, %verified_by, %rejection, "Check-in refused");
                return Err(rejection);
            },
        };

        metrics::record_validation(true);
        info!(%ticket_id, %verified_by, owner = %ticket.owner, "Ticket checked in");

        if closed_listing.is_some() {
            publish_logged(
                self.env.publisher.as_ref(),
                ResaleNotification::Delisted {
                    ticket_id,
                    event_id: ticket.event_id,
                },
            )
            .await;
        }
        Ok(ticket)
    }
}
