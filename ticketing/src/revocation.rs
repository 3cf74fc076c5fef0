//! Administrative void and refund.

use crate::environment::TicketingEnvironment;
use crate::error::{Result, TicketingError};
use crate::gate::GuardedAction;
use crate::lifecycle::{load_ticket, update_ticket};
use crate::metrics;
use crate::notify::{ResaleNotification, publish_logged};
use crate::types::{Principal, Revocation, Ticket, TicketId, TicketStatus};
use tracing::info;

/// Moves active tickets to `Void` or `Refunded`.
///
/// Neither transition returns inventory: the sold counter is an audit trail of
/// issuance and never goes down.
#[derive(Clone)]
pub struct RevocationManager {
    env: TicketingEnvironment,
}

impl RevocationManager {
    /// Creates a revocation manager
    #[must_use]
    pub const fn new(env: TicketingEnvironment) -> Self {
        Self { env }
    }

    /// Invalidate a ticket.
    ///
    /// # Errors
    ///
    /// `TicketNotFound`, `EventNotFound`, `Unauthorized`, `TicketNotActive` or a
    /// fatal storage error.
    pub async fn void(&self, ticket_id: TicketId, principal: &Principal, reason: impl Into<String>) -> Result<Ticket> {
        self.revoke(ticket_id, principal, TicketStatus::Void, reason.into()).await
    }

    /// Mark a ticket refunded. Collecting and returning money happens elsewhere.
    ///
    /// # Errors
    ///
    /// `TicketNotFound`, `EventNotFound`, `Unauthorized`, `TicketNotActive` or a
    /// fatal storage error.
    pub async fn refund(&self, ticket_id: TicketId, principal: &Principal, reason: impl Into<String>) -> Result<Ticket> {
        self.revoke(ticket_id, principal, TicketStatus::Refunded, reason.into()).await
    }

    async fn revoke(
        &self,
        ticket_id: TicketId,
        principal: &Principal,
        status: TicketStatus,
        reason: String,
    ) -> Result<Ticket> {
        let current = load_ticket(self.env.tickets.as_ref(), ticket_id).await?;
        let event = self
            .env
            .inventory
            .load_event(current.event_id)
            .await?
            .ok_or(TicketingError::EventNotFound(current.event_id))?;
        self.env
            .gate
            .authorize(principal, GuardedAction::Revoke, Some(&event))?;

        let revocation = Revocation {
            by: principal.identity,
            at: self.env.clock.now(),
            reason,
        };
        let (ticket, closed_listing) = update_ticket(self.env.tickets.as_ref(), &self.env.retry, ticket_id, |ticket| {
            ticket.revoke(status, revocation.clone())
        })
        .await?;

        metrics::record_revocation(status);
        info!(
            %ticket_id,
            %status,
            by = %principal.identity,
            reason = %revocation.reason,
            "Ticket revoked"
        );

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
