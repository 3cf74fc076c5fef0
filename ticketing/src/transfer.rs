//! Transfer manager: moves a ticket to another identity.

use crate::environment::TicketingEnvironment;
use crate::error::{Result, TicketingError};
use crate::gate::GuardedAction;
use crate::lifecycle::update_ticket;
use crate::metrics;
use crate::notify::{OwnershipChange, spawn_ownership_change};
use crate::types::{Principal, Recipient, Ticket, TicketId};
use tracing::{debug, info};

/// Gives tickets away.
#[derive(Clone)]
pub struct TransferManager {
    env: TicketingEnvironment,
}

impl TransferManager {
    /// Creates a transfer manager
    #[must_use]
    pub const fn new(env: TicketingEnvironment) -> Self {
        Self { env }
    }

    /// Move `ticket_id` from `caller` to `recipient`.
    ///
    /// The owner change and the history entry are written in one swap. The
    /// ticket stays `Active`, and the token bridge is notified without waiting.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `RecipientNotFound`, `TicketNotFound`, `TicketNotActive`,
    /// `NotOwner`, `NotTransferable`, `AlreadyListed`, `SameOwner` or a fatal
    /// storage error.
    pub async fn transfer(&self, ticket_id: TicketId, caller: &Principal, recipient: &Recipient) -> Result<Ticket> {
        self.env.gate.authorize(caller, GuardedAction::Transfer, None)?;

        let to = self
            .env
            .directory
            .resolve(recipient)
            .await?
            .ok_or(TicketingError::RecipientNotFound)?;

        let now = self.env.clock.now();
        let from = caller.identity;
        let result = update_ticket(self.env.tickets.as_ref(), &self.env.retry, ticket_id, |ticket| {
            ticket.transfer_to(from, to, now)
        })
        .await;

        let (ticket, record) = match result {
            Ok(done) => done,
            Err(rejection) => {
                debug!(%ticket_id, %from, %recipient, %rejection, "Transfer refused");
                return Err(rejection);
            },
        };

        metrics::record_transfer();
        info!(
            %ticket_id,
            %from,
            to = %record.to,
            history = ticket.transfer_history.len(),
            "Ticket transferred"
        );

        spawn_ownership_change(
            &self.env.bridge,
            OwnershipChange {
                ticket_id,
                event_id: ticket.event_id,
                from: record.from,
                to: record.to,
                kind: record.kind,
            },
        );
        Ok(ticket)
    }
}
