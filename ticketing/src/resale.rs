//! Resale manager: capped listings and single-winner resale purchases.
//!
//! A listing is a flag on an `Active` ticket, not a status, so a listed ticket
//! can still be checked in until it sells. The asking price may not exceed the
//! configured percentage of the price originally paid (150% by default),
//! compared in integer minor units.

use crate::environment::TicketingEnvironment;
use crate::error::{Result, TicketingError};
use crate::gate::GuardedAction;
use crate::lifecycle::update_ticket;
use crate::metrics;
use crate::notify::{OwnershipChange, ResaleNotification, publish_logged, spawn_ownership_change};
use crate::types::{Money, Principal, Ticket, TicketId, TransferKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Lists tickets for resale and sells them.
#[derive(Clone)]
pub struct ResaleManager {
    env: TicketingEnvironment,
}

impl ResaleManager {
    /// Creates a resale manager
    #[must_use]
    pub const fn new(env: TicketingEnvironment) -> Self {
        Self { env }
    }

    /// Offer `ticket_id` for resale at `price`.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `TicketNotFound`, `TicketNotActive`, `NotOwner`,
    /// `NotTransferable`, `AlreadyListed`, `InvalidPrice`, `PriceCapExceeded` or a
    /// fatal storage error.
    pub async fn list(&self, ticket_id: TicketId, caller: &Principal, price: Money) -> Result<Ticket> {
        self.env.gate.authorize(caller, GuardedAction::ListForResale, None)?;

        let now = self.env.clock.now();
        let seller = caller.identity;
        let cap_percent = self.env.config.limits.resale_cap_percent;
        let (ticket, listing) = update_ticket(self.env.tickets.as_ref(), &self.env.retry, ticket_id, |ticket| {
            ticket.list(seller, price, cap_percent, now)
        })
        .await
        .inspect_err(|rejection| debug!(%ticket_id, %seller, %price, %rejection, "Listing refused"))?;

        metrics::record_listing("listed");
        info!(%ticket_id, %seller, price = %listing.price, "Ticket listed for resale");

        publish_logged(
            self.env.publisher.as_ref(),
            ResaleNotification::Listed {
                ticket_id,
                event_id: ticket.event_id,
                price: listing.price,
                currency: ticket.ticket_type.currency.clone(),
            },
        )
        .await;
        Ok(ticket)
    }

    /// Withdraw the caller's listing. The ticket stays `Active`.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `TicketNotFound`, `TicketNotActive`, `NotOwner`, `NotListed`
    /// or a fatal storage error.
    pub async fn cancel_listing(&self, ticket_id: TicketId, caller: &Principal) -> Result<Ticket> {
        self.env.gate.authorize(caller, GuardedAction::CancelListing, None)?;

        let seller = caller.identity;
        let (ticket, _) = update_ticket(self.env.tickets.as_ref(), &self.env.retry, ticket_id, |ticket| {
            ticket.delist(seller)
        })
        .await
        .inspect_err(|rejection| debug!(%ticket_id, %seller, %rejection, "Delisting refused"))?;

        metrics::record_listing("cancelled");
        info!(%ticket_id, %seller, "Resale listing cancelled");

        publish_logged(
            self.env.publisher.as_ref(),
            ResaleNotification::Delisted {
                ticket_id,
                event_id: ticket.event_id,
            },
        )
        .await;
        Ok(ticket)
    }

    /// Buy a listed ticket at its asking price.
    ///
    /// Concurrent buyers race on the ticket's compare-and-swap; exactly one wins.
    /// A loser that saw the listing before it was taken gets `AlreadySold`, one
    /// that only ever saw the ticket unlisted gets `NotListed`.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `TicketNotFound`, `TicketNotActive`, `NotListed`,
    /// `AlreadySold`, `SameOwner` or a fatal storage error.
    pub async fn purchase(&self, ticket_id: TicketId, buyer: &Principal) -> Result<Ticket> {
        self.env.gate.authorize(buyer, GuardedAction::PurchaseResale, None)?;

        let now = self.env.clock.now();
        let buyer_id = buyer.identity;
        // History length when the listing was first seen, plus one; zero until then
        let seen_listed_at = AtomicUsize::new(0);
        let (ticket, (record, price)) = update_ticket(self.env.tickets.as_ref(), &self.env.retry, ticket_id, |ticket| {
            if ticket.is_listed() {
                let _ = seen_listed_at.compare_exchange(
                    0,
                    ticket.transfer_history.len() + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            match ticket.complete_resale(buyer_id, now) {
                Err(TicketingError::NotListed(id)) if sold_since(ticket, seen_listed_at.load(Ordering::Relaxed)) => {
                    Err(TicketingError::AlreadySold(id))
                },
                other => other,
            }
        })
        .await
        .inspect_err(|rejection| debug!(%ticket_id, buyer = %buyer_id, %rejection, "Resale purchase refused"))?;

        metrics::record_resale_purchase(price.minor());
        info!(
            %ticket_id,
            seller = %record.from,
            buyer = %record.to,
            %price,
            "Resale completed"
        );

        publish_logged(
            self.env.publisher.as_ref(),
            ResaleNotification::Sold {
                ticket_id,
                event_id: ticket.event_id,
                price,
                seller: record.from,
                buyer: record.to,
            },
        )
        .await;
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

/// Whether a resale was recorded after the listing was seen at `seen_listed_at`.
fn sold_since(ticket: &Ticket, seen_listed_at: usize) -> bool {
    seen_listed_at > 0
        && ticket.transfer_history.len() >= seen_listed_at
        && ticket
            .transfer_history
            .last()
            .is_some_and(|record| matches!(record.kind, TransferKind::Resale { .. }))
}
