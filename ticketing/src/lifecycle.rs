//! Ticket state machine.
//!
//! ```text
//!            transfer / resale (owner changes, history grows)
//!              ┌────┐
//!              ▼    │
//!   issue ─► Active ┴─► Used        (validate)
//!              │  └───► Void        (admin void)
//!              │  └───► Refunded    (admin refund)
//!   write-off ─┴──────► Cancelled   (owed unit of an abandoned purchase)
//! ```
//!
//! Every transition checks its preconditions against the current record and
//! either mutates it or returns a typed rejection without touching it. The
//! managers run these transitions inside [`update_ticket`], which re-reads and
//! re-checks after every lost compare-and-swap, so a transition is applied to at
//! most one snapshot of a ticket.

use crate::error::{Result, TicketingError};
use crate::store::{TicketStore, ticket_key};
use crate::types::{
    IdentityId, Listing, Money, Revocation, Ticket, TicketId, TicketStatus, TransferKind, TransferRecord,
};
use chrono::{DateTime, Utc};
use ticketing_core::{RetryPolicy, retry_on_conflict};

impl Ticket {
    /// Fail unless the ticket is still `Active`.
    ///
    /// # Errors
    ///
    /// `TicketNotActive` for every terminal status.
    pub fn ensure_active(&self) -> Result<()> {
        if self.status.is_terminal() {
            Err(TicketingError::TicketNotActive {
                ticket_id: self.id,
                status: self.status,
            })
        } else {
            Ok(())
        }
    }

    fn ensure_owned_by(&self, identity: IdentityId) -> Result<()> {
        if self.owner == identity {
            Ok(())
        } else {
            Err(TicketingError::NotOwner(self.id))
        }
    }

    fn ensure_tradeable_by(&self, caller: IdentityId) -> Result<()> {
        self.ensure_active()?;
        self.ensure_owned_by(caller)?;
        if self.is_transferable {
            Ok(())
        } else {
            Err(TicketingError::NotTransferable(self.id))
        }
    }

    fn change_owner(&mut self, to: IdentityId, at: DateTime<Utc>, kind: TransferKind) -> TransferRecord {
        let record = TransferRecord {
            from: self.owner,
            to,
            at,
            kind,
        };
        self.owner = to;
        self.transfer_history.push(record.clone());
        record
    }

    /// Give the ticket to `recipient`.
    ///
    /// A listed ticket has to be delisted first so the listing cannot be bought
    /// out from under the new owner.
    ///
    /// # Errors
    ///
    /// `TicketNotActive`, `NotOwner`, `NotTransferable`, `AlreadyListed` or `SameOwner`.
    pub fn transfer_to(&mut self, caller: IdentityId, recipient: IdentityId, at: DateTime<Utc>) -> Result<TransferRecord> {
        self.ensure_tradeable_by(caller)?;
        if self.is_listed() {
            return Err(TicketingError::AlreadyListed(self.id));
        }
        if recipient == self.owner {
            return Err(TicketingError::SameOwner(self.id));
        }
        Ok(self.change_owner(recipient, at, TransferKind::Transfer))
    }

    /// Offer the ticket for resale at `price`.
    ///
    /// # Errors
    ///
    /// `TicketNotActive`, `NotOwner`, `NotTransferable`, `AlreadyListed`,
    /// `InvalidPrice` or `PriceCapExceeded`.
    pub fn list(&mut self, caller: IdentityId, price: Money, cap_percent: u32, at: DateTime<Utc>) -> Result<Listing> {
        self.ensure_tradeable_by(caller)?;
        if self.is_listed() {
            return Err(TicketingError::AlreadyListed(self.id));
        }
        if price.is_zero() {
            return Err(TicketingError::InvalidPrice);
        }
        let original = self.original_price();
        if !price.within_cap_of(original, cap_percent) {
            return Err(TicketingError::PriceCapExceeded {
                price: price.minor(),
                cap: original.cap(cap_percent).minor(),
            });
        }

        let listing = Listing { price, listed_at: at };
        self.listing = Some(listing);
        Ok(listing)
    }

    /// Withdraw the owner's listing.
    ///
    /// # Errors
    ///
    /// `TicketNotActive`, `NotOwner` or `NotListed`.
    pub fn delist(&mut self, caller: IdentityId) -> Result<Listing> {
        self.ensure_active()?;
        self.ensure_owned_by(caller)?;
        self.listing.take().ok_or(TicketingError::NotListed(self.id))
    }

    /// Hand a listed ticket to `buyer` at the listed price. Returns the history
    /// entry and the price paid.
    ///
    /// # Errors
    ///
    /// `TicketNotActive`, `NotListed` or `SameOwner`.
    pub fn complete_resale(&mut self, buyer: IdentityId, at: DateTime<Utc>) -> Result<(TransferRecord, Money)> {
        self.ensure_active()?;
        let listing = self.listing.ok_or(TicketingError::NotListed(self.id))?;
        if buyer == self.owner {
            return Err(TicketingError::SameOwner(self.id));
        }
        self.listing = None;
        let record = self.change_owner(buyer, at, TransferKind::Resale { price: listing.price });
        Ok((record, listing.price))
    }

    /// Check the ticket in. Returns the listing the check-in closed, if any.
    ///
    /// # Errors
    ///
    /// `AlreadyUsed` for a used ticket, `TicketNotActive` for any other terminal status.
    pub fn mark_used(&mut self, validator: IdentityId, at: DateTime<Utc>) -> Result<Option<Listing>> {
        if self.status == TicketStatus::Used {
            return Err(TicketingError::AlreadyUsed(self.id));
        }
        self.ensure_active()?;
        self.status = TicketStatus::Used;
        self.used_at = Some(at);
        self.verified_by = Some(validator);
        Ok(self.listing.take())
    }

    /// Move the ticket to `status` (`Void` or `Refunded`). Returns the listing this
    /// closed, if any.
    ///
    /// # Errors
    ///
    /// `TicketNotActive` if the ticket is already terminal.
    pub fn revoke(&mut self, status: TicketStatus, revocation: Revocation) -> Result<Option<Listing>> {
        self.ensure_active()?;
        self.status = status;
        self.revocation = Some(revocation);
        Ok(self.listing.take())
    }
}

/// Apply `transition` to the stored ticket with compare-and-swap, retrying on conflict.
///
/// `transition` runs once per attempt against a fresh copy of the ticket. Its
/// rejections are returned as-is; only a lost swap triggers another attempt.
///
/// # Errors
///
/// `TicketNotFound`, any rejection from `transition`, or a fatal storage error.
pub(crate) async fn update_ticket<T, F>(
    tickets: &dyn TicketStore,
    policy: &RetryPolicy,
    ticket_id: TicketId,
    transition: F,
) -> Result<(Ticket, T)>
where
    F: Fn(&mut Ticket) -> Result<T> + Sync,
    T: Send,
{
    let key = ticket_key(ticket_id);
    let transition = &transition;
    retry_on_conflict(policy, &key, move || async move {
        let current = tickets
            .load(ticket_id)
            .await?
            .ok_or(TicketingError::TicketNotFound(ticket_id))?;
        let mut ticket = current.value;
        let outcome = transition(&mut ticket)?;
        tickets.compare_and_swap(current.version, ticket.clone()).await?;
        Ok::<_, TicketingError>((ticket, outcome))
    })
    .await
}

/// Load a ticket or fail with `TicketNotFound`.
pub(crate) async fn load_ticket(tickets: &dyn TicketStore, ticket_id: TicketId) -> Result<Ticket> {
    tickets
        .load(ticket_id)
        .await?
        .map(|record| record.value)
        .ok_or(TicketingError::TicketNotFound(ticket_id))
}
