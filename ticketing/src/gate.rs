//! Identity & authorization gate.
//!
//! Callers arrive already authenticated as a [`Principal`]. The gate only decides
//! whether that principal may attempt an action; ownership of a particular
//! ticket is checked by the ticket state machine, not here.

use crate::error::{Result, TicketingError};
use crate::types::{Event, Principal, Role};
use std::fmt;

/// Mutating entry points guarded by the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GuardedAction {
    /// Buy tickets from the primary inventory
    Purchase,
    /// Give a ticket to someone else
    Transfer,
    /// Offer a ticket for resale
    ListForResale,
    /// Withdraw a resale offer
    CancelListing,
    /// Buy a listed ticket
    PurchaseResale,
    /// Check a ticket in at the door
    Validate,
    /// Void or refund a ticket, or write off an unfinished purchase
    Revoke,
    /// Register events and change ticket-type settings
    ManageInventory,
}

impl GuardedAction {
    /// Lower-case label used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Transfer => "transfer",
            Self::ListForResale => "list_for_resale",
            Self::CancelListing => "cancel_listing",
            Self::PurchaseResale => "purchase_resale",
            Self::Validate => "validate",
            Self::Revoke => "revoke",
            Self::ManageInventory => "manage_inventory",
        }
    }

    /// Actions reserved for the event's staff.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(self, Self::Validate | Self::Revoke | Self::ManageInventory)
    }
}

impl fmt::Display for GuardedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a principal may attempt an action.
pub trait AccessPolicy: Send + Sync {
    /// Authorize `principal` to perform `action`, optionally scoped to `event`.
    ///
    /// # Errors
    ///
    /// Returns `TicketingError::Unauthorized` when the action is not allowed.
    fn authorize(&self, principal: &Principal, action: GuardedAction, event: Option<&Event>) -> Result<()>;
}

/// Default role-based policy.
///
/// Buyer-facing actions are open to any resolved principal. Validation, revocation
/// and inventory management need an admin, or the organizer of the event in
/// question.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoleAccessPolicy;

impl AccessPolicy for RoleAccessPolicy {
    fn authorize(&self, principal: &Principal, action: GuardedAction, event: Option<&Event>) -> Result<()> {
        if !action.is_privileged() {
            return Ok(());
        }

        let allowed = match principal.role {
            Role::Admin => true,
            Role::Organizer => event.is_some_and(|event| event.organizer == principal.identity),
            Role::Buyer => false,
        };

        if allowed {
            Ok(())
        } else {
            tracing::debug!(
                identity = %principal.identity,
                role = ?principal.role,
                action = %action,
                "Access denied"
            );
            Err(TicketingError::Unauthorized(format!(
                "{:?} {} may not {action}",
                principal.role, principal.identity
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdentityId;

    fn event_run_by(organizer: IdentityId) -> Event {
        Event::new("Show", organizer)
    }

    #[test]
    fn buyers_may_trade_but_not_check_in() {
        let buyer = Principal::buyer(IdentityId::new());
        let event = event_run_by(IdentityId::new());
        assert!(RoleAccessPolicy.authorize(&buyer, GuardedAction::Purchase, Some(&event)).is_ok());
        assert!(RoleAccessPolicy.authorize(&buyer, GuardedAction::Transfer, None).is_ok());
        assert!(matches!(
            RoleAccessPolicy.authorize(&buyer, GuardedAction::Validate, Some(&event)),
            Err(TicketingError::Unauthorized(_))
        ));
    }

    #[test]
    fn organizers_are_scoped_to_their_own_events() {
        let organizer = IdentityId::new();
        let own = event_run_by(organizer);
        let other = event_run_by(IdentityId::new());
        let principal = Principal::organizer(organizer);

        assert!(RoleAccessPolicy.authorize(&principal, GuardedAction::Validate, Some(&own)).is_ok());
        assert!(RoleAccessPolicy.authorize(&principal, GuardedAction::Validate, Some(&other)).is_err());
        assert!(RoleAccessPolicy.authorize(&principal, GuardedAction::Revoke, None).is_err());
    }

    #[test]
    fn admins_may_do_anything() {
        let admin = Principal::admin(IdentityId::new());
        let event = event_run_by(IdentityId::new());
        assert!(RoleAccessPolicy.authorize(&admin, GuardedAction::Revoke, Some(&event)).is_ok());
        assert!(RoleAccessPolicy.authorize(&admin, GuardedAction::ManageInventory, None).is_ok());
    }
}
