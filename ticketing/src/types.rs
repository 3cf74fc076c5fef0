//! Domain types for the ticket inventory and lifecycle engine.
//!
//! This module contains the identifiers, value objects and records the engine
//! stores: events with their ticket types (the inventory ledger's rows), issued
//! tickets (one per physical ticket) and the principals that act on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for an event
    EventId
);
uuid_identifier!(
    /// Unique identifier for a ticket type within an event
    TicketTypeId
);
uuid_identifier!(
    /// Unique identifier for an issued ticket
    TicketId
);
uuid_identifier!(
    /// Resolved identity of a buyer, organizer or admin
    IdentityId
);

/// Error type for `PurchaseId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid purchase id: {0}")]
pub struct ParsePurchaseIdError(String);

/// Caller-supplied idempotency key for one logical purchase attempt.
///
/// Retrying a purchase with the same key never reserves inventory twice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(String);

impl PurchaseId {
    /// Create a `PurchaseId` from trusted, application-controlled input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PurchaseId {
    type Err = ParsePurchaseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            return Err(ParsePurchaseIdError(
                "Purchase id must be between 1 and 128 characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in minor units (cents).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Whether `self` is at most `cap_percent` percent of `original`.
    ///
    /// Computed in `u128` without division, so `1500` is within 150% of `1000`
    /// and `1501` is not.
    #[must_use]
    pub const fn within_cap_of(self, original: Self, cap_percent: u32) -> bool {
        (self.0 as u128) * 100 <= (original.0 as u128) * (cap_percent as u128)
    }

    /// The largest amount within `cap_percent` percent of `self` (rounded down).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn cap(self, cap_percent: u32) -> Self {
        let capped = (self.0 as u128) * (cap_percent as u128) / 100;
        if capped > u64::MAX as u128 {
            Self(u64::MAX)
        } else {
            Self(capped as u64)
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Error type for `Currency` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid currency code: {0}")]
pub struct ParseCurrencyError(String);

/// ISO 4217 style three-letter currency code, stored upper-case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// US dollars
    #[must_use]
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    /// Euros
    #[must_use]
    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    /// Get the code as a string slice.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl FromStr for Currency {
    type Err = ParseCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(s.to_ascii_uppercase()))
        } else {
            Err(ParseCurrencyError(s.to_string()))
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// Optional time bounds during which a ticket type may be sold.
///
/// The start is inclusive and the end exclusive; a missing bound is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// Sales open at this instant
    pub starts_at: Option<DateTime<Utc>>,
    /// Sales close at this instant
    pub ends_at: Option<DateTime<Utc>>,
}

impl SaleWindow {
    /// A window with both bounds set.
    #[must_use]
    pub const fn between(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self {
            starts_at: Some(starts_at),
            ends_at: Some(ends_at),
        }
    }

    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.is_none_or(|start| now >= start) && self.ends_at.is_none_or(|end| now < end)
    }
}

/// A named tier of tickets for an event with its own price and capacity.
///
/// `quantity` is fixed at registration. `sold` only ever grows, by exactly the
/// quantity of each successful reservation, and never exceeds `quantity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Ticket type identifier
    pub id: TicketTypeId,
    /// Display name (e.g. "VIP")
    pub name: String,
    /// Current list price
    pub price: Money,
    /// Currency of `price`
    pub currency: Currency,
    /// Capacity cap
    pub quantity: u32,
    /// Units issued so far
    pub sold: u32,
    /// Whether the type is currently on sale
    pub active: bool,
    /// When the type may be sold
    pub sale_window: SaleWindow,
    /// Whether tickets of this type may change hands after issuance
    pub transferable: bool,
}

impl TicketType {
    /// Creates an active, transferable ticket type with nothing sold.
    #[must_use]
    pub fn new(name: impl Into<String>, price: Money, currency: Currency, quantity: u32) -> Self {
        Self {
            id: TicketTypeId::new(),
            name: name.into(),
            price,
            currency,
            quantity,
            sold: 0,
            active: true,
            sale_window: SaleWindow::default(),
            transferable: true,
        }
    }

    /// Restrict sales to a window.
    #[must_use]
    pub const fn with_sale_window(mut self, window: SaleWindow) -> Self {
        self.sale_window = window;
        self
    }

    /// Mark issued tickets as non-transferable.
    #[must_use]
    pub const fn non_transferable(mut self) -> Self {
        self.transferable = false;
        self
    }

    /// Start the type off sale.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Units still available
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.sold)
    }

    /// The fields copied onto every ticket issued from this type.
    #[must_use]
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            ticket_type_id: self.id,
            name: self.name.clone(),
            price: self.price,
            currency: self.currency.clone(),
        }
    }
}

/// Inventory-relevant view of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Identity allowed to manage inventory and check tickets in
    pub organizer: IdentityId,
    /// Ticket types in display order
    pub ticket_types: Vec<TicketTypeId>,
}

impl Event {
    /// Creates an event with no ticket types yet.
    #[must_use]
    pub fn new(name: impl Into<String>, organizer: IdentityId) -> Self {
        Self {
            id: EventId::new(),
            name: name.into(),
            organizer,
            ticket_types: Vec::new(),
        }
    }
}

/// Name, price and currency of a ticket type frozen at issuance time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Ticket type the ticket was issued from
    pub ticket_type_id: TicketTypeId,
    /// Ticket type name at issuance
    pub name: String,
    /// Price paid
    pub price: Money,
    /// Currency of the price paid
    pub currency: Currency,
}

// ============================================================================
// Tickets
// ============================================================================

/// Display information for the person attending with a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Full name
    pub name: String,
    /// Contact email
    pub email: Option<String>,
}

impl Attendee {
    /// Creates an attendee
    #[must_use]
    pub fn new(name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            name: name.into(),
            email,
        }
    }
}

/// Ticket status.
///
/// Transfers and resales change the owner and append to the transfer history but
/// leave the ticket `Active`: a transferred ticket must still get its holder in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Issued and usable
    Active,
    /// Checked in at the event
    Used,
    /// Money returned; no longer valid
    Refunded,
    /// Written off as compensation for a purchase that never completed
    Cancelled,
    /// Invalidated by an administrator
    Void,
}

impl TicketStatus {
    /// Terminal tickets are read-only.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Lower-case label used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
            Self::Void => "void",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a ticket changed hands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// Owner gave the ticket away
    Transfer,
    /// Ticket was bought from a resale listing
    Resale {
        /// Price the buyer paid
        price: Money,
    },
}

/// One entry of a ticket's append-only provenance trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Previous owner
    pub from: IdentityId,
    /// New owner
    pub to: IdentityId,
    /// When ownership moved
    pub at: DateTime<Utc>,
    /// Transfer or resale
    pub kind: TransferKind,
}

/// An open resale offer for a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Asking price
    pub price: Money,
    /// When the ticket was listed
    pub listed_at: DateTime<Utc>,
}

/// Administrative void or refund details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// Who revoked the ticket
    pub by: IdentityId,
    /// When
    pub at: DateTime<Utc>,
    /// Free-form reason
    pub reason: String,
}

/// One physical ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Purchase that issued the ticket
    pub purchase_id: PurchaseId,
    /// Ticket type snapshot taken at issuance
    pub ticket_type: PriceSnapshot,
    /// Current holder
    pub owner: IdentityId,
    /// Person attending (may differ from the owner)
    pub attendee: Attendee,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Whether ownership may change
    pub is_transferable: bool,
    /// Ownership changes, oldest first
    pub transfer_history: Vec<TransferRecord>,
    /// Open resale listing, if any
    pub listing: Option<Listing>,
    /// Issuance time
    pub issued_at: DateTime<Utc>,
    /// Check-in time
    pub used_at: Option<DateTime<Utc>>,
    /// Identity that checked the ticket in
    pub verified_by: Option<IdentityId>,
    /// Void/refund details
    pub revocation: Option<Revocation>,
}

impl Ticket {
    /// Price originally paid, the base for the resale cap.
    #[must_use]
    pub const fn original_price(&self) -> Money {
        self.ticket_type.price
    }

    /// Asking price while listed.
    #[must_use]
    pub fn resale_price(&self) -> Option<Money> {
        self.listing.map(|listing| listing.price)
    }

    /// Whether the ticket is currently offered for resale
    #[must_use]
    pub const fn is_listed(&self) -> bool {
        self.listing.is_some()
    }
}

// ============================================================================
// Principals
// ============================================================================

/// Role resolved by the identity gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Regular ticket buyer
    Buyer,
    /// Event organizer
    Organizer,
    /// Platform administrator
    Admin,
}

/// An already-authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Caller identity
    pub identity: IdentityId,
    /// Caller role
    pub role: Role,
}

impl Principal {
    /// A caller acting as a buyer
    #[must_use]
    pub const fn buyer(identity: IdentityId) -> Self {
        Self {
            identity,
            role: Role::Buyer,
        }
    }

    /// A caller acting as an organizer
    #[must_use]
    pub const fn organizer(identity: IdentityId) -> Self {
        Self {
            identity,
            role: Role::Organizer,
        }
    }

    /// A caller acting as an administrator
    #[must_use]
    pub const fn admin(identity: IdentityId) -> Self {
        Self {
            identity,
            role: Role::Admin,
        }
    }
}

/// Who a ticket is being sent to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A known identity
    Identity(IdentityId),
    /// Lookup by email address
    Email(String),
    /// Lookup by wallet address
    Wallet(String),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(id) => write!(f, "identity:{id}"),
            Self::Email(email) => write!(f, "email:{email}"),
            Self::Wallet(wallet) => write!(f, "wallet:{wallet}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn resale_cap_is_exact_at_the_boundary() {
        let original = Money::from_minor(1000);
        assert!(Money::from_minor(1500).within_cap_of(original, 150));
        assert!(!Money::from_minor(1501).within_cap_of(original, 150));
        assert_eq!(original.cap(150), Money::from_minor(1500));
    }

    #[test]
    fn resale_cap_with_odd_original_rounds_down() {
        let original = Money::from_minor(999);
        assert_eq!(original.cap(150), Money::from_minor(1498));
        assert!(Money::from_minor(1498).within_cap_of(original, 150));
        assert!(!Money::from_minor(1499).within_cap_of(original, 150));
    }

    #[test]
    fn sale_window_bounds() {
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let window = SaleWindow::between(start, end);

        assert!(!window.contains(start - Duration::seconds(1)));
        assert!(window.contains(start));
        assert!(window.contains(end - Duration::seconds(1)));
        assert!(!window.contains(end));
        assert!(SaleWindow::default().contains(start));
    }

    #[test]
    fn remaining_never_underflows() {
        let mut tier = TicketType::new("GA", Money::from_minor(500), Currency::usd(), 3);
        assert_eq!(tier.remaining(), 3);
        tier.sold = 3;
        assert_eq!(tier.remaining(), 0);
    }

    #[test]
    fn currency_parsing() {
        assert_eq!("usd".parse::<Currency>(), Ok(Currency::usd()));
        assert!("US".parse::<Currency>().is_err());
        assert!("U5D".parse::<Currency>().is_err());
    }

    #[test]
    fn purchase_id_parsing_rejects_blank() {
        assert!("   ".parse::<PurchaseId>().is_err());
        assert_eq!("order-1".parse::<PurchaseId>(), Ok(PurchaseId::new("order-1")));
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!TicketStatus::Active.is_terminal());
        for status in [
            TicketStatus::Used,
            TicketStatus::Refunded,
            TicketStatus::Cancelled,
            TicketStatus::Void,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_minor(1505).to_string(), "15.05");
    }
}
