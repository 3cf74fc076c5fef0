//! Business metrics for the ticketing engine.
//!
//! Counters are recorded through the `metrics` facade; installing an exporter is
//! left to the embedding application.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticketing_tickets_issued_total` - Tickets issued by purchases
//! - `ticketing_reservations_rejected_total{reason}` - Refused reservations
//! - `ticketing_purchases_total{outcome}` - Purchases by outcome (complete, partial, replayed)
//! - `ticketing_tickets_cancelled_total` - Owed units written off as cancelled tickets
//! - `ticketing_transfers_total` - Completed ownership transfers
//! - `ticketing_resale_listings_total{action}` - Listings opened and cancelled
//! - `ticketing_resale_purchases_total` - Completed resale purchases
//! - `ticketing_validations_total{result}` - Check-ins accepted or rejected
//! - `ticketing_revocations_total{status}` - Tickets voided or refunded
//! - `ticketing_events_registered_total` - Events registered with the ledger

use crate::types::TicketStatus;
use metrics::describe_counter;

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "ticketing_tickets_issued_total",
        "Total number of tickets issued by purchases"
    );
    describe_counter!(
        "ticketing_reservations_rejected_total",
        "Reservations refused by the inventory ledger, by reason"
    );
    describe_counter!(
        "ticketing_purchases_total",
        "Purchases by outcome (complete, partial, replayed)"
    );
    describe_counter!(
        "ticketing_tickets_cancelled_total",
        "Owed purchase units written off as cancelled tickets"
    );
    describe_counter!("ticketing_transfers_total", "Completed ownership transfers");
    describe_counter!(
        "ticketing_resale_listings_total",
        "Resale listings by action (listed, cancelled)"
    );
    describe_counter!(
        "ticketing_resale_purchases_total",
        "Completed resale purchases"
    );
    describe_counter!(
        "ticketing_validations_total",
        "Check-in attempts by result (accepted, rejected)"
    );
    describe_counter!(
        "ticketing_revocations_total",
        "Administrative revocations by resulting status"
    );
    describe_counter!(
        "ticketing_events_registered_total",
        "Events registered with the inventory ledger"
    );
    describe_counter!(
        "ticketing_conflict_retries_total",
        "Compare-and-swap attempts re-run after losing a race"
    );
    describe_counter!(
        "ticketing_conflict_retries_exhausted_total",
        "Writes abandoned after the conflict retry budget ran out"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record newly issued tickets.
pub fn record_tickets_issued(count: usize) {
    metrics::counter!("ticketing_tickets_issued_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record a refused reservation.
///
/// # Arguments
///
/// * `reason` - Short rejection label (e.g. `insufficient_inventory`)
pub fn record_reservation_rejected(reason: &'static str) {
    metrics::counter!("ticketing_reservations_rejected_total", "reason" => reason).increment(1);
    tracing::debug!(reason, "Recorded reservation_rejected metric");
}

/// Record the outcome of a purchase call.
pub fn record_purchase(outcome: &'static str) {
    metrics::counter!("ticketing_purchases_total", "outcome" => outcome).increment(1);
}

/// Record owed units written off.
pub fn record_tickets_cancelled(count: usize) {
    metrics::counter!("ticketing_tickets_cancelled_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record a completed transfer.
pub fn record_transfer() {
    metrics::counter!("ticketing_transfers_total").increment(1);
}

/// Record a listing being opened or cancelled.
pub fn record_listing(action: &'static str) {
    metrics::counter!("ticketing_resale_listings_total", "action" => action).increment(1);
}

/// Record a completed resale purchase.
///
/// # Arguments
///
/// * `price_minor` - Price paid in minor units
pub fn record_resale_purchase(price_minor: u64) {
    metrics::counter!("ticketing_resale_purchases_total").increment(1);
    tracing::debug!(price_minor, "Recorded resale_purchase metric");
}

/// Record a check-in attempt.
pub fn record_validation(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    metrics::counter!("ticketing_validations_total", "result" => result).increment(1);
}

/// Record an administrative revocation.
pub fn record_revocation(status: TicketStatus) {
    metrics::counter!("ticketing_revocations_total", "status" => status.as_str()).increment(1);
}

/// Record an event registration.
pub fn record_event_registered() {
    metrics::counter!("ticketing_events_registered_total").increment(1);
}
