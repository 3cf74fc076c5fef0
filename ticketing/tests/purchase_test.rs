//! Purchase orchestration tests: idempotent replay, request validation, sale
//! windows, partial issuance, write-off of owed units, recovery from a purchase
//! log outage and callers that stop waiting.
//!
//! Run with: `cargo test --test purchase_test`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

mod common;

use chrono::Duration;
use common::{
    FlakyPurchaseLog, FlakyTicketStore, GatedTicketStore, general_admission, harness, harness_with,
    harness_with_purchase_log, test_config,
};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use ticketing::purchase::UNISSUED_REASON;
use ticketing::{
    Attendee, IdentityId, LedgerRejection, Principal, PurchaseId, PurchaseRequest, PurchaseState, SaleWindow,
    TicketStatus, TicketingError,
};
use ticketing_core::StoreError;
use ticketing_testing::{ManualClock, test_clock, test_epoch};

#[tokio::test]
async fn test_replay_returns_same_tickets_without_reserving_again() {
    let h = harness();
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-1"), event.0, event.1, 2, fan);

    let first = h.engine.purchase(request.clone()).await.unwrap();
    assert!(first.is_complete());
    assert!(!first.replayed);
    assert_eq!(first.tickets.len(), 2);
    assert_eq!(h.sold(event).await, 2);

    let second = h.engine.purchase(request).await.unwrap();
    assert!(second.replayed);
    assert_eq!(second.tickets, first.tickets);
    assert_eq!(h.sold(event).await, 2, "a replay never reserves again");

    let record = h
        .engine
        .purchase_record(&PurchaseId::new("order-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, PurchaseState::Completed);
    assert_eq!(record.ticket_ids, first.tickets.iter().map(|t| t.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_reused_purchase_id_with_different_request_is_rejected() {
    let h = harness();
    let fan = h.buyer("Fan");
    let someone_else = h.buyer("Someone");
    let event = h.event(10).await;
    let id = PurchaseId::new("order-7");

    h.engine
        .purchase(PurchaseRequest::new(id.clone(), event.0, event.1, 1, fan))
        .await
        .unwrap();

    let more = h
        .engine
        .purchase(PurchaseRequest::new(id.clone(), event.0, event.1, 3, fan))
        .await;
    assert_eq!(more, Err(TicketingError::IdempotencyMismatch));

    let other_buyer = h
        .engine
        .purchase(PurchaseRequest::new(id, event.0, event.1, 1, someone_else))
        .await;
    assert_eq!(other_buyer, Err(TicketingError::IdempotencyMismatch));

    assert_eq!(h.sold(event).await, 1);
}

#[tokio::test]
async fn test_request_validation() {
    let h = harness_with(
        test_config().with_max_tickets_per_purchase(4),
        Arc::new(test_clock()),
        None,
    );
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = |quantity| PurchaseRequest::new(PurchaseId::generate(), event.0, event.1, quantity, fan);

    assert_eq!(h.engine.purchase(request(0)).await, Err(TicketingError::InvalidQuantity));
    assert_eq!(
        h.engine.purchase(request(5)).await,
        Err(TicketingError::QuantityLimitExceeded { requested: 5, limit: 4 })
    );
    assert_eq!(
        h.engine
            .purchase(request(2).with_attendees(vec![Attendee::new("Only One", None)]))
            .await,
        Err(TicketingError::AttendeeCountMismatch { expected: 2, actual: 1 })
    );
    assert_eq!(h.sold(event).await, 0);

    // Nothing was claimed, so none of these ids are remembered
    assert_eq!(h.engine.tickets_owned_by(fan.identity).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_attendees_default_to_buyer_profile() {
    let h = harness();
    let alice = h.buyer("Alice");
    let event = h.event(10).await;

    let tickets = h.buy(&alice, event, 2).await;
    for ticket in &tickets {
        assert_eq!(ticket.owner, alice.identity);
        assert_eq!(ticket.attendee.name, "Alice");
        assert_eq!(ticket.attendee.email.as_deref(), Some("alice@example.com"));
        assert_eq!(ticket.status, TicketStatus::Active);
        assert!(ticket.transfer_history.is_empty());
    }

    let stranger = Principal::buyer(IdentityId::new());
    let fallback = h.buy(&stranger, event, 1).await.remove(0);
    assert_eq!(fallback.attendee.name, stranger.identity.to_string());
    assert_eq!(fallback.attendee.email, None);
}

#[tokio::test]
async fn test_attendee_overrides_are_kept_per_unit() {
    let h = harness();
    let parent = h.buyer("Parent");
    let event = h.event(10).await;
    let attendees = vec![
        Attendee::new("Kid One", None),
        Attendee::new("Kid Two", Some("kid2@example.com".to_string())),
    ];

    let outcome = h
        .engine
        .purchase(
            PurchaseRequest::new(PurchaseId::generate(), event.0, event.1, 2, parent).with_attendees(attendees.clone()),
        )
        .await
        .unwrap();

    let issued: Vec<_> = outcome.tickets.iter().map(|ticket| ticket.attendee.clone()).collect();
    assert_eq!(issued, attendees);
    assert!(outcome.tickets.iter().all(|ticket| ticket.owner == parent.identity));
}

#[tokio::test]
async fn test_sale_window_is_enforced() {
    let clock = ManualClock::starting_at(test_epoch());
    let h = harness_with(test_config(), Arc::new(clock.clone()), None);
    let fan = h.buyer("Fan");
    let window = SaleWindow::between(test_epoch() + Duration::hours(1), test_epoch() + Duration::hours(2));
    let event = h.event_with(general_admission(10).with_sale_window(window)).await;
    let request = || PurchaseRequest::new(PurchaseId::generate(), event.0, event.1, 1, fan);

    assert_eq!(
        h.engine.purchase(request()).await,
        Err(TicketingError::Ledger(LedgerRejection::OutOfWindow(event.1)))
    );

    clock.advance(Duration::minutes(90));
    h.engine.purchase(request()).await.unwrap();

    clock.advance(Duration::minutes(30));
    assert_eq!(
        h.engine.purchase(request()).await,
        Err(TicketingError::Ledger(LedgerRejection::OutOfWindow(event.1)))
    );
    assert_eq!(h.sold(event).await, 1);
}

#[tokio::test]
async fn test_replay_after_rejection_tries_again() {
    let h = harness();
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-paused"), event.0, event.1, 1, fan);

    h.engine
        .set_active(&h.organizer, event.0, event.1, false)
        .await
        .unwrap();
    assert_eq!(
        h.engine.purchase(request.clone()).await,
        Err(TicketingError::Ledger(LedgerRejection::Inactive(event.1)))
    );
    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Rejected);

    h.engine
        .set_active(&h.organizer, event.0, event.1, true)
        .await
        .unwrap();
    let outcome = h.engine.purchase(request.clone()).await.unwrap();
    assert!(outcome.is_complete());
    assert!(!outcome.replayed);
    assert_eq!(h.sold(event).await, 1);

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Completed);
}

#[tokio::test]
async fn test_partial_issuance_is_completed_by_replay() {
    let store = FlakyTicketStore::failing_inserts([2]);
    let h = harness_with(test_config(), Arc::new(test_clock()), Some(Arc::new(store.clone())));
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-flaky"), event.0, event.1, 3, fan);

    let partial = h.engine.purchase(request.clone()).await.unwrap();
    assert!(!partial.is_complete());
    assert_eq!(partial.tickets.len(), 2);
    assert_eq!(partial.failed_units.len(), 1);
    assert_eq!(partial.failed_units[0].index, 1);
    assert!(matches!(partial.failed_units[0].error, StoreError::Unavailable(_)));
    assert_eq!(h.sold(event).await, 3, "inventory covers every unit, issued or not");

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Reserved);

    store.heal();
    let resumed = h.engine.purchase(request).await.unwrap();
    assert!(resumed.is_complete());
    assert!(resumed.replayed);
    assert_eq!(resumed.tickets.len(), 3);
    assert_eq!(resumed.tickets[1].id, partial.failed_units[0].ticket_id);
    assert_eq!(h.sold(event).await, 3);
    assert_eq!(h.engine.tickets_owned_by(fan.identity).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_void_unissued_writes_off_owed_units() {
    let store = FlakyTicketStore::failing_inserts([2]);
    let h = harness_with(test_config(), Arc::new(test_clock()), Some(Arc::new(store.clone())));
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-abandoned"), event.0, event.1, 3, fan);
    let partial = h.engine.purchase(request.clone()).await.unwrap();
    let owed = partial.failed_units[0].ticket_id;

    let by_buyer = h.engine.void_unissued(&fan, &request.purchase_id).await;
    assert!(matches!(by_buyer, Err(TicketingError::Unauthorized(_))));

    let cancelled = h
        .engine
        .void_unissued(&h.organizer, &request.purchase_id)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, owed);
    assert_eq!(cancelled[0].status, TicketStatus::Cancelled);
    assert_eq!(cancelled[0].owner, fan.identity);
    assert_eq!(
        cancelled[0].revocation.as_ref().map(|revocation| revocation.reason.as_str()),
        Some(UNISSUED_REASON)
    );
    assert_eq!(h.sold(event).await, 3, "written-off units stay sold");

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Voided);

    // Nothing left to write off
    assert!(
        h.engine
            .void_unissued(&h.organizer, &request.purchase_id)
            .await
            .unwrap()
            .is_empty()
    );

    // A replay reports the final state without issuing the cancelled unit
    let replay = h.engine.purchase(request).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.tickets.len(), 3);
    assert_eq!(
        replay
            .tickets
            .iter()
            .filter(|ticket| ticket.status == TicketStatus::Cancelled)
            .count(),
        1
    );

    let check_in = h.engine.validate(owed, &h.organizer).await;
    assert_eq!(
        check_in,
        Err(TicketingError::TicketNotActive {
            ticket_id: owed,
            status: TicketStatus::Cancelled,
        })
    );
}

#[tokio::test]
async fn test_void_unissued_unknown_or_completed_purchase() {
    let h = harness();
    let fan = h.buyer("Fan");
    let event = h.event(10).await;

    let unknown = PurchaseId::new("never-seen");
    assert_eq!(
        h.engine.void_unissued(&h.admin, &unknown).await,
        Err(TicketingError::PurchaseNotFound(unknown))
    );

    let request = PurchaseRequest::new(PurchaseId::new("order-done"), event.0, event.1, 2, fan);
    h.engine.purchase(request.clone()).await.unwrap();
    assert!(
        h.engine
            .void_unissued(&h.admin, &request.purchase_id)
            .await
            .unwrap()
            .is_empty()
    );
    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Completed);
}

#[tokio::test]
async fn test_brief_purchase_log_outage_is_ridden_out() {
    let log = FlakyPurchaseLog::failing_swaps(1);
    let h = harness_with_purchase_log(test_config(), Arc::new(log.clone()));
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-blip"), event.0, event.1, 2, fan);

    let outcome = h.engine.purchase(request.clone()).await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.tickets.len(), 2);
    assert_eq!(log.failed_swaps(), 1);
    assert_eq!(h.sold(event).await, 2);

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Completed);
}

#[tokio::test]
async fn test_reservation_recorded_only_in_ledger_is_recovered_by_replay() {
    let log = FlakyPurchaseLog::down();
    let h = harness_with_purchase_log(test_config().with_max_retries(2), Arc::new(log.clone()));
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-outage"), event.0, event.1, 2, fan);

    let first = h.engine.purchase(request.clone()).await;
    assert!(matches!(
        first,
        Err(TicketingError::Storage(StoreError::RetriesExhausted { .. }))
    ));
    assert_eq!(h.sold(event).await, 2);
    assert!(h.engine.tickets_owned_by(fan.identity).await.unwrap().is_empty());

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Claimed);
    assert_eq!(record.ticket_ids.len(), 2, "ticket ids are fixed at claim");
    let reservation = h
        .engine
        .ledger()
        .reservation_for(&request.purchase_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.quantity, 2);

    // Still down: the replay fails loudly instead of reporting work in progress
    assert!(matches!(
        h.engine.purchase(request.clone()).await,
        Err(TicketingError::Storage(_))
    ));

    log.heal();
    let replay = h.engine.purchase(request.clone()).await.unwrap();
    assert!(replay.is_complete());
    assert!(replay.replayed);
    assert_eq!(replay.tickets.iter().map(|t| t.id).collect::<Vec<_>>(), record.ticket_ids);
    assert_eq!(h.sold(event).await, 2, "recovery never reserves again");
    assert_eq!(h.engine.tickets_owned_by(fan.identity).await.unwrap().len(), 2);

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Completed);
}

#[tokio::test]
async fn test_void_unissued_writes_off_reservation_recorded_only_in_ledger() {
    let log = FlakyPurchaseLog::down();
    let h = harness_with_purchase_log(test_config().with_max_retries(2), Arc::new(log.clone()));
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-stranded"), event.0, event.1, 2, fan);

    assert!(h.engine.purchase(request.clone()).await.is_err());
    log.heal();

    let cancelled = h
        .engine
        .void_unissued(&h.organizer, &request.purchase_id)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|ticket| ticket.status == TicketStatus::Cancelled));
    assert!(cancelled.iter().all(|ticket| ticket.owner == fan.identity));
    assert_eq!(h.sold(event).await, 2, "written-off units stay sold");

    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Voided);

    let replay = h.engine.purchase(request).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.tickets, cancelled);
}

#[tokio::test]
async fn test_void_unissued_ignores_refused_purchase() {
    let h = harness();
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    h.engine
        .set_active(&h.organizer, event.0, event.1, false)
        .await
        .unwrap();
    let request = PurchaseRequest::new(PurchaseId::new("order-refused"), event.0, event.1, 1, fan);

    assert!(h.engine.purchase(request.clone()).await.is_err());
    assert_eq!(h.engine.ledger().reservation_for(&request.purchase_id).await.unwrap(), None);
    assert!(
        h.engine
            .void_unissued(&h.organizer, &request.purchase_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.sold(event).await, 0);
}

#[tokio::test]
async fn test_caller_that_stops_waiting_still_gets_its_tickets() {
    let store = GatedTicketStore::closed();
    let h = harness_with(test_config(), Arc::new(test_clock()), Some(Arc::new(store.clone())));
    let fan = h.buyer("Fan");
    let event = h.event(10).await;
    let request = PurchaseRequest::new(PurchaseId::new("order-walked-away"), event.0, event.1, 3, fan);

    // Issuance is held at the ticket store, so the caller times out after the reservation
    let abandoned = tokio::time::timeout(StdDuration::from_millis(50), h.engine.purchase(request.clone())).await;
    assert!(abandoned.is_err(), "the caller gave up before issuance finished");
    assert_eq!(h.sold(event).await, 3);
    let record = h.engine.purchase_record(&request.purchase_id).await.unwrap().unwrap();
    assert_eq!(record.state, PurchaseState::Reserved);

    store.open();

    let mut state = record.state;
    for _ in 0..500 {
        state = h
            .engine
            .purchase_record(&request.purchase_id)
            .await
            .unwrap()
            .unwrap()
            .state;
        if state == PurchaseState::Completed {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(2)).await;
    }
    assert_eq!(state, PurchaseState::Completed, "the detached work finished on its own");
    assert_eq!(h.engine.tickets_owned_by(fan.identity).await.unwrap().len(), 3);

    let replay = h.engine.purchase(request).await.unwrap();
    assert!(replay.replayed);
    assert!(replay.is_complete());
    assert_eq!(replay.tickets.len(), 3);
    assert_eq!(h.sold(event).await, 3);
}
