//! Delayed-payment reconciliation: provider never calls back, the
//! reconciler polls it to resolution or to TIMEOUT.

mod harness;

use std::time::Duration;

use bima_api::models::PaymentResult;
use bima_core::wallet;
use common::constants::DEPOSIT_AMOUNT;
use common::enums::{NotifyEvent, PaymentRequestStatus};
use common::time::TimestampMs;
use harness::{success_callback, Harness};

#[tokio::test]
async fn reconciler_settles_after_delayed_success() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);

    harness
        .payments
        .initiate_deposit(rider_id, "0712345001", "dep-1")
        .await
        .unwrap();
    let checkout_id = harness.gateway.last_checkout_id().unwrap();

    // No callback ever arrives; the provider reports pending twice, then
    // success with a receipt.
    harness.gateway.script_status(
        &checkout_id,
        [
            PaymentResult::Pending,
            PaymentResult::Pending,
            PaymentResult::Success {
                receipt: "RCPT-042".to_owned(),
            },
        ],
    );

    let t0 = TimestampMs::now();

    // First poll (after the inline window): still pending, re-enqueued.
    let ran = harness
        .reconciler
        .process_due(t0.saturating_add(Duration::from_secs(40)))
        .await
        .unwrap();
    assert_eq!(ran, 1);
    harness.store.read(|state| {
        let req = state.request_by_checkout_id(&checkout_id).unwrap();
        assert_eq!(req.status, PaymentRequestStatus::Sent);
    });

    // Second poll: still pending.
    harness
        .reconciler
        .process_due(t0.saturating_add(Duration::from_secs(150)))
        .await
        .unwrap();

    // Third poll resolves it.
    harness
        .reconciler
        .process_due(t0.saturating_add(Duration::from_secs(400)))
        .await
        .unwrap();

    harness.store.read(|state| {
        let req = state.request_by_checkout_id(&checkout_id).unwrap();
        assert_eq!(req.status, PaymentRequestStatus::Completed);

        // Exactly one COMPLETED transaction carrying the poll receipt.
        assert_eq!(state.transactions.len(), 1);
        let tx = state.transactions.values().next().unwrap();
        assert_eq!(tx.receipt_number.as_deref(), Some("RCPT-042"));
    });
    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
    assert!(wallet.deposit_completed);
}

#[tokio::test]
async fn late_callback_after_reconciler_is_recorded_without_effects() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);

    harness
        .payments
        .initiate_deposit(rider_id, "0712345001", "dep-1")
        .await
        .unwrap();
    let checkout_id = harness.gateway.last_checkout_id().unwrap();
    harness.gateway.script_status(
        &checkout_id,
        [PaymentResult::Success {
            receipt: "RCPT-042".to_owned(),
        }],
    );

    let t0 = TimestampMs::now();
    harness
        .reconciler
        .process_due(t0.saturating_add(Duration::from_secs(40)))
        .await
        .unwrap();

    // The provider's own callback straggles in afterwards.
    let outcome = harness
        .callback(success_callback(&checkout_id, "RCPT-042"))
        .await;
    assert_eq!(
        outcome,
        bima_core::payments::SettleOutcome::AlreadyTerminal,
    );

    harness.store.read(|state| {
        assert_eq!(state.transactions.len(), 1);
        let req = state.request_by_checkout_id(&checkout_id).unwrap();
        // The late payload was stored for audit.
        assert!(req.raw_callback.is_some());
    });
    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
}

#[tokio::test]
async fn unresolvable_request_times_out_and_flags_manual_review() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);

    harness
        .payments
        .initiate_deposit(rider_id, "0712345001", "dep-1")
        .await
        .unwrap();
    let checkout_id = harness.gateway.last_checkout_id().unwrap();
    harness
        .gateway
        .script_status(&checkout_id, [PaymentResult::Pending]);

    // Drive passes far enough apart that every job is due when we look.
    let mut now = TimestampMs::now();
    for _ in 0..10 {
        now = now.add_days(1);
        harness.reconciler.process_due(now).await.unwrap();
        let terminal = harness.store.read(|state| {
            state
                .request_by_checkout_id(&checkout_id)
                .unwrap()
                .is_terminal()
        });
        if terminal {
            break;
        }
    }

    harness.store.read(|state| {
        let req = state.request_by_checkout_id(&checkout_id).unwrap();
        assert_eq!(req.status, PaymentRequestStatus::Timeout);
        assert_eq!(state.transactions.len(), 0);

        // Rider was told manual review is underway.
        assert!(state.notifications.values().any(|n| {
            n.event == NotifyEvent::ManualReviewRequired
        }));
    });
    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert!(!wallet.deposit_completed);
}
