//! Idempotency and at-most-once credit under concurrent callers.

mod harness;

use bima_core::payments::SettleOutcome;
use bima_core::wallet;
use common::constants::DEPOSIT_AMOUNT;
use common::enums::TransactionStatus;
use harness::{success_callback, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initiations_share_one_request() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let payments = harness.payments.clone();
        handles.push(tokio::spawn(async move {
            payments
                .initiate_deposit(rider_id, "0712345001", "dep-K-1")
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let initiated = handle.await.unwrap().unwrap();
        ids.push(initiated.request.id);
    }

    // Every caller got the same request back, and only one row exists.
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);
    harness
        .store
        .read(|state| assert_eq!(state.payment_requests.len(), 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callbacks_and_polls_credit_exactly_once() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);

    let initiated = harness
        .payments
        .initiate_deposit(rider_id, "0712345001", "dep-K-1")
        .await
        .unwrap();
    let request_id = initiated.request.id;
    let checkout_id = harness.gateway.last_checkout_id().unwrap();
    harness.gateway.script_status(
        &checkout_id,
        [bima_api::models::PaymentResult::Success {
            receipt: "RCPT-001".to_owned(),
        }],
    );

    // M duplicate callbacks interleaved with K reconciler-style polls.
    let mut handles = Vec::new();
    for _ in 0..5 {
        let payments = harness.payments.clone();
        let payload = success_callback(&checkout_id, "RCPT-001");
        handles.push(tokio::spawn(async move {
            payments.handle_callback(payload).await
        }));
    }
    for _ in 0..3 {
        let payments = harness.payments.clone();
        handles.push(tokio::spawn(async move {
            payments.refresh_payment_status(request_id).await
        }));
    }

    let mut settled = 0;
    for handle in handles {
        let (outcome, events) = handle.await.unwrap().unwrap();
        if matches!(outcome, SettleOutcome::Settled { .. }) {
            settled += 1;
            harness.dispatcher.dispatch(events).await;
        } else {
            assert!(events.is_empty(), "losers must commit nothing");
        }
    }
    assert_eq!(settled, 1, "exactly one writer settles");

    harness.store.read(|state| {
        let completed = state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .count();
        assert_eq!(completed, 1);
        assert_eq!(state.journal.len(), 1);
        let (debits, credits) = state.trial_balance();
        assert_eq!(debits, credits);
    });

    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
    assert_eq!(wallet.total_deposited, DEPOSIT_AMOUNT);

    // Only one pending policy came out of the fan-in.
    harness
        .store
        .read(|state| assert_eq!(state.policies.len(), 1));
}

#[tokio::test]
async fn wallet_counters_are_monotonic() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);
    harness.complete_deposit(rider_id, "dep-1", "RCPT-001").await;

    let mut last_count = 0;
    let mut last_deposited = common::money::Amount::ZERO;
    for day in 1..=30u16 {
        let key = format!("day-{day}");
        harness
            .payments
            .initiate_daily_payment(rider_id, "0712345001", &key, 1)
            .await
            .unwrap();
        let checkout_id = harness.gateway.last_checkout_id().unwrap();
        harness
            .callback(success_callback(
                &checkout_id,
                &format!("RCPT-D{day:02}"),
            ))
            .await;

        let wallet = wallet::read(&harness.store, wallet_id).unwrap();
        assert!(wallet.daily_payments_count > last_count);
        assert!(wallet.total_deposited > last_deposited);
        assert_eq!(
            wallet.balance,
            wallet.total_deposited - wallet.total_paid,
        );
        last_count = wallet.daily_payments_count;
        last_deposited = wallet.total_deposited;
    }

    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert!(wallet.daily_payments_completed);
    assert_eq!(wallet.daily_payments_count, 30);
}
