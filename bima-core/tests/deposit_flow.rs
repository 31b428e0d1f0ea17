//! Happy deposit through one-month policy issuance, plus duplicate
//! callback delivery.

mod harness;

use bima_core::payments::SettleOutcome;
use bima_core::wallet;
use common::constants::DEPOSIT_AMOUNT;
use common::enums::{
    BatchSchedule, BatchStatus, NotifyEvent, PolicyStatus, PolicyType,
};
use common::time::TimestampMs;
use harness::{success_callback, Harness};

#[tokio::test]
async fn deposit_to_active_one_month_policy() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);

    harness.complete_deposit(rider_id, "dep-K-1", "RCPT-001").await;

    // Before the next batch window: wallet credited, one pending policy.
    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
    assert!(wallet.deposit_completed);
    assert_eq!(wallet.daily_payments_count, 0);

    harness.store.read(|state| {
        assert_eq!(state.policies.len(), 1);
        let policy = state.policies.values().next().unwrap();
        assert_eq!(policy.policy_type, PolicyType::OneMonth);
        assert_eq!(policy.status, PolicyStatus::PendingIssuance);
        assert!(policy.policy_number.is_none());
    });

    // Deposit confirmation went out over SMS.
    let sent = harness.sms_primary.sent();
    assert!(sent.iter().any(|(_, body)| body.contains("1048.00")));

    // BATCH_1 tomorrow claims and activates the policy.
    let tomorrow = TimestampMs::now().add_days(1);
    let batch = harness.run_batch(BatchSchedule::Batch1, tomorrow).await;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.issued_count, 1);
    assert_eq!(batch.total_premium, DEPOSIT_AMOUNT);

    harness.store.read(|state| {
        let policy = state.policies.values().next().unwrap();
        assert_eq!(policy.status, PolicyStatus::Active);
        let number = policy.policy_number.as_ref().expect("number assigned");
        assert!(number.starts_with(&batch.batch_number));
        assert_eq!(policy.coverage_start, Some(batch.scheduled_for));
        assert_eq!(
            policy.coverage_end,
            Some(batch.scheduled_for.add_months(1)),
        );
        assert_eq!(policy.batch_id, Some(batch.id));
    });

    // Certificate stored and shipped; POLICY_ISSUED notification sent.
    assert_eq!(harness.whatsapp.documents().len(), 1);
    harness.store.read(|state| {
        assert!(state.notifications.values().any(|n| {
            n.event == NotifyEvent::PolicyIssued
                && n.body.contains("ACTIVE")
        }));
    });
}

#[tokio::test]
async fn duplicate_callback_changes_nothing() {
    let harness = Harness::new();
    let (rider_id, wallet_id) = harness.seed_rider(1);

    harness.complete_deposit(rider_id, "dep-K-1", "RCPT-001").await;
    let checkout_id = harness.gateway.last_checkout_id().unwrap();

    let (transactions, journal_entries) = harness
        .store
        .read(|state| (state.transactions.len(), state.journal.len()));

    // The provider re-sends the success callback.
    let outcome = harness
        .callback(success_callback(&checkout_id, "RCPT-001"))
        .await;
    assert_eq!(outcome, SettleOutcome::AlreadyTerminal);

    harness.store.read(|state| {
        assert_eq!(state.transactions.len(), transactions);
        assert_eq!(state.journal.len(), journal_entries);
        assert_eq!(state.policies.len(), 1);
    });
    let wallet = wallet::read(&harness.store, wallet_id).unwrap();
    assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
}
