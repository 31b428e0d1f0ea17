//! Free-look cancellation end to end.

mod harness;

use std::time::Duration;

use common::enums::{
    BatchSchedule, NotifyEvent, PolicyStatus, RefundStatus,
};
use common::money::Amount;
use common::time::TimestampMs;
use harness::Harness;

#[tokio::test]
async fn free_look_cancellation_flow() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);

    harness.complete_deposit(rider_id, "dep-1", "RCPT-001").await;
    let day1 = TimestampMs::now().add_days(1);
    let batch = harness.run_batch(BatchSchedule::Batch1, day1).await;
    let policy_id = harness.store.read(|state| {
        state.policies.values().next().map(|p| p.id).unwrap()
    });

    // Five days into coverage, the rider changes their mind.
    let five_days_in = batch
        .scheduled_for
        .saturating_add(Duration::from_secs(5 * 86_400));
    let (refund, events) = harness
        .policy
        .cancel_free_look(policy_id, rider_id, "changed mind", five_days_in)
        .unwrap();
    harness.dispatcher.dispatch(events).await;

    assert_eq!(refund.refund_amount, Amount::from_minor(94_320));
    assert_eq!(refund.reversal_fee, Amount::from_minor(10_480));
    assert_eq!(refund.status, RefundStatus::Pending);

    harness.store.read(|state| {
        assert_eq!(
            state.policies[&policy_id].status,
            PolicyStatus::Cancelled,
        );

        // Ledger stays balanced through collect, earn, and cancel.
        let (debits, credits) = state.trial_balance();
        assert_eq!(debits, credits);

        // The rider was notified with the refund amount.
        assert!(state.notifications.values().any(|n| {
            n.event == NotifyEvent::PolicyCancelled
                && n.body.contains("943.20")
        }));
    });
}

#[tokio::test]
async fn cancellation_boundary_is_thirty_days() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);

    harness.complete_deposit(rider_id, "dep-1", "RCPT-001").await;
    let day1 = TimestampMs::now().add_days(1);
    let batch = harness.run_batch(BatchSchedule::Batch1, day1).await;
    let policy_id = harness.store.read(|state| {
        state.policies.values().next().map(|p| p.id).unwrap()
    });

    let window = Duration::from_secs(30 * 86_400);
    let just_late = batch
        .scheduled_for
        .saturating_add(window)
        .saturating_add(Duration::from_millis(1));
    let err = harness
        .policy
        .cancel_free_look(policy_id, rider_id, "too late", just_late)
        .unwrap_err();
    assert!(matches!(
        err,
        bima_core::error::Error::Precondition(
            bima_core::error::Precondition::FreeLookExpired,
        ),
    ));

    // Right at the edge it still goes through.
    let just_inside = batch
        .scheduled_for
        .saturating_add(window)
        .saturating_sub(Duration::from_millis(1));
    harness
        .policy
        .cancel_free_look(policy_id, rider_id, "in time", just_inside)
        .unwrap();
}
