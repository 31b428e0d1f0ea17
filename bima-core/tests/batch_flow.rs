//! Batch exclusivity, deterministic numbering, and failure retry.

mod harness;

use std::sync::Arc;

use bima_core::batch::{BatchConfig, BatchProcessor};
use bima_core::error::{Conflict, Error};
use common::enums::{BatchSchedule, BatchStatus, PolicyStatus};
use common::money::Amount;
use common::rng::SmallRng;
use common::time::TimestampMs;
use harness::Harness;

#[tokio::test]
async fn same_batch_key_runs_at_most_once() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);
    harness.complete_deposit(rider_id, "dep-1", "RCPT-001").await;

    let now = TimestampMs::now().add_days(1);
    harness.run_batch(BatchSchedule::Batch2, now).await;

    // A second invocation of the same (batch_date, schedule) conflicts
    // without touching any policy.
    let err = harness
        .batch
        .process_batch(BatchSchedule::Batch2, now)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Conflict(Conflict::BatchAlreadyRun { .. }),
    ));
    harness.store.read(|state| {
        assert_eq!(state.batches.len(), 1);
        assert!(state
            .policies
            .values()
            .all(|p| p.status == PolicyStatus::Active));
    });
}

#[tokio::test]
async fn concurrent_same_key_runs_one_wins() {
    let harness = Harness::new();
    for i in 1..=3u8 {
        let (rider_id, _) = harness.seed_rider(i);
        harness
            .complete_deposit(rider_id, &format!("dep-{i}"), &format!("R-{i}"))
            .await;
    }

    // Two processors (as if two service instances) race on the same
    // (batch_date, schedule) key.
    let other = Arc::new(BatchProcessor::new(
        harness.store.clone(),
        Box::new(SmallRng::from_u64(77)),
        BatchConfig::default(),
    ));
    let now = TimestampMs::now().add_days(1);

    let a = {
        let processor = Arc::new(BatchProcessor::new(
            harness.store.clone(),
            Box::new(SmallRng::from_u64(78)),
            BatchConfig::default(),
        ));
        tokio::task::spawn_blocking(move || {
            processor.process_batch(BatchSchedule::Batch1, now)
        })
    };
    let b = {
        let other = other.clone();
        tokio::task::spawn_blocking(move || {
            other.process_batch(BatchSchedule::Batch1, now)
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let conflicted = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(Error::Conflict(Conflict::BatchAlreadyRun { .. })),
            )
        })
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(conflicted, 1);

    harness.store.read(|state| {
        assert_eq!(state.batches.len(), 1);
        assert_eq!(
            state
                .policies
                .values()
                .filter(|p| p.status == PolicyStatus::Active)
                .count(),
            3,
        );
    });
}

#[tokio::test]
async fn policy_numbers_are_unique_and_deterministic() {
    let harness = Harness::new();
    for i in 1..=3u8 {
        let (rider_id, _) = harness.seed_rider(i);
        harness
            .complete_deposit(rider_id, &format!("dep-{i}"), &format!("R-{i}"))
            .await;
    }

    let now = TimestampMs::now().add_days(1);
    let batch = harness.run_batch(BatchSchedule::Batch3, now).await;
    assert_eq!(batch.issued_count, 3);

    harness.store.read(|state| {
        let mut numbers: Vec<String> = state
            .policies
            .values()
            .map(|p| p.policy_number.clone().unwrap())
            .collect();
        numbers.sort();
        let expected: Vec<String> = (1..=3)
            .map(|seq| format!("{}-{seq:04}", batch.batch_number))
            .collect();
        assert_eq!(numbers, expected);

        // Every activated policy starts coverage at the batch's scheduled
        // time.
        for policy in state.policies.values() {
            assert_eq!(policy.coverage_start, Some(batch.scheduled_for));
        }
    });
}

#[tokio::test]
async fn failed_policy_is_isolated_and_retryable() {
    let harness = Harness::new();
    for i in 1..=2u8 {
        let (rider_id, _) = harness.seed_rider(i);
        harness
            .complete_deposit(rider_id, &format!("dep-{i}"), &format!("R-{i}"))
            .await;
    }

    // Corrupt one pending policy so its journal entry is unbalanced at
    // activation time.
    let victim = harness.store.read(|state| {
        state.policies.values().next().map(|p| p.id).unwrap()
    });
    harness.store.must_transact(|state| {
        state.policy_mut(victim)?.premium_amount = Amount::from_minor(-1);
        Ok(())
    });

    let now = TimestampMs::now().add_days(1);
    let batch = harness.run_batch(BatchSchedule::Batch1, now).await;
    assert_eq!(batch.status, BatchStatus::CompletedWithErrors);
    assert_eq!(batch.issued_count, 1);
    assert_eq!(batch.failed_count, 1);
    assert_eq!(batch.failed_policies.len(), 1);
    assert_eq!(batch.failed_policies[0].0, victim);

    // The healthy policy activated despite its neighbour failing.
    harness.store.read(|state| {
        assert_eq!(
            state
                .policies
                .values()
                .filter(|p| p.status == PolicyStatus::Active)
                .count(),
            1,
        );
        assert_eq!(
            state.policies[&victim].status,
            PolicyStatus::Processing,
        );
    });

    // Fix the data and retry just the failed subset.
    harness.store.must_transact(|state| {
        state.policy_mut(victim)?.premium_amount =
            common::constants::DEPOSIT_AMOUNT;
        Ok(())
    });
    let (batch, events) = harness.batch.retry_failed(batch.id).unwrap();
    harness.dispatcher.dispatch(events).await;

    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.failed_count, 0);
    assert_eq!(batch.issued_count, 2);
    harness.store.read(|state| {
        let policy = &state.policies[&victim];
        assert_eq!(policy.status, PolicyStatus::Active);
        assert!(policy.policy_number.is_some());
        let (debits, credits) = state.trial_balance();
        assert_eq!(debits, credits);
    });
}
