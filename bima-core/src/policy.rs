//! Policy lifecycle beyond issuance: free-look cancellation and expiry.

use std::sync::{Arc, Mutex};

use common::constants::REVERSAL_FEE_BPS;
use common::enums::{PolicyStatus, RefundStatus};
use common::ids::{PolicyId, RefundId, RiderId, TransactionId};
use common::rng::Crng;
use common::time::TimestampMs;
use tracing::{info, instrument};

use crate::error::Error;
use crate::events::DomainEvent;
use crate::ledger;
use crate::models::policy::RiderRefund;
use crate::store::Store;

/// How close to `coverage_end` a policy flips to EXPIRING.
const EXPIRING_WINDOW_DAYS: u32 = 7;

pub struct PolicyService {
    store: Arc<Store>,
    rng: Mutex<Box<dyn Crng + Send>>,
}

impl PolicyService {
    pub fn new(store: Arc<Store>, rng: Box<dyn Crng + Send>) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    /// Cancel a policy inside the free-look window.
    ///
    /// The rider gets 90% of the premium back; the 10% reversal fee is
    /// retained as platform income. The refund row, the policy status, and
    /// the journal entry commit atomically.
    #[instrument(skip_all, name = "(cancel-policy)")]
    pub fn cancel_free_look(
        &self,
        policy_id: PolicyId,
        rider_id: RiderId,
        reason: &str,
        now: TimestampMs,
    ) -> Result<(RiderRefund, Vec<DomainEvent>), Error> {
        let mut rng = self.rng.lock().unwrap();
        let refund_id = RefundId::from_rng(&mut *rng);
        let reversal_tx_id = TransactionId::from_rng(&mut *rng);

        let (refund, events) = self.store.transact(|state| {
            let policy = state.policy(policy_id)?;
            if policy.rider_id != rider_id {
                return Err(Error::not_found("policy", policy_id));
            }
            policy.check_cancellable(now)?;

            let premium = policy.premium_amount;
            let policy_number = policy
                .policy_number
                .clone()
                .expect("in-force policies always have a number");
            let triggering_tx = policy.triggering_transaction_id;
            let (reversal_fee, refund_amount) =
                premium.split_bps(REVERSAL_FEE_BPS);

            let policy = state.policy_mut(policy_id)?;
            policy.status = PolicyStatus::Cancelled;
            policy.cancelled_at = Some(now);
            policy.cancellation_reason = Some(reason.to_owned());

            // The reversal is recorded as its own transaction against the
            // original; the original stays immutable.
            let original = state.transaction(triggering_tx)?.clone();
            let reversal = original.reversal_of(reversal_tx_id, now)?;
            state.insert_transaction(reversal)?;

            let refund = RiderRefund {
                id: refund_id,
                rider_id,
                policy_id,
                refund_amount,
                reversal_fee,
                status: RefundStatus::Pending,
                reason: reason.to_owned(),
                created_at: now,
            };
            state.refunds.insert(refund_id, refund.clone());

            ledger::post_free_look_cancellation(
                state,
                &mut *rng,
                premium,
                refund_amount,
                reversal_fee,
                reversal_tx_id,
                &policy_number,
                now,
            )?;

            state.emit(DomainEvent::PolicyCancelled {
                policy_id,
                rider_id,
                refund_id,
            });
            Ok(refund)
        })?;

        info!(
            policy = %policy_id.short(),
            refund = %refund.refund_amount,
            "policy cancelled in free-look",
        );
        Ok((refund, events))
    }

    /// Sweep coverage windows: ACTIVE policies entering their final week
    /// flip to EXPIRING; policies past `coverage_end` flip to EXPIRED.
    /// Returns how many rows changed.
    #[instrument(skip_all, name = "(policy-expiry-sweep)")]
    pub fn expire_due(&self, now: TimestampMs) -> Result<usize, Error> {
        let expiring_cutoff =
            now.add_days(EXPIRING_WINDOW_DAYS);
        let (changed, _) = self.store.transact(|state| {
            let mut changed = 0;
            for policy in state.policies.values_mut() {
                let Some(end) = policy.coverage_end else {
                    continue;
                };
                let next = if end <= now {
                    PolicyStatus::Expired
                } else if end <= expiring_cutoff {
                    PolicyStatus::Expiring
                } else {
                    continue;
                };
                if policy.status.is_in_force() && policy.status != next {
                    policy.status = next;
                    changed += 1;
                }
            }
            Ok(changed)
        })?;
        Ok(changed)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use common::constants::DEPOSIT_AMOUNT;
    use common::enums::PolicyType;
    use common::ids::{BatchId, WalletId};
    use common::money::Amount;
    use common::rng::SmallRng;

    use super::*;
    use crate::error::Precondition;
    use crate::ledger::accounts;
    use crate::models::payment::Transaction;
    use crate::models::policy::Policy;
    use crate::testing;

    fn service(store: &Arc<Store>) -> PolicyService {
        PolicyService::new(store.clone(), Box::new(SmallRng::from_u64(3)))
    }

    /// Seed an active one-month policy whose premium has been collected
    /// and earned, so cancellation starts from a realistic ledger.
    fn seed_active_policy(
        store: &Arc<Store>,
        rider_id: RiderId,
        coverage_start: TimestampMs,
    ) -> PolicyId {
        let policy_id = PolicyId::from_u8(40);
        let tx_id = TransactionId::from_u8(41);
        let mut rng = SmallRng::from_u64(17);
        store.must_transact(|state| {
            state
                .insert_transaction(Transaction {
                    id: tx_id,
                    rider_id,
                    wallet_id: WalletId::from_u8(1),
                    tx_type: common::enums::TransactionType::Deposit,
                    status: common::enums::TransactionStatus::Completed,
                    amount: DEPOSIT_AMOUNT,
                    receipt_number: Some("RCPT-CXL".to_owned()),
                    payment_request_id: None,
                    policy_id: Some(policy_id),
                    metadata: serde_json::json!({}),
                    settled_at: coverage_start,
                    created_at: coverage_start,
                })
                .unwrap();

            let mut policy = Policy::new_pending(
                policy_id,
                rider_id,
                PolicyType::OneMonth,
                tx_id,
                DEPOSIT_AMOUNT,
                coverage_start,
            );
            policy.status = PolicyStatus::Processing;
            policy
                .activate(
                    "B202603051-0001".to_owned(),
                    BatchId::from_u8(1),
                    coverage_start,
                    coverage_start,
                )
                .unwrap();
            state.insert_policy(policy);

            ledger::post_premium_collected(
                state,
                &mut rng,
                "DEPOSIT_SETTLED",
                DEPOSIT_AMOUNT,
                tx_id,
                coverage_start,
            )
        });
        policy_id
    }

    #[test]
    fn free_look_cancellation_splits_refund_and_fee() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let start = TimestampMs::from_i64(1_750_000_000_000).unwrap();
        let policy_id = seed_active_policy(&store, rider_id, start);
        let service = service(&store);

        let five_days = start.saturating_add(Duration::from_secs(5 * 86_400));
        let (refund, events) = service
            .cancel_free_look(policy_id, rider_id, "changed mind", five_days)
            .unwrap();

        // 90% back, 10% fee.
        assert_eq!(refund.refund_amount, Amount::from_minor(94_320));
        assert_eq!(refund.reversal_fee, Amount::from_minor(10_480));
        assert_eq!(refund.status, RefundStatus::Pending);
        assert!(matches!(
            events.as_slice(),
            [DomainEvent::PolicyCancelled { .. }],
        ));

        store.read(|state| {
            let policy = &state.policies[&policy_id];
            assert_eq!(policy.status, PolicyStatus::Cancelled);
            assert_eq!(
                policy.cancellation_reason.as_deref(),
                Some("changed mind"),
            );

            // Fee retained as income, refund owed to the rider.
            assert_eq!(
                state.accounts[accounts::FEE_INCOME].balance,
                Amount::from_minor(10_480),
            );
            let (debits, credits) = state.trial_balance();
            assert_eq!(debits, credits);

            // A reversal transaction exists alongside the original.
            assert_eq!(state.transactions.len(), 2);
        });
    }

    #[test]
    fn cancellation_outside_window_fails_without_side_effects() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let start = TimestampMs::from_i64(1_750_000_000_000).unwrap();
        let policy_id = seed_active_policy(&store, rider_id, start);
        let service = service(&store);

        let late = start.saturating_add(Duration::from_secs(31 * 86_400));
        let err = service
            .cancel_free_look(policy_id, rider_id, "changed mind", late)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Precondition(Precondition::FreeLookExpired),
        ));

        store.read(|state| {
            assert_eq!(
                state.policies[&policy_id].status,
                PolicyStatus::Active,
            );
            assert!(state.refunds.is_empty());
        });
    }

    #[test]
    fn expiry_sweep() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let start = TimestampMs::from_i64(1_750_000_000_000).unwrap();
        let policy_id = seed_active_policy(&store, rider_id, start);
        let service = service(&store);

        // Mid-coverage: nothing changes.
        let mid = start.add_days(10);
        assert_eq!(service.expire_due(mid).unwrap(), 0);

        // Final week: EXPIRING.
        let end = store.read(|s| s.policies[&policy_id].coverage_end.unwrap());
        let near_end = end.saturating_sub(Duration::from_secs(3 * 86_400));
        assert_eq!(service.expire_due(near_end).unwrap(), 1);
        store.read(|s| {
            assert_eq!(s.policies[&policy_id].status, PolicyStatus::Expiring);
        });

        // Past the end: EXPIRED.
        let past = end.saturating_add(Duration::from_secs(86_400));
        assert_eq!(service.expire_due(past).unwrap(), 1);
        store.read(|s| {
            assert_eq!(s.policies[&policy_id].status, PolicyStatus::Expired);
        });
    }
}
