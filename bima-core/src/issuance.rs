//! Issuance planner: wallet events to pending policies.
//!
//! Deterministically translates `DEPOSIT_COMPLETED` into a pending
//! one-month policy and `DAILY_CYCLE_COMPLETED` into a pending eleven-month
//! policy. Creation is keyed on `(rider, triggering transaction)`: the
//! event bus is at-least-once, so a replayed event finds the existing
//! policy and does nothing.

use std::sync::{Arc, Mutex};

use common::constants::{DAILY_AMOUNT, DAYS_REQUIRED, DEPOSIT_AMOUNT};
use common::enums::PolicyType;
use common::ids::{PolicyId, RiderId, TransactionId};
use common::money::Amount;
use common::rng::Crng;
use common::time::TimestampMs;
use tracing::{info, instrument};

use crate::error::Error;
use crate::events::DomainEvent;
use crate::models::policy::Policy;
use crate::store::Store;

pub struct IssuancePlanner {
    store: Arc<Store>,
    rng: Mutex<Box<dyn Crng + Send>>,
}

impl IssuancePlanner {
    pub fn new(store: Arc<Store>, rng: Box<dyn Crng + Send>) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    /// Consume one committed wallet event. Returns the pending policy id if
    /// one was created.
    #[instrument(skip_all, name = "(issuance-planner)")]
    pub fn handle(
        &self,
        event: &DomainEvent,
    ) -> Result<Option<PolicyId>, Error> {
        match event {
            DomainEvent::DepositCompleted {
                rider_id,
                transaction_id,
                ..
            } => self.create_pending(
                *rider_id,
                *transaction_id,
                PolicyType::OneMonth,
                DEPOSIT_AMOUNT,
            ),
            DomainEvent::DailyCycleCompleted {
                rider_id,
                transaction_id,
                ..
            } => {
                let premium = DAILY_AMOUNT
                    .checked_mul(i64::from(DAYS_REQUIRED))
                    .expect("30 daily premiums fit in an i64");
                self.create_pending(
                    *rider_id,
                    *transaction_id,
                    PolicyType::ElevenMonth,
                    premium,
                )
            }
            _ => Ok(None),
        }
    }

    fn create_pending(
        &self,
        rider_id: RiderId,
        transaction_id: TransactionId,
        policy_type: PolicyType,
        premium: Amount,
    ) -> Result<Option<PolicyId>, Error> {
        let now = TimestampMs::now();
        let mut rng = self.rng.lock().unwrap();
        let policy_id = PolicyId::from_rng(&mut *rng);

        let (created, _) = self.store.transact(|state| {
            // Idempotency: one policy per triggering transaction.
            if state.policy_by_trigger(rider_id, transaction_id).is_some() {
                return Ok(None);
            }

            let mut policy = Policy::new_pending(
                policy_id,
                rider_id,
                policy_type,
                transaction_id,
                premium,
                now,
            );

            // The eleven-month policy continues the rider's one-month
            // policy; link the chain in both directions.
            if policy_type == PolicyType::ElevenMonth {
                let previous = state
                    .in_force_policy(rider_id, PolicyType::OneMonth)
                    .map(|p| p.id);
                if let Some(previous_id) = previous {
                    policy.previous_policy_id = Some(previous_id);
                    state.policy_mut(previous_id)?.next_policy_id =
                        Some(policy_id);
                }
            }

            state.insert_policy(policy);

            // Weak back-reference from the triggering transaction.
            if let Some(tx) = state.transactions.get_mut(&transaction_id) {
                tx.policy_id = Some(policy_id);
            }

            Ok(Some(policy_id))
        })?;

        if created.is_some() {
            info!(
                rider = %rider_id.short(),
                policy = %policy_id.short(),
                ?policy_type,
                "created pending policy",
            );
        }
        Ok(created)
    }
}
