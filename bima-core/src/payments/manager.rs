//! The payments state machine driver.
//!
//! Every state update runs as one store transaction gated by the request
//! row's optimistic version: whichever of (provider callback, reconciler
//! poll) flips a non-terminal status to terminal first wins, and the loser
//! commits nothing. The wallet credit, the settled transaction, the journal
//! entry, and the outbox events all ride in the winner's transaction, which
//! is what makes the credit exactly-once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bima_api::models::{PaymentCallback, PaymentResult, PushRequest};
use bima_api::traits::MobileMoneyApi;
use common::constants::{
    DAILY_AMOUNT, DAYS_REQUIRED, DEPOSIT_AMOUNT, INLINE_POLL_TIMEOUT,
    PAYMENT_REQUEST_TTL, RECONCILER_MAX_ATTEMPTS, WALLET_CAS_RETRIES,
};
use common::enums::{
    InitiateCode, PaymentRequestStatus, PaymentType, TransactionStatus,
    TransactionType,
};
use common::ids::{JobId, PaymentRequestId, RiderId, TransactionId};
use common::phone::PhoneNumber;
use common::rng::Crng;
use common::time::TimestampMs;
use tracing::{info, instrument, warn};

use crate::error::{Conflict, Error, Precondition};
use crate::events::DomainEvent;
use crate::jobs::{Job, JobKind, JobStatus};
use crate::ledger;
use crate::models::payment::{PaymentRequest, Transaction};
use crate::payments::{Initiated, SettleOutcome};
use crate::store::Store;
use crate::wallet;

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    /// How long to wait for the provider callback before the first
    /// reconciler poll.
    pub inline_poll_timeout: Duration,
    /// Absolute cutoff after which the reconciler may force TIMEOUT.
    pub request_ttl: Duration,
    pub reconciler_max_attempts: u32,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            inline_poll_timeout: INLINE_POLL_TIMEOUT,
            request_ttl: PAYMENT_REQUEST_TTL,
            reconciler_max_attempts: RECONCILER_MAX_ATTEMPTS,
        }
    }
}

/// The top-level payments actor. Cloneable via [`Arc`]; all shared state
/// lives in the store.
pub struct PaymentsManager {
    store: Arc<Store>,
    gateway: Arc<dyn MobileMoneyApi>,
    rng: Mutex<Box<dyn Crng + Send>>,
    config: PaymentsConfig,
}

impl PaymentsManager {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn MobileMoneyApi>,
        rng: Box<dyn Crng + Send>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            rng: Mutex::new(rng),
            config,
        }
    }

    pub fn config(&self) -> &PaymentsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // --- Initiation --- //

    /// Initiate the one-off deposit push.
    ///
    /// Preconditions: rider is active, accepted terms, KYC approved, and
    /// has not completed a deposit. A repeated call with the same
    /// `idempotency_key` returns the original request unchanged.
    #[instrument(skip_all, name = "(initiate-deposit)")]
    pub async fn initiate_deposit(
        &self,
        rider_id: RiderId,
        phone: &str,
        idempotency_key: &str,
    ) -> Result<Initiated, Error> {
        self.initiate(
            rider_id,
            phone,
            idempotency_key,
            PaymentType::Deposit,
            1,
        )
        .await
    }

    /// Initiate a daily payment push covering `days_count` days.
    ///
    /// Preconditions: deposit completed, `days_count` in `[1, 30]`, and the
    /// wallet counter plus `days_count` must not exceed 30.
    #[instrument(skip_all, name = "(initiate-daily)")]
    pub async fn initiate_daily_payment(
        &self,
        rider_id: RiderId,
        phone: &str,
        idempotency_key: &str,
        days_count: u16,
    ) -> Result<Initiated, Error> {
        if days_count == 0 || days_count > DAYS_REQUIRED {
            return Err(Error::Validation(format!(
                "days_count must be in [1, 30], got {days_count}"
            )));
        }
        self.initiate(
            rider_id,
            phone,
            idempotency_key,
            PaymentType::DailyPayment,
            days_count,
        )
        .await
    }

    async fn initiate(
        &self,
        rider_id: RiderId,
        phone: &str,
        idempotency_key: &str,
        payment_type: PaymentType,
        days_count: u16,
    ) -> Result<Initiated, Error> {
        // Idempotent replay: same key returns the original request. A
        // request that never got a checkout id assigned (push failed
        // transiently) is re-attempted instead.
        let existing = self.store.read(|state| {
            state.request_by_idempotency_key(idempotency_key).cloned()
        });
        let request = match existing {
            Some(req)
                if req.is_terminal()
                    || req.provider_checkout_id.is_some() =>
            {
                info!(
                    request = %req.id.short(),
                    "idempotent replay, returning original request",
                );
                return Ok(Initiated {
                    request: req,
                    code: InitiateCode::Duplicate,
                });
            }
            Some(req) => req,
            None => {
                let created = self
                    .create_request(
                        rider_id,
                        phone,
                        idempotency_key,
                        payment_type,
                        days_count,
                    )
                    .await;
                match created {
                    Ok(req) => req,
                    // Lost an idempotency race between our read and our
                    // write: every concurrent caller gets the same
                    // original request back.
                    Err(Error::Conflict(
                        Conflict::DuplicateIdempotencyKey(id),
                    )) => {
                        let original = self.store.read(|state| {
                            state.payment_request(id).cloned()
                        })?;
                        return Ok(Initiated {
                            request: original,
                            code: InitiateCode::Duplicate,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.push_out(request).await
    }

    /// Validate preconditions and persist a fresh INITIATED request.
    async fn create_request(
        &self,
        rider_id: RiderId,
        phone: &str,
        idempotency_key: &str,
        payment_type: PaymentType,
        days_count: u16,
    ) -> Result<PaymentRequest, Error> {
        let phone = PhoneNumber::normalize(phone)
            .map_err(|e| Error::Validation(e.to_string()))?;

        let amount = match payment_type {
            PaymentType::Deposit => DEPOSIT_AMOUNT,
            PaymentType::DailyPayment => DAILY_AMOUNT
                .checked_mul(i64::from(days_count))
                .expect("days_count <= 30"),
        };

        let now = TimestampMs::now();
        let mut rng = self.rng.lock().unwrap();
        let mut request = PaymentRequest {
            id: PaymentRequestId::from_rng(&mut *rng),
            rider_id,
            payment_type,
            amount,
            phone,
            idempotency_key: idempotency_key.to_owned(),
            account_reference: String::new(),
            provider_checkout_id: None,
            provider_merchant_id: None,
            status: PaymentRequestStatus::Initiated,
            days_count,
            expires_at: now.saturating_add(self.config.request_ttl),
            callback_received_at: None,
            raw_callback: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        request.account_reference = format!("BIMA-{}", request.id.short());

        let insert = self.store.transact(|state| {
            // Re-check the idempotency key inside the transaction: a
            // concurrent caller may have inserted it since our read, and
            // the duplicate must win over every other precondition.
            if let Some(existing) =
                state.request_by_idempotency_key(&request.idempotency_key)
            {
                return Err(Conflict::DuplicateIdempotencyKey(existing.id)
                    .into());
            }

            let rider = state.rider(rider_id)?;
            if !rider.is_active() {
                return Err(Error::Validation(
                    "rider is not active".to_owned(),
                ));
            }
            if !rider.terms_accepted {
                return Err(Precondition::TermsNotAccepted.into());
            }
            if !rider.kyc_approved() {
                return Err(Precondition::KycNotApproved.into());
            }

            let wallet = state.wallet_of_rider(rider_id)?;
            match payment_type {
                PaymentType::Deposit =>
                    if wallet.deposit_completed {
                        return Err(Precondition::DepositAlreadyMade.into());
                    },
                PaymentType::DailyPayment => {
                    if !wallet.deposit_completed {
                        return Err(
                            Precondition::DepositNotCompleted.into()
                        );
                    }
                    let paid_days = wallet.daily_payments_count;
                    if paid_days + days_count > DAYS_REQUIRED {
                        return Err(Precondition::DailyLimitExceeded {
                            days_count,
                            paid_days,
                        }
                        .into());
                    }
                }
            }

            if state.rider_has_request_in_flight(rider_id) {
                return Err(Precondition::RequestInFlight.into());
            }

            state.insert_payment_request(request.clone())
        });

        insert.map(|_| request)
    }

    /// Fire the STK push for an INITIATED request and advance it to SENT.
    async fn push_out(
        &self,
        request: PaymentRequest,
    ) -> Result<Initiated, Error> {
        let push = PushRequest {
            phone: request.phone.clone(),
            amount: request.amount,
            account_reference: request.account_reference.clone(),
            description: match request.payment_type {
                PaymentType::Deposit => "Bima cover deposit".to_owned(),
                PaymentType::DailyPayment =>
                    format!("Bima daily premium x{}", request.days_count),
            },
        };

        let response = match self.gateway.initiate_push(&push).await {
            Ok(resp) => resp,
            Err(e) if e.is_transient() => {
                // Leave the request INITIATED: a retry with the same
                // idempotency key re-attempts the push on this same row,
                // and the reconciler sweep expires it eventually.
                warn!(
                    request = %request.id.short(),
                    "provider unavailable on push: {e}",
                );
                return Err(e.into());
            }
            Err(e) => {
                self.mark_never_accepted(&request, e.to_string())?;
                return Err(e.into());
            }
        };

        if !response.accepted() {
            self.mark_never_accepted(
                &request,
                response.response_description.clone(),
            )?;
            return Err(Error::Permanent(format!(
                "push rejected: {} ({})",
                response.response_description, response.response_code,
            )));
        }

        let now = TimestampMs::now();
        let first_poll_at = now.saturating_add(self.config.inline_poll_timeout);
        let max_attempts = self.config.reconciler_max_attempts;
        let mut rng = self.rng.lock().unwrap();
        let job_id = JobId::from_rng(&mut *rng);
        let advanced = self.store.transact(|state| {
            let req =
                state.payment_request_cas(request.id, request.version)?;
            req.transition(PaymentRequestStatus::Sent, now)?;
            req.provider_checkout_id = Some(response.checkout_id.clone());
            req.provider_merchant_id = Some(response.merchant_id.clone());
            let req = req.clone();
            state.index_request_checkout(
                request.id,
                response.checkout_id.clone(),
            )?;

            // Schedule the delayed-payment reconciliation in the same
            // transaction, so a sent push can never miss its safety net.
            state.jobs.insert(
                job_id,
                Job {
                    id: job_id,
                    kind: JobKind::ReconcilePayment {
                        request_id: request.id,
                    },
                    attempt: 0,
                    max_attempts,
                    run_at: first_poll_at,
                    status: JobStatus::Queued,
                    last_error: None,
                    created_at: now,
                },
            );
            Ok(req)
        });

        let request = match advanced {
            Ok((request, _)) => request,
            // A concurrent caller with the same idempotency key advanced
            // this row first. Their push stands; hand back the row.
            Err(Error::Conflict(Conflict::StaleVersion { .. })) => {
                let request = self.store.read(|state| {
                    state.payment_request(request.id).cloned()
                })?;
                return Ok(Initiated {
                    request,
                    code: InitiateCode::Duplicate,
                });
            }
            Err(e) => return Err(e),
        };

        info!(
            request = %request.id.short(),
            checkout = %response.checkout_id,
            "push sent",
        );
        Ok(Initiated {
            request,
            code: InitiateCode::Success,
        })
    }

    /// The provider never accepted this push; the request dies as EXPIRED.
    fn mark_never_accepted(
        &self,
        request: &PaymentRequest,
        reason: String,
    ) -> Result<(), Error> {
        let now = TimestampMs::now();
        self.store.transact(|state| {
            let req =
                state.payment_request_cas(request.id, request.version)?;
            req.transition(PaymentRequestStatus::Expired, now)?;
            req.failure_reason = Some(reason.clone());
            Ok(())
        })?;
        Ok(())
    }

    // --- Settlement --- //

    /// Idempotent sink for provider-originated status updates. Repeated
    /// callbacks for the same checkout id are no-ops.
    #[instrument(skip_all, name = "(handle-callback)")]
    pub async fn handle_callback(
        &self,
        raw: serde_json::Value,
    ) -> Result<(SettleOutcome, Vec<DomainEvent>), Error> {
        let callback = PaymentCallback::from_json(raw).map_err(|e| {
            Error::Validation(format!("bad callback payload: {e:#}"))
        })?;
        let request = self.store.read(|state| {
            state
                .request_by_checkout_id(&callback.checkout_id)
                .cloned()
        })?;

        if !callback.result.is_terminal() {
            return Ok((SettleOutcome::StillPending, Vec::new()));
        }
        self.apply_result(request.id, callback.result, Some(callback.raw))
    }

    /// Actively query the provider and feed the result through the same
    /// settlement path as a callback. Used by the reconciler and by
    /// user-triggered "check status".
    #[instrument(skip_all, name = "(refresh-status)")]
    pub async fn refresh_payment_status(
        &self,
        request_id: PaymentRequestId,
    ) -> Result<(SettleOutcome, Vec<DomainEvent>), Error> {
        let request = self
            .store
            .read(|state| state.payment_request(request_id).cloned())?;
        if request.is_terminal() {
            return Ok((SettleOutcome::AlreadyTerminal, Vec::new()));
        }
        let checkout_id =
            request.provider_checkout_id.clone().ok_or_else(|| {
                Error::Validation(
                    "request has no provider checkout id".to_owned(),
                )
            })?;

        let result = self.gateway.query_status(&checkout_id).await?;
        if !result.is_terminal() {
            return Ok((SettleOutcome::StillPending, Vec::new()));
        }
        self.apply_result(request_id, result, None)
    }

    /// Drive one terminal [`PaymentResult`] into the request row. The first
    /// writer wins; the loser observes a terminal row (or a stale version)
    /// and commits nothing.
    fn apply_result(
        &self,
        request_id: PaymentRequestId,
        result: PaymentResult,
        raw: Option<serde_json::Value>,
    ) -> Result<(SettleOutcome, Vec<DomainEvent>), Error> {
        let mut attempts = 0;
        loop {
            let request = self
                .store
                .read(|state| state.payment_request(request_id).cloned())?;

            if request.is_terminal() {
                // Late result: record the raw payload for audit, produce
                // no side effects.
                if let Some(raw_payload) = raw.as_ref() {
                    self.store.must_transact(|state| {
                        let req = state
                            .payment_requests
                            .get_mut(&request_id)
                            .expect("request existed above");
                        if req.raw_callback.is_none() {
                            req.raw_callback = Some(raw_payload.clone());
                            req.callback_received_at =
                                Some(TimestampMs::now());
                        }
                        Ok(())
                    });
                }
                return Ok((SettleOutcome::AlreadyTerminal, Vec::new()));
            }

            let outcome = self.settle_once(&request, &result, raw.as_ref());
            match outcome {
                Ok(done) => return Ok(done),
                Err(e) if e.is_retryable() && attempts < WALLET_CAS_RETRIES =>
                {
                    attempts += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One settlement attempt as a single store transaction.
    fn settle_once(
        &self,
        request: &PaymentRequest,
        result: &PaymentResult,
        raw: Option<&serde_json::Value>,
    ) -> Result<(SettleOutcome, Vec<DomainEvent>), Error> {
        let now = TimestampMs::now();
        let mut rng = self.rng.lock().unwrap();
        let transaction_id = TransactionId::from_rng(&mut *rng);

        self.store.transact(|state| {
            let req =
                state.payment_request_cas(request.id, request.version)?;
            if let Some(raw) = raw {
                req.raw_callback = Some(raw.clone());
                req.callback_received_at = Some(now);
            }

            match result {
                PaymentResult::Success { receipt } => {
                    req.transition(PaymentRequestStatus::Completed, now)?;
                    let req = req.clone();

                    let wallet =
                        state.wallet_of_rider(req.rider_id)?.clone();
                    let tx = Transaction {
                        id: transaction_id,
                        rider_id: req.rider_id,
                        wallet_id: wallet.id,
                        tx_type: match req.payment_type {
                            PaymentType::Deposit => TransactionType::Deposit,
                            PaymentType::DailyPayment =>
                                TransactionType::DailyPayment,
                        },
                        status: TransactionStatus::Completed,
                        amount: req.amount,
                        receipt_number: Some(receipt.clone()),
                        payment_request_id: Some(req.id),
                        policy_id: None,
                        metadata: serde_json::json!({}),
                        settled_at: now,
                        created_at: now,
                    };
                    state.insert_transaction(tx)?;

                    match req.payment_type {
                        PaymentType::Deposit => wallet::credit_deposit(
                            state,
                            wallet.id,
                            wallet.version,
                            req.amount,
                            transaction_id,
                            now,
                        )?,
                        PaymentType::DailyPayment =>
                            wallet::credit_daily_payment(
                                state,
                                wallet.id,
                                wallet.version,
                                req.amount,
                                req.days_count,
                                transaction_id,
                                now,
                            )?,
                    }

                    ledger::post_premium_collected(
                        state,
                        &mut *rng,
                        match req.payment_type {
                            PaymentType::Deposit => "DEPOSIT_SETTLED",
                            PaymentType::DailyPayment =>
                                "DAILY_PAYMENT_SETTLED",
                        },
                        req.amount,
                        transaction_id,
                        now,
                    )?;

                    state.emit(DomainEvent::PaymentSettled {
                        request_id: req.id,
                        rider_id: req.rider_id,
                        transaction_id,
                        payment_type: req.payment_type,
                        amount: req.amount,
                        days_count: req.days_count,
                    });
                    Ok(SettleOutcome::Settled { transaction_id })
                }
                PaymentResult::Cancelled => {
                    req.transition(PaymentRequestStatus::Cancelled, now)?;
                    req.failure_reason =
                        Some("Request cancelled by user".to_owned());
                    let req = req.clone();
                    state.emit(DomainEvent::PaymentFailed {
                        request_id: req.id,
                        rider_id: req.rider_id,
                        payment_type: req.payment_type,
                        reason: "Request cancelled by user".to_owned(),
                    });
                    Ok(SettleOutcome::MarkedFailed)
                }
                PaymentResult::Failed { code, description } => {
                    req.transition(PaymentRequestStatus::Failed, now)?;
                    req.failure_reason =
                        Some(format!("{description} ({code})"));
                    let req = req.clone();
                    state.emit(DomainEvent::PaymentFailed {
                        request_id: req.id,
                        rider_id: req.rider_id,
                        payment_type: req.payment_type,
                        reason: description.clone(),
                    });
                    Ok(SettleOutcome::MarkedFailed)
                }
                PaymentResult::Pending => unreachable!(
                    "apply_result is only called with terminal results"
                ),
            }
        })
    }

    /// Force a request that will never resolve to its terminal state:
    /// TIMEOUT if the provider accepted the push, EXPIRED if it never did.
    pub fn force_timeout(
        &self,
        request_id: PaymentRequestId,
    ) -> Result<(SettleOutcome, Vec<DomainEvent>), Error> {
        let now = TimestampMs::now();
        self.store.transact(|state| {
            let req = state
                .payment_requests
                .get_mut(&request_id)
                .ok_or_else(|| {
                    Error::not_found("payment request", request_id)
                })?;
            if req.is_terminal() {
                return Ok(SettleOutcome::AlreadyTerminal);
            }
            let terminal = if req.provider_checkout_id.is_some() {
                PaymentRequestStatus::Timeout
            } else {
                PaymentRequestStatus::Expired
            };
            req.transition(terminal, now)?;
            req.failure_reason =
                Some("No provider resolution before cutoff".to_owned());
            let req = req.clone();
            state.emit(DomainEvent::PaymentTimedOut {
                request_id: req.id,
                rider_id: req.rider_id,
            });
            Ok(SettleOutcome::MarkedFailed)
        })
    }
}

#[cfg(test)]
mod test {
    use bima_api::test_utils::FakeMobileMoney;
    use common::money::Amount;
    use common::rng::SmallRng;
    use serde_json::json;

    use super::*;
    use crate::testing;

    fn manager(
        store: &Arc<Store>,
        gateway: &FakeMobileMoney,
    ) -> PaymentsManager {
        PaymentsManager::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Box::new(SmallRng::from_u64(99)),
            PaymentsConfig::default(),
        )
    }

    fn success_callback(checkout_id: &str, receipt: &str) -> serde_json::Value {
        json!({
            "checkout_id": checkout_id,
            "result_code": 0,
            "result_description": "Success",
            "receipt_number": receipt,
        })
    }

    #[tokio::test]
    async fn deposit_initiate_and_settle() {
        let store = Arc::new(Store::new());
        let (rider_id, wallet_id) = testing::seed_rider(&store, 1);
        let gateway = FakeMobileMoney::new();
        let manager = manager(&store, &gateway);

        let initiated = manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap();
        assert_eq!(initiated.code, InitiateCode::Success);
        assert_eq!(
            initiated.request.status,
            PaymentRequestStatus::Sent,
        );
        let checkout_id = gateway.last_checkout_id().unwrap();

        // A reconcile job was scheduled with the push.
        assert_eq!(store.read(|s| s.jobs.len()), 1);

        let (outcome, events) = manager
            .handle_callback(success_callback(&checkout_id, "RCPT-001"))
            .await
            .unwrap();
        assert!(matches!(outcome, SettleOutcome::Settled { .. }));
        assert_eq!(events.len(), 2); // PaymentSettled + DepositCompleted

        let wallet = wallet::read(&store, wallet_id).unwrap();
        assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
        assert!(wallet.deposit_completed);

        // Ledger was posted atomically with the credit.
        store.read(|state| {
            assert_eq!(state.journal.len(), 1);
            let (debits, credits) = state.trial_balance();
            assert_eq!(debits, credits);
        });
    }

    #[tokio::test]
    async fn duplicate_callback_is_a_noop() {
        let store = Arc::new(Store::new());
        let (rider_id, wallet_id) = testing::seed_rider(&store, 1);
        let gateway = FakeMobileMoney::new();
        let manager = manager(&store, &gateway);

        manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap();
        let checkout_id = gateway.last_checkout_id().unwrap();
        let callback = success_callback(&checkout_id, "RCPT-001");

        manager.handle_callback(callback.clone()).await.unwrap();
        let (outcome, events) =
            manager.handle_callback(callback).await.unwrap();
        assert_eq!(outcome, SettleOutcome::AlreadyTerminal);
        assert!(events.is_empty());

        // Exactly one transaction, one journal entry, one credit.
        store.read(|state| {
            assert_eq!(state.transactions.len(), 1);
            assert_eq!(state.journal.len(), 1);
        });
        let wallet = wallet::read(&store, wallet_id).unwrap();
        assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
    }

    #[tokio::test]
    async fn idempotent_replay_returns_original() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let gateway = FakeMobileMoney::new();
        let manager = manager(&store, &gateway);

        let first = manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap();
        let replay = manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap();
        assert_eq!(replay.code, InitiateCode::Duplicate);
        assert_eq!(replay.request.id, first.request.id);
        assert_eq!(gateway.push_count(), 1);
    }

    #[tokio::test]
    async fn kyc_gate_blocks_deposit() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        store.must_transact(|state| {
            state
                .riders
                .get_mut(&rider_id)
                .expect("rider seeded")
                .kyc_status = common::enums::KycStatus::Pending;
            Ok(())
        });
        let gateway = FakeMobileMoney::new();
        let manager = manager(&store, &gateway);

        let err = manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Precondition(Precondition::KycNotApproved),
        ));
        assert_eq!(gateway.push_count(), 0);
    }

    #[tokio::test]
    async fn transient_push_failure_keeps_request_retryable() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let gateway = FakeMobileMoney::new();
        gateway.fail_next_pushes(1);
        let manager = manager(&store, &gateway);

        let err = manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Same key retries the same request row with a fresh push.
        let retried = manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap();
        assert_eq!(retried.code, InitiateCode::Success);
        assert_eq!(
            store.read(|s| s.payment_requests.len()),
            1,
            "retry must reuse the original request row",
        );
    }

    #[tokio::test]
    async fn user_cancel_marks_failed_without_credit() {
        let store = Arc::new(Store::new());
        let (rider_id, wallet_id) = testing::seed_rider(&store, 1);
        let gateway = FakeMobileMoney::new();
        let manager = manager(&store, &gateway);

        manager
            .initiate_deposit(rider_id, "0712345001", "dep-1")
            .await
            .unwrap();
        let checkout_id = gateway.last_checkout_id().unwrap();

        let (outcome, events) = manager
            .handle_callback(json!({
                "checkout_id": checkout_id,
                "result_code": 1032,
                "result_description": "Request cancelled by user",
            }))
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::MarkedFailed);
        assert!(matches!(
            events.as_slice(),
            [DomainEvent::PaymentFailed { .. }],
        ));

        let request = store.read(|s| {
            s.request_by_checkout_id(&checkout_id).cloned().unwrap()
        });
        assert_eq!(request.status, PaymentRequestStatus::Cancelled);
        let wallet = wallet::read(&store, wallet_id).unwrap();
        assert_eq!(wallet.balance, Amount::ZERO);
    }
}
