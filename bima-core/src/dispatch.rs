//! Routes committed domain events to their consumers.
//!
//! The store hands events to the caller only after the producing
//! transaction committed; this dispatcher fans them out to the issuance
//! planner, the certificate dispatcher, and the notification orchestrator,
//! then mirrors them onto the in-process events bus for observers. Every
//! consumer is idempotent on its message key, so redelivery after a crash
//! between commit and dispatch is safe.

use std::sync::Arc;

use common::constants::{DAYS_REQUIRED, DEPOSIT_AMOUNT};
use common::enums::{NotifyEvent, NotifyPriority, PaymentType};
use tracing::{error, instrument};

use crate::certificates::CertificateDispatcher;
use crate::error::Error;
use crate::events::{DomainEvent, EventsBus};
use crate::issuance::IssuancePlanner;
use crate::notify::{NotifyOrchestrator, SendRequest};
use crate::store::Store;

pub struct EventDispatcher {
    store: Arc<Store>,
    planner: IssuancePlanner,
    orchestrator: Arc<NotifyOrchestrator>,
    certificates: Arc<CertificateDispatcher>,
    bus: EventsBus,
}

impl EventDispatcher {
    pub fn new(
        store: Arc<Store>,
        planner: IssuancePlanner,
        orchestrator: Arc<NotifyOrchestrator>,
        certificates: Arc<CertificateDispatcher>,
        bus: EventsBus,
    ) -> Self {
        Self {
            store,
            planner,
            orchestrator,
            certificates,
            bus,
        }
    }

    pub fn bus(&self) -> &EventsBus {
        &self.bus
    }

    /// Fan out one commit's worth of events, in order. A consumer error is
    /// logged and does not block the remaining events; consumers re-derive
    /// their work from store state, so a lost dispatch is recoverable by
    /// the next sweep.
    pub async fn dispatch(&self, events: Vec<DomainEvent>) {
        for event in events {
            if let Err(e) = self.dispatch_one(&event).await {
                error!("event dispatch failed for {event:?}: {e:#}");
            }
            self.bus.notify(event);
        }
    }

    #[instrument(skip_all, name = "(dispatch-event)")]
    async fn dispatch_one(&self, event: &DomainEvent) -> Result<(), Error> {
        match event {
            DomainEvent::PaymentSettled {
                rider_id,
                payment_type,
                amount,
                ..
            } => {
                // The deposit confirmation rides on DepositCompleted.
                if *payment_type == PaymentType::DailyPayment {
                    let days_remaining = self
                        .store
                        .read(|state| {
                            state
                                .wallet_of_rider(*rider_id)
                                .map(|w| w.days_remaining())
                        })
                        .unwrap_or(DAYS_REQUIRED);
                    self.orchestrator
                        .send(
                            SendRequest::new(
                                *rider_id,
                                NotifyEvent::PaymentReceived,
                            )
                            .variable("amount", amount)
                            .variable("days_remaining", days_remaining),
                        )
                        .await?;
                }
            }

            DomainEvent::DepositCompleted { rider_id, .. } => {
                self.planner.handle(event)?;
                self.orchestrator
                    .send(
                        SendRequest::new(
                            *rider_id,
                            NotifyEvent::DepositConfirmed,
                        )
                        .variable("amount", DEPOSIT_AMOUNT),
                    )
                    .await?;
            }

            DomainEvent::DailyCycleCompleted { rider_id, .. } => {
                self.planner.handle(event)?;
                self.orchestrator
                    .send(SendRequest::new(
                        *rider_id,
                        NotifyEvent::DailyCycleCompleted,
                    ))
                    .await?;
            }

            DomainEvent::PaymentFailed {
                rider_id, reason, ..
            } => {
                self.orchestrator
                    .send(
                        SendRequest::new(
                            *rider_id,
                            NotifyEvent::PaymentFailed,
                        )
                        .variable("reason", reason)
                        .priority(NotifyPriority::High),
                    )
                    .await?;
            }

            DomainEvent::PaymentTimedOut { rider_id, .. } => {
                self.orchestrator
                    .send(
                        SendRequest::new(
                            *rider_id,
                            NotifyEvent::ManualReviewRequired,
                        )
                        .priority(NotifyPriority::High),
                    )
                    .await?;
            }

            DomainEvent::PolicyActivated {
                policy_id,
                rider_id,
            } => {
                let delivery =
                    self.certificates.dispatch(*policy_id).await?;
                let (policy_number, coverage_end) =
                    self.store.read(|state| {
                        let policy = state.policy(*policy_id)?;
                        Ok::<_, Error>((
                            policy
                                .policy_number
                                .clone()
                                .unwrap_or_default(),
                            policy
                                .coverage_end
                                .map(|t| t.to_string())
                                .unwrap_or_default(),
                        ))
                    })?;
                self.orchestrator
                    .send(
                        SendRequest::new(
                            *rider_id,
                            NotifyEvent::PolicyIssued,
                        )
                        .variable("policy_number", policy_number)
                        .variable("coverage_end", coverage_end)
                        .variable("certificate_url", delivery.signed_url)
                        .priority(NotifyPriority::High),
                    )
                    .await?;
            }

            DomainEvent::PolicyCancelled {
                policy_id,
                rider_id,
                refund_id,
            } => {
                let (policy_number, refund_amount) =
                    self.store.read(|state| {
                        let policy = state.policy(*policy_id)?;
                        let refund = state
                            .refunds
                            .get(refund_id)
                            .ok_or_else(|| {
                                Error::not_found("refund", refund_id)
                            })?;
                        Ok::<_, Error>((
                            policy
                                .policy_number
                                .clone()
                                .unwrap_or_default(),
                            refund.refund_amount,
                        ))
                    })?;
                self.orchestrator
                    .send(
                        SendRequest::new(
                            *rider_id,
                            NotifyEvent::PolicyCancelled,
                        )
                        .variable("policy_number", policy_number)
                        .variable("refund_amount", refund_amount)
                        .priority(NotifyPriority::High),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
