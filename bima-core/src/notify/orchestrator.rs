//! The notification orchestrator.
//!
//! Delivery strategy per attempt:
//!
//! 1. Pick the primary provider; if its health is known-bad (cached for at
//!    most the health TTL), swap with the secondary.
//! 2. Up to `1 + max_retries` attempts with delay `base * 2^(attempt - 1)`.
//!    A non-retryable rejection (invalid phone, blacklisted, invalid
//!    sender, auth failed) stops retries on that provider immediately.
//! 3. On exhaustion, mark the provider unhealthy for the cache window and,
//!    if failover is enabled, run the same loop on the other provider.
//!
//! Non-urgent traffic inside the rider's quiet window is deferred to the
//! next `quiet_hours_end` rather than sent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bima_api::error::ProviderError;
use bima_api::models::{DeliveryReport, DeliveryState, EmailMessage};
use bima_api::traits::{EmailApi, SmsApi, WhatsAppApi};
use chrono::{TimeZone, Timelike, Utc};
use common::backoff;
use common::constants::{
    NOTIFICATION_TTL, NOTIFY_MAX_RETRIES, NOTIFY_RETRY_DELAY,
    PROVIDER_HEALTH_TTL,
};
use common::enums::{
    Channel, NotificationStatus, NotifyPriority,
};
use common::ids::NotificationId;
use common::phone::PhoneNumber;
use common::rng::Crng;
use common::time::TimestampMs;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::models::notification::{Notification, QuietHours, Suppression};
use crate::notify::{
    NotifyMetrics, SendOutcome, SendRequest, SkipReason,
};
use crate::store::Store;

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    /// Retries after the first attempt, per provider.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^(n-1)`.
    pub retry_delay: Duration,
    pub failover_enabled: bool,
    pub provider_health_ttl: Duration,
    /// Pending notifications older than this expire unsent.
    pub notification_ttl: Duration,
    /// For quiet-hours wall-clock math (Nairobi: +3).
    pub utc_offset_hours: i32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_retries: NOTIFY_MAX_RETRIES,
            retry_delay: NOTIFY_RETRY_DELAY,
            failover_enabled: true,
            provider_health_ttl: PROVIDER_HEALTH_TTL,
            notification_ttl: NOTIFICATION_TTL,
            utc_offset_hours: 3,
        }
    }
}

/// Summary of one bulk send.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BulkSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Whether the failed subset was re-sent on the secondary.
    pub failover_used: bool,
}

pub struct NotifyOrchestrator {
    store: Arc<Store>,
    rng: Mutex<Box<dyn Crng + Send>>,
    sms_primary: Arc<dyn SmsApi>,
    sms_secondary: Option<Arc<dyn SmsApi>>,
    whatsapp: Option<Arc<dyn WhatsAppApi>>,
    email: Option<Arc<dyn EmailApi>>,
    config: NotifyConfig,
    /// Providers marked unhealthy, and until when.
    unhealthy_until: Mutex<HashMap<&'static str, Instant>>,
    metrics: Mutex<NotifyMetrics>,
}

impl NotifyOrchestrator {
    pub fn new(
        store: Arc<Store>,
        rng: Box<dyn Crng + Send>,
        sms_primary: Arc<dyn SmsApi>,
        sms_secondary: Option<Arc<dyn SmsApi>>,
        whatsapp: Option<Arc<dyn WhatsAppApi>>,
        email: Option<Arc<dyn EmailApi>>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
            sms_primary,
            sms_secondary,
            whatsapp,
            email,
            config,
            unhealthy_until: Mutex::new(HashMap::new()),
            metrics: Mutex::new(NotifyMetrics::default()),
        }
    }

    pub fn metrics(&self) -> NotifyMetrics {
        self.metrics.lock().unwrap().clone()
    }

    // --- Send --- //

    /// Render, persist, and (unless scheduled or deferred) deliver one
    /// message.
    #[instrument(skip_all, name = "(notify-send)")]
    pub async fn send(
        &self,
        request: SendRequest,
    ) -> Result<SendOutcome, Error> {
        let now = TimestampMs::now();
        let channel = request.channel.unwrap_or(Channel::Sms);

        let rider = self
            .store
            .read(|state| state.rider(request.rider_id).cloned())?;

        let prefs =
            self.store.read(|state| state.preferences_of(rider.id));
        if !prefs.event_enabled(request.event) {
            return Ok(SendOutcome::Skipped {
                reason: SkipReason::EventDisabled,
            });
        }
        if !prefs.channel_subscribed(channel) {
            return Ok(SendOutcome::Skipped {
                reason: SkipReason::ChannelUnsubscribed,
            });
        }

        let recipient = match channel {
            Channel::Sms | Channel::Whatsapp | Channel::Push =>
                rider.phone.as_str().to_owned(),
            Channel::Email => match &rider.email {
                Some(email) => email.clone(),
                None =>
                    return Ok(SendOutcome::Skipped {
                        reason: SkipReason::NoRecipient,
                    }),
            },
        };
        if self
            .store
            .read(|state| state.is_suppressed(channel, &recipient))
        {
            return Ok(SendOutcome::Skipped {
                reason: SkipReason::Suppressed,
            });
        }

        let template = self
            .store
            .read(|state| state.template(channel, request.event).cloned())
            .ok_or_else(|| {
                Error::not_found(
                    "template",
                    format!("{channel}/{}", request.event),
                )
            })?;
        let rendered = template.render(&request.variables)?;

        let notification_id = {
            let mut rng = self.rng.lock().unwrap();
            NotificationId::from_rng(&mut *rng)
        };
        let notification = Notification {
            id: notification_id,
            rider_id: rider.id,
            channel,
            event: request.event,
            status: NotificationStatus::Pending,
            recipient,
            subject: rendered.subject,
            body: rendered.body,
            template_id: template.id.clone(),
            variables: request.variables.clone(),
            retry_count: 0,
            scheduled_for: request.scheduled_for,
            priority: request.priority,
            external_message_id: None,
            provider: None,
            error: None,
            created_at: now,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
        };
        self.store.must_transact(|state| {
            state.insert_notification(notification.clone());
            Ok(())
        });

        // Scheduled sends wait for the sweep worker.
        if let Some(at) = request.scheduled_for {
            if at > now {
                return Ok(SendOutcome::Scheduled { notification_id });
            }
        }

        // Quiet hours defer everything except URGENT.
        if request.priority != NotifyPriority::Urgent {
            let quiet = prefs.quiet_hours;
            if quiet.contains(self.local_minute(now)) {
                let until = self.next_quiet_end(quiet, now);
                self.store.must_transact(|state| {
                    let n = state.notification_mut(notification_id)?;
                    n.scheduled_for = Some(until);
                    Ok(())
                });
                debug!(
                    notification = %notification_id.short(),
                    %until,
                    "deferred into quiet hours",
                );
                return Ok(SendOutcome::Deferred {
                    notification_id,
                    until,
                });
            }
        }

        Ok(self.attempt_delivery(notification_id).await)
    }

    /// Re-enter scheduled / deferred notifications that have come due, and
    /// expire pending rows older than the TTL. Returns how many were
    /// attempted.
    #[instrument(skip_all, name = "(notify-sweep)")]
    pub async fn sweep_due(&self, now: TimestampMs) -> Result<usize, Error> {
        let ttl_cutoff = now.saturating_sub(self.config.notification_ttl);

        let (due, expired) = self.store.must_transact(|state| {
            let mut due = Vec::new();
            let mut expired = 0usize;
            let ids: Vec<NotificationId> = state
                .notifications
                .values()
                .filter(|n| n.status == NotificationStatus::Pending)
                .map(|n| n.id)
                .collect();
            for id in ids {
                let n = state.notification_mut(id)?;
                // Age is measured from when the message was meant to go
                // out, so a deliberately far-scheduled send doesn't expire
                // before its time.
                let reference = n.scheduled_for.unwrap_or(n.created_at);
                if reference <= ttl_cutoff {
                    n.status = NotificationStatus::Expired;
                    expired += 1;
                } else if n.scheduled_for.map_or(false, |at| at <= now) {
                    due.push(id);
                }
            }
            Ok((due, expired))
        });
        if expired > 0 {
            info!(expired, "expired stale notifications");
        }

        let mut attempted = 0;
        for id in due {
            self.attempt_delivery(id).await;
            attempted += 1;
        }
        Ok(attempted)
    }

    // --- Delivery --- //

    async fn attempt_delivery(&self, id: NotificationId) -> SendOutcome {
        let notification = match self
            .store
            .read(|state| state.notification(id).cloned())
        {
            Ok(n) => n,
            Err(e) => {
                warn!("notification vanished before delivery: {e:#}");
                return SendOutcome::Failed {
                    notification_id: id,
                    error: e.to_string(),
                };
            }
        };

        self.store.must_transact(|state| {
            state.notification_mut(id)?.status = NotificationStatus::Queued;
            Ok(())
        });

        let result = match notification.channel {
            Channel::Sms => self.deliver_sms(&notification).await,
            Channel::Whatsapp => self.deliver_whatsapp(&notification).await,
            Channel::Email => self.deliver_email(&notification).await,
            Channel::Push => Err((
                "no push provider configured".to_owned(),
                "unconfigured".to_owned(),
            )),
        };

        match result {
            Ok((provider, message_id)) => {
                self.store.must_transact(|state| {
                    let n = state.notification_mut(id)?;
                    n.status = NotificationStatus::Sent;
                    n.sent_at = Some(TimestampMs::now());
                    n.provider = Some(provider.clone());
                    n.external_message_id = Some(message_id.clone());
                    n.error = None;
                    state.index_notification_external(id, message_id.clone());
                    Ok(())
                });
                SendOutcome::Sent {
                    notification_id: id,
                    provider,
                }
            }
            Err((error, _kind)) => {
                self.store.must_transact(|state| {
                    let n = state.notification_mut(id)?;
                    n.status = NotificationStatus::Failed;
                    n.error = Some(error.clone());
                    Ok(())
                });
                SendOutcome::Failed {
                    notification_id: id,
                    error,
                }
            }
        }
    }

    /// SMS goes through the primary/secondary pair with failover.
    async fn deliver_sms(
        &self,
        notification: &Notification,
    ) -> Result<(String, String), (String, String)> {
        let phone = PhoneNumber::normalize(&notification.recipient)
            .map_err(|e| (e.to_string(), "invalid recipient".to_owned()))?;
        let body = notification.body.clone();

        // Primary first, unless its health is known-bad and we have an
        // alternative.
        let mut providers: Vec<Arc<dyn SmsApi>> =
            vec![self.sms_primary.clone()];
        if let Some(secondary) = &self.sms_secondary {
            if self.is_unhealthy(self.sms_primary.name()) {
                providers.insert(0, secondary.clone());
            } else {
                providers.push(secondary.clone());
            }
        }

        let mut last_error =
            ("no sms provider configured".to_owned(), String::new());
        for (i, provider) in providers.iter().enumerate() {
            if i > 0 {
                if !self.config.failover_enabled {
                    break;
                }
                self.metrics.lock().unwrap().failovers += 1;
                info!(
                    notification = %notification.id.short(),
                    to = %provider.name(),
                    "failing over",
                );
            }

            let result = self
                .timed_retry_loop(provider.name(), notification.id, || {
                    let provider = provider.clone();
                    let phone = phone.clone();
                    let body = body.clone();
                    async move {
                        provider
                            .send(&phone, &body)
                            .await
                            .map(|ok| ok.message_id)
                    }
                })
                .await;

            match result {
                Ok(message_id) => {
                    self.record_success(provider.name());
                    return Ok((provider.name().to_owned(), message_id));
                }
                Err(e) => {
                    self.mark_unhealthy(provider.name());
                    self.record_failure(&e);
                    last_error = (e.to_string(), e.kind.to_string());
                }
            }
        }
        Err(last_error)
    }

    async fn deliver_whatsapp(
        &self,
        notification: &Notification,
    ) -> Result<(String, String), (String, String)> {
        let provider = self.whatsapp.clone().ok_or_else(|| {
            ("no whatsapp provider configured".to_owned(), String::new())
        })?;
        let phone = PhoneNumber::normalize(&notification.recipient)
            .map_err(|e| (e.to_string(), "invalid recipient".to_owned()))?;
        let body = notification.body.clone();

        let result = self
            .timed_retry_loop(provider.name(), notification.id, || {
                let provider = provider.clone();
                let phone = phone.clone();
                let body = body.clone();
                async move {
                    provider
                        .send_text(&phone, &body)
                        .await
                        .map(|ok| ok.message_id)
                }
            })
            .await;

        match result {
            Ok(message_id) => {
                self.record_success(provider.name());
                Ok((provider.name().to_owned(), message_id))
            }
            Err(e) => {
                self.mark_unhealthy(provider.name());
                self.record_failure(&e);
                Err((e.to_string(), e.kind.to_string()))
            }
        }
    }

    async fn deliver_email(
        &self,
        notification: &Notification,
    ) -> Result<(String, String), (String, String)> {
        let provider = self.email.clone().ok_or_else(|| {
            ("no email provider configured".to_owned(), String::new())
        })?;
        let message = EmailMessage {
            recipient: notification.recipient.clone(),
            subject: notification.subject.clone(),
            text: notification.body.clone(),
            html: None,
            preview_text: None,
        };

        let result = self
            .timed_retry_loop(provider.name(), notification.id, || {
                let provider = provider.clone();
                let message = message.clone();
                async move {
                    provider.send(&message).await.map(|ok| ok.message_id)
                }
            })
            .await;

        match result {
            Ok(message_id) => {
                self.record_success(provider.name());
                Ok((provider.name().to_owned(), message_id))
            }
            Err(e) => {
                self.mark_unhealthy(provider.name());
                self.record_failure(&e);
                Err((e.to_string(), e.kind.to_string()))
            }
        }
    }

    /// Up to `1 + max_retries` attempts against one provider, with
    /// exponential delays, timing each attempt. Non-retryable errors stop
    /// the loop immediately.
    async fn timed_retry_loop<Fut>(
        &self,
        provider: &'static str,
        notification_id: NotificationId,
        mut attempt_fn: impl FnMut() -> Fut,
    ) -> Result<String, ProviderError>
    where
        Fut: Future<Output = Result<String, ProviderError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let started = Instant::now();
            let result = attempt_fn().await;
            {
                let mut metrics = self.metrics.lock().unwrap();
                metrics.response_time_ms_total +=
                    started.elapsed().as_millis() as u64;
                metrics.response_time_samples += 1;
            }

            match result {
                Ok(message_id) => return Ok(message_id),
                Err(e)
                    if e.is_transient()
                        && attempts <= self.config.max_retries =>
                {
                    debug!(
                        notification = %notification_id.short(),
                        provider,
                        attempts,
                        "transient send failure, retrying: {e}",
                    );
                    self.metrics.lock().unwrap().retries += 1;
                    self.bump_retry_count(notification_id);
                    let delay = backoff::delay_for_attempt(
                        self.config.retry_delay,
                        attempts,
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn bump_retry_count(&self, id: NotificationId) {
        self.store.must_transact(|state| {
            if let Ok(n) = state.notification_mut(id) {
                n.retry_count += 1;
            }
            Ok(())
        });
    }

    // --- Bulk --- //

    /// Send the same event to many riders in one provider call. If more
    /// than half of a bulk attempt fails on the primary, the failed subset
    /// is re-sent on the secondary and the results merged.
    #[instrument(skip_all, name = "(notify-bulk)")]
    pub async fn send_bulk_sms(
        &self,
        requests: Vec<SendRequest>,
    ) -> Result<BulkSummary, Error> {
        let now = TimestampMs::now();
        let mut summary = BulkSummary::default();

        // Render and persist a row per rider; collect the deliverable set.
        let mut outgoing: Vec<(NotificationId, PhoneNumber, String)> =
            Vec::new();
        for request in requests {
            let rider = self
                .store
                .read(|state| state.rider(request.rider_id).cloned())?;
            let prefs =
                self.store.read(|state| state.preferences_of(rider.id));
            let recipient = rider.phone.as_str().to_owned();
            if !prefs.event_enabled(request.event)
                || !prefs.channel_subscribed(Channel::Sms)
                || self.store.read(|state| {
                    state.is_suppressed(Channel::Sms, &recipient)
                })
            {
                summary.skipped += 1;
                continue;
            }
            let template = self
                .store
                .read(|state| {
                    state.template(Channel::Sms, request.event).cloned()
                })
                .ok_or_else(|| {
                    Error::not_found("template", request.event)
                })?;
            let rendered = template.render(&request.variables)?;

            let id = {
                let mut rng = self.rng.lock().unwrap();
                NotificationId::from_rng(&mut *rng)
            };
            let notification = Notification {
                id,
                rider_id: rider.id,
                channel: Channel::Sms,
                event: request.event,
                status: NotificationStatus::Queued,
                recipient,
                subject: String::new(),
                body: rendered.body.clone(),
                template_id: template.id.clone(),
                variables: request.variables.clone(),
                retry_count: 0,
                scheduled_for: None,
                priority: request.priority,
                external_message_id: None,
                provider: None,
                error: None,
                created_at: now,
                sent_at: None,
                delivered_at: None,
                opened_at: None,
                clicked_at: None,
            };
            self.store.must_transact(|state| {
                state.insert_notification(notification.clone());
                Ok(())
            });
            outgoing.push((id, rider.phone.clone(), rendered.body));
        }

        if outgoing.is_empty() {
            return Ok(summary);
        }

        let messages: Vec<(PhoneNumber, String)> = outgoing
            .iter()
            .map(|(_, phone, body)| (phone.clone(), body.clone()))
            .collect();

        let primary_outcome =
            self.sms_primary.send_bulk(&messages).await;
        let mut failed: Vec<usize> = Vec::new();
        match primary_outcome {
            Ok(outcome) => {
                for (i, (_, result)) in outcome.results.iter().enumerate() {
                    match result {
                        Ok(ok) => self.finish_bulk_row(
                            &outgoing[i].0,
                            self.sms_primary.name(),
                            &ok.message_id,
                        ),
                        Err(_) => failed.push(i),
                    }
                }
            }
            // The whole call failed: every message is a candidate for the
            // secondary.
            Err(e) => {
                warn!("bulk send failed on primary: {e}");
                failed = (0..outgoing.len()).collect();
            }
        }

        // Failed majority: re-send the failed subset on the secondary.
        let use_failover = self.config.failover_enabled
            && failed.len() * 2 > outgoing.len()
            && self.sms_secondary.is_some();
        if use_failover {
            let secondary =
                self.sms_secondary.as_ref().expect("checked above");
            summary.failover_used = true;
            self.metrics.lock().unwrap().failovers += 1;

            let retry_messages: Vec<(PhoneNumber, String)> = failed
                .iter()
                .map(|&i| messages[i].clone())
                .collect();
            match secondary.send_bulk(&retry_messages).await {
                Ok(outcome) => {
                    let mut still_failed = Vec::new();
                    for (j, (_, result)) in
                        outcome.results.iter().enumerate()
                    {
                        let i = failed[j];
                        match result {
                            Ok(ok) => self.finish_bulk_row(
                                &outgoing[i].0,
                                secondary.name(),
                                &ok.message_id,
                            ),
                            Err(_) => still_failed.push(i),
                        }
                    }
                    failed = still_failed;
                }
                Err(e) => warn!("bulk send failed on secondary: {e}"),
            }
        }

        for &i in &failed {
            let id = outgoing[i].0;
            self.store.must_transact(|state| {
                let n = state.notification_mut(id)?;
                n.status = NotificationStatus::Failed;
                n.error = Some("bulk send failed".to_owned());
                Ok(())
            });
        }

        summary.sent = outgoing.len() - failed.len();
        summary.failed = failed.len();
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.total_sent += summary.sent as u64;
            metrics.total_failed += summary.failed as u64;
        }
        Ok(summary)
    }

    fn finish_bulk_row(
        &self,
        id: &NotificationId,
        provider: &'static str,
        message_id: &str,
    ) {
        let id = *id;
        self.store.must_transact(|state| {
            let n = state.notification_mut(id)?;
            n.status = NotificationStatus::Sent;
            n.sent_at = Some(TimestampMs::now());
            n.provider = Some(provider.to_owned());
            n.external_message_id = Some(message_id.to_owned());
            state.index_notification_external(id, message_id.to_owned());
            Ok(())
        });
    }

    // --- Delivery reports --- //

    /// Provider webhook sink: map a delivery report onto the notification
    /// row and suppress hard-bounced / complaining recipients.
    #[instrument(skip_all, name = "(delivery-report)")]
    pub fn handle_delivery_report(
        &self,
        report: &DeliveryReport,
    ) -> Result<(), Error> {
        let id = self
            .store
            .read(|state| {
                state.notification_by_external_id(&report.message_id)
            })
            .ok_or_else(|| {
                Error::not_found("notification by message id", &report.message_id)
            })?;

        self.store.must_transact(|state| {
            let n = state.notification_mut(id)?;
            match report.state {
                DeliveryState::Delivered => {
                    n.status = NotificationStatus::Delivered;
                    n.delivered_at = Some(report.timestamp);
                }
                DeliveryState::Sent => (),
                DeliveryState::Opened => n.opened_at = Some(report.timestamp),
                DeliveryState::Clicked =>
                    n.clicked_at = Some(report.timestamp),
                DeliveryState::Failed
                | DeliveryState::Bounced
                | DeliveryState::Complained => {
                    n.status = NotificationStatus::Failed;
                    n.error = report.reason.clone();
                }
            }
            let n = n.clone();
            if report.is_suppressing() {
                state.suppressions.insert(Suppression {
                    channel: n.channel,
                    recipient: n.recipient.clone(),
                });
            }
            Ok(())
        });
        Ok(())
    }

    // --- Health cache and metrics --- //

    fn is_unhealthy(&self, provider: &str) -> bool {
        let unhealthy = self.unhealthy_until.lock().unwrap();
        unhealthy
            .get(provider)
            .map_or(false, |&until| Instant::now() < until)
    }

    fn mark_unhealthy(&self, provider: &'static str) {
        let until = Instant::now() + self.config.provider_health_ttl;
        self.unhealthy_until.lock().unwrap().insert(provider, until);
    }

    fn record_success(&self, provider: &str) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.total_sent += 1;
        *metrics.by_provider.entry(provider.to_owned()).or_insert(0) += 1;
    }

    fn record_failure(&self, error: &ProviderError) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.total_failed += 1;
        *metrics
            .by_error_kind
            .entry(error.kind.to_string())
            .or_insert(0) += 1;
    }

    // --- Quiet hours --- //

    fn local_minute(&self, now: TimestampMs) -> u32 {
        let offset = chrono::FixedOffset::east_opt(
            self.config.utc_offset_hours * 3600,
        )
        .expect("offset hours are sane");
        let local = now.to_datetime().with_timezone(&offset);
        local.hour() * 60 + local.minute()
    }

    /// The next wall-clock `quiet_hours_end` at or after `now`.
    fn next_quiet_end(
        &self,
        quiet: QuietHours,
        now: TimestampMs,
    ) -> TimestampMs {
        let offset = chrono::FixedOffset::east_opt(
            self.config.utc_offset_hours * 3600,
        )
        .expect("offset hours are sane");
        let local = now.to_datetime().with_timezone(&offset);
        let end_naive = local
            .date_naive()
            .and_hms_opt(quiet.end_minute / 60, quiet.end_minute % 60, 0)
            .expect("quiet end is a valid time");
        let mut end = offset
            .from_local_datetime(&end_naive)
            .single()
            .expect("fixed offsets have no ambiguous local times");
        if end <= local {
            end = end + chrono::Duration::days(1);
        }
        TimestampMs::from_datetime(end.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod test {
    use bima_api::error::ProviderErrorKind;
    use bima_api::test_utils::{FakeSms, SmsBehavior};
    use common::enums::NotifyEvent;
    use common::ids::RiderId;
    use common::rng::SmallRng;

    use super::*;
    use crate::testing;

    fn orchestrator(
        store: &Arc<Store>,
        primary: FakeSms,
        secondary: Option<FakeSms>,
    ) -> NotifyOrchestrator {
        NotifyOrchestrator::new(
            store.clone(),
            Box::new(SmallRng::from_u64(21)),
            Arc::new(primary),
            secondary.map(|s| Arc::new(s) as Arc<dyn SmsApi>),
            None,
            None,
            NotifyConfig::default(),
        )
    }

    fn reminder(rider_id: RiderId) -> SendRequest {
        SendRequest::new(rider_id, NotifyEvent::PaymentReminder)
            .variable("days_remaining", 12)
            .variable("amount", "87.00")
    }

    #[tokio::test(start_paused = true)]
    async fn primary_fails_secondary_succeeds() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let primary =
            FakeSms::new("primary", SmsBehavior::AlwaysErr(
                ProviderErrorKind::Unavailable,
            ));
        let secondary = FakeSms::ok("secondary");
        let orchestrator = orchestrator(
            &store,
            primary.clone(),
            Some(secondary.clone()),
        );

        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        let SendOutcome::Sent { provider, notification_id } = outcome
        else {
            panic!("expected Sent, got {outcome:?}");
        };
        assert_eq!(provider, "secondary");

        // Primary was tried 1 + max_retries times, secondary once.
        assert_eq!(primary.attempts(), 1 + NOTIFY_MAX_RETRIES);
        assert_eq!(secondary.attempts(), 1);

        let metrics = orchestrator.metrics();
        assert_eq!(metrics.failovers, 1);
        assert_eq!(metrics.total_sent, 1);

        store.read(|state| {
            let n = state.notification(notification_id).unwrap();
            assert_eq!(n.status, NotificationStatus::Sent);
            assert_eq!(n.provider.as_deref(), Some("secondary"));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_then_failed() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let primary = FakeSms::new(
            "primary",
            SmsBehavior::AlwaysErr(ProviderErrorKind::Unavailable),
        );
        let secondary = FakeSms::new(
            "secondary",
            SmsBehavior::AlwaysErr(ProviderErrorKind::Unavailable),
        );
        let orchestrator = orchestrator(
            &store,
            primary.clone(),
            Some(secondary.clone()),
        );

        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert_eq!(primary.attempts(), 1 + NOTIFY_MAX_RETRIES);
        assert_eq!(secondary.attempts(), 1 + NOTIFY_MAX_RETRIES);
        assert_eq!(orchestrator.metrics().total_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let primary = FakeSms::new(
            "primary",
            SmsBehavior::AlwaysErr(ProviderErrorKind::Blacklisted),
        );
        let secondary = FakeSms::ok("secondary");
        let orchestrator = orchestrator(
            &store,
            primary.clone(),
            Some(secondary.clone()),
        );

        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent { .. }));
        // No retries against the primary on a permanent rejection.
        assert_eq!(primary.attempts(), 1);
        assert_eq!(secondary.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_on_same_provider() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let primary = FakeSms::new("primary", SmsBehavior::FailTimes(2));
        let orchestrator = orchestrator(&store, primary.clone(), None);

        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        let SendOutcome::Sent { provider, .. } = outcome else {
            panic!("expected Sent, got {outcome:?}");
        };
        assert_eq!(provider, "primary");
        assert_eq!(primary.attempts(), 3);
        assert_eq!(orchestrator.metrics().retries, 2);
    }

    #[tokio::test]
    async fn event_opt_out_skips() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        store.must_transact(|state| {
            let mut prefs = state.preferences_of(rider_id);
            prefs.disabled_events.insert(NotifyEvent::PaymentReminder);
            state.preferences.insert(rider_id, prefs);
            Ok(())
        });
        let orchestrator =
            orchestrator(&store, FakeSms::ok("primary"), None);

        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Skipped { reason: SkipReason::EventDisabled },
        );
    }

    #[tokio::test]
    async fn delivery_report_updates_row_and_suppresses() {
        let store = Arc::new(Store::new());
        let (rider_id, _) = testing::seed_rider(&store, 1);
        let orchestrator =
            orchestrator(&store, FakeSms::ok("primary"), None);

        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        let SendOutcome::Sent { notification_id, .. } = outcome else {
            panic!("expected Sent");
        };
        let message_id = store.read(|s| {
            s.notification(notification_id)
                .unwrap()
                .external_message_id
                .clone()
                .unwrap()
        });

        orchestrator
            .handle_delivery_report(&DeliveryReport {
                message_id: message_id.clone(),
                state: DeliveryState::Delivered,
                reason: None,
                bounce_type: None,
                timestamp: TimestampMs::now(),
            })
            .unwrap();
        store.read(|s| {
            let n = s.notification(notification_id).unwrap();
            assert_eq!(n.status, NotificationStatus::Delivered);
            assert!(n.delivered_at.is_some());
        });

        // A hard bounce suppresses the recipient for future sends.
        orchestrator
            .handle_delivery_report(&DeliveryReport {
                message_id,
                state: DeliveryState::Bounced,
                reason: Some("number disconnected".to_owned()),
                bounce_type: Some("hard".to_owned()),
                timestamp: TimestampMs::now(),
            })
            .unwrap();
        let outcome =
            orchestrator.send(reminder(rider_id)).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Skipped { reason: SkipReason::Suppressed },
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_majority_failure_fails_over() {
        let store = Arc::new(Store::new());
        let mut requests = Vec::new();
        for i in 1..=4u8 {
            let (rider_id, _) = testing::seed_rider(&store, i);
            requests.push(reminder(rider_id));
        }
        let primary = FakeSms::new(
            "primary",
            SmsBehavior::AlwaysErr(ProviderErrorKind::Unavailable),
        );
        let secondary = FakeSms::ok("secondary");
        let orchestrator = orchestrator(
            &store,
            primary.clone(),
            Some(secondary.clone()),
        );

        let summary =
            orchestrator.send_bulk_sms(requests).await.unwrap();
        assert!(summary.failover_used);
        assert_eq!(summary.sent, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(secondary.sent().len(), 4);
    }
}
