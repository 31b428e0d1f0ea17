//! Notification orchestrator: templated sends with provider failover,
//! bounded retry, and quiet-hour deferral.

use std::collections::BTreeMap;

use common::enums::{Channel, NotifyEvent, NotifyPriority};
use common::ids::{NotificationId, RiderId};
use common::time::TimestampMs;

/// `NotifyOrchestrator`.
pub mod orchestrator;
/// Message templates.
pub mod templates;

pub use orchestrator::{NotifyConfig, NotifyOrchestrator};

/// One message to one rider.
#[derive(Clone, Debug)]
pub struct SendRequest {
    pub rider_id: RiderId,
    pub event: NotifyEvent,
    pub variables: BTreeMap<String, String>,
    /// Defaults to SMS when unset.
    pub channel: Option<Channel>,
    pub priority: NotifyPriority,
    /// Deliver no earlier than this; the scheduled-sweep worker re-enters
    /// it when due.
    pub scheduled_for: Option<TimestampMs>,
}

impl SendRequest {
    pub fn new(rider_id: RiderId, event: NotifyEvent) -> Self {
        Self {
            rider_id,
            event,
            variables: BTreeMap::new(),
            channel: None,
            priority: NotifyPriority::Normal,
            scheduled_for: None,
        }
    }

    pub fn variable(
        mut self,
        name: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        self.variables.insert(name.into(), value.to_string());
        self
    }

    pub fn priority(mut self, priority: NotifyPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn scheduled_for(mut self, at: TimestampMs) -> Self {
        self.scheduled_for = Some(at);
        self
    }
}

/// Why a send was skipped without persisting an attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    EventDisabled,
    ChannelUnsubscribed,
    /// The recipient hard-bounced or complained previously.
    Suppressed,
    /// The rider has no address for the requested channel.
    NoRecipient,
}

/// What one [`SendRequest`] resulted in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    Sent {
        notification_id: NotificationId,
        provider: String,
    },
    Skipped {
        reason: SkipReason,
    },
    /// Persisted with a future `scheduled_for`.
    Scheduled {
        notification_id: NotificationId,
    },
    /// Rescheduled past the rider's quiet hours.
    Deferred {
        notification_id: NotificationId,
        until: TimestampMs,
    },
    /// All providers exhausted.
    Failed {
        notification_id: NotificationId,
        error: String,
    },
}

/// Orchestrator counters, exposed for ops dashboards.
#[derive(Clone, Debug, Default)]
pub struct NotifyMetrics {
    pub total_sent: u64,
    pub total_failed: u64,
    pub retries: u64,
    pub failovers: u64,
    pub response_time_ms_total: u64,
    pub response_time_samples: u64,
    pub by_provider: BTreeMap<String, u64>,
    pub by_error_kind: BTreeMap<String, u64>,
}

impl NotifyMetrics {
    pub fn success_rate(&self) -> f64 {
        let total = self.total_sent + self.total_failed;
        if total == 0 {
            return 1.0;
        }
        self.total_sent as f64 / total as f64
    }

    pub fn avg_response_ms(&self) -> f64 {
        if self.response_time_samples == 0 {
            return 0.0;
        }
        self.response_time_ms_total as f64
            / self.response_time_samples as f64
    }
}
