//! `Notification` and per-rider preferences.

use std::collections::{BTreeMap, HashSet};

use common::enums::{
    Channel, NotificationStatus, NotifyEvent, NotifyPriority,
};
use common::ids::{NotificationId, RiderId};
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

/// A rendered message headed for (or already through) a provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub rider_id: RiderId,
    pub channel: Channel,
    pub event: NotifyEvent,
    pub status: NotificationStatus,
    /// E.164 phone or email address, depending on channel.
    pub recipient: String,
    /// Channel-specific; empty for SMS / WhatsApp.
    pub subject: String,
    pub body: String,
    pub template_id: String,
    pub variables: BTreeMap<String, String>,
    pub retry_count: u32,
    pub scheduled_for: Option<TimestampMs>,
    pub priority: NotifyPriority,
    /// The provider's message id, once a send succeeded.
    pub external_message_id: Option<String>,
    /// Which provider carried the message, e.g. "atalking".
    pub provider: Option<String>,
    pub error: Option<String>,
    pub created_at: TimestampMs,
    pub sent_at: Option<TimestampMs>,
    pub delivered_at: Option<TimestampMs>,
    pub opened_at: Option<TimestampMs>,
    pub clicked_at: Option<TimestampMs>,
}

/// Per-rider notification preferences.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyPreferences {
    pub rider_id: RiderId,
    /// Event types the rider has opted out of.
    pub disabled_events: HashSet<NotifyEvent>,
    /// Channels the rider has unsubscribed from.
    pub unsubscribed_channels: HashSet<Channel>,
    pub quiet_hours: QuietHours,
}

impl NotifyPreferences {
    pub fn defaults(rider_id: RiderId) -> Self {
        Self {
            rider_id,
            disabled_events: HashSet::new(),
            unsubscribed_channels: HashSet::new(),
            quiet_hours: QuietHours::default(),
        }
    }

    pub fn event_enabled(&self, event: NotifyEvent) -> bool {
        !self.disabled_events.contains(&event)
    }

    pub fn channel_subscribed(&self, channel: Channel) -> bool {
        !self.unsubscribed_channels.contains(&channel)
    }
}

/// A per-rider quiet window in local wall-clock minutes since midnight.
/// The window may span midnight (22:00 - 06:00 does).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        let ((sh, sm), (eh, em)) = common::constants::DEFAULT_QUIET_HOURS;
        Self {
            start_minute: sh * 60 + sm,
            end_minute: eh * 60 + em,
        }
    }
}

impl QuietHours {
    /// Whether local time `minute_of_day` falls inside the quiet window.
    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.start_minute == self.end_minute {
            // Degenerate config; treat as "no quiet hours".
            return false;
        }
        if self.start_minute < self.end_minute {
            (self.start_minute..self.end_minute).contains(&minute_of_day)
        } else {
            // Spans midnight.
            minute_of_day >= self.start_minute
                || minute_of_day < self.end_minute
        }
    }
}

/// A suppression entry: hard bounces and complaints mark the recipient for
/// automatic skip on future sends of the same channel.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Suppression {
    pub channel: Channel,
    pub recipient: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quiet_hours_span_midnight() {
        let quiet = QuietHours::default();
        // 23:30 and 05:59 are quiet; 06:00 and 12:00 are not.
        assert!(quiet.contains(23 * 60 + 30));
        assert!(quiet.contains(5 * 60 + 59));
        assert!(quiet.contains(22 * 60));
        assert!(!quiet.contains(6 * 60));
        assert!(!quiet.contains(12 * 60));
        assert!(!quiet.contains(21 * 60 + 59));
    }

    #[test]
    fn quiet_hours_same_day_window() {
        let quiet = QuietHours {
            start_minute: 13 * 60,
            end_minute: 14 * 60,
        };
        assert!(quiet.contains(13 * 60 + 30));
        assert!(!quiet.contains(14 * 60));
        assert!(!quiet.contains(12 * 60 + 59));
    }
}
