//! Quiet-hour deferral, scheduled sweeps, and unsubscribes, end to end.

mod harness;

use bima_core::models::notification::QuietHours;
use bima_core::notify::{SendOutcome, SendRequest, SkipReason};
use chrono::{FixedOffset, Timelike};
use common::enums::{
    Channel, NotificationStatus, NotifyEvent, NotifyPriority,
};
use common::time::TimestampMs;
use harness::Harness;

fn local_minute_now() -> u32 {
    let offset = FixedOffset::east_opt(3 * 3600).unwrap();
    let local = TimestampMs::now().to_datetime().with_timezone(&offset);
    local.hour() * 60 + local.minute()
}

fn reminder(rider_id: common::ids::RiderId) -> SendRequest {
    SendRequest::new(rider_id, NotifyEvent::PaymentReminder)
        .variable("days_remaining", 12)
        .variable("amount", "87.00")
}

#[tokio::test]
async fn quiet_hours_defer_normal_but_not_urgent() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);

    // A quiet window that definitely contains "now" local time.
    let start = local_minute_now();
    let end = (start + 120) % (24 * 60);
    harness.store.must_transact(|state| {
        let mut prefs = state.preferences_of(rider_id);
        prefs.quiet_hours = QuietHours {
            start_minute: start,
            end_minute: end,
        };
        state.preferences.insert(rider_id, prefs);
        Ok(())
    });

    let outcome = harness
        .orchestrator
        .send(reminder(rider_id))
        .await
        .unwrap();
    let SendOutcome::Deferred { notification_id, until } = outcome else {
        panic!("expected Deferred, got {outcome:?}");
    };
    assert!(until > TimestampMs::now());
    harness.store.read(|state| {
        let n = state.notification(notification_id).unwrap();
        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.scheduled_for, Some(until));
    });

    // URGENT bypasses the quiet window.
    let outcome = harness
        .orchestrator
        .send(reminder(rider_id).priority(NotifyPriority::Urgent))
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));
}

#[tokio::test]
async fn sweep_delivers_scheduled_and_deferred() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);

    // Scheduled for later: persisted but not delivered.
    let later = TimestampMs::now().add_days(1);
    let outcome = harness
        .orchestrator
        .send(reminder(rider_id).scheduled_for(later))
        .await
        .unwrap();
    let SendOutcome::Scheduled { notification_id } = outcome else {
        panic!("expected Scheduled, got {outcome:?}");
    };
    assert!(harness.sms_primary.sent().is_empty());

    // Nothing due yet.
    let attempted = harness
        .orchestrator
        .sweep_due(TimestampMs::now())
        .await
        .unwrap();
    assert_eq!(attempted, 0);

    // Once due, the sweep sends it.
    let attempted = harness
        .orchestrator
        .sweep_due(later.saturating_add(std::time::Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(attempted, 1);
    harness.store.read(|state| {
        let n = state.notification(notification_id).unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
    });
}

#[tokio::test]
async fn unsubscribed_channel_is_skipped() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);
    harness.store.must_transact(|state| {
        let mut prefs = state.preferences_of(rider_id);
        prefs.unsubscribed_channels.insert(Channel::Sms);
        state.preferences.insert(rider_id, prefs);
        Ok(())
    });

    let outcome = harness
        .orchestrator
        .send(reminder(rider_id))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SendOutcome::Skipped {
            reason: SkipReason::ChannelUnsubscribed,
        },
    );
    harness
        .store
        .read(|state| assert!(state.notifications.is_empty()));
}

#[tokio::test]
async fn missing_template_is_an_error() {
    let harness = Harness::new();
    let (rider_id, _) = harness.seed_rider(1);

    // There is no PUSH template seeded for any event.
    let err = harness
        .orchestrator
        .send(reminder(rider_id).channel(Channel::Push))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        bima_core::error::Error::NotFound { entity: "template", .. },
    ));
}
