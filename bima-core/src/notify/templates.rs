//! Message templates.
//!
//! Templates are resolved by `(channel, event)` and rendered by replacing
//! `{{variable}}` placeholders. Rendering fails when a declared placeholder
//! is missing from the variables map, so a half-filled message can never
//! reach a rider.

use std::collections::{BTreeMap, BTreeSet};

use common::enums::{Channel, NotifyEvent};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    /// Stable id, e.g. `sms.policy_issued`.
    pub id: String,
    pub channel: Channel,
    pub event: NotifyEvent,
    /// Channel-specific; empty for SMS / WhatsApp.
    pub subject: String,
    pub body: String,
}

/// A rendered subject and body, ready for delivery.
#[derive(Clone, Debug)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

impl Template {
    /// The set of `{{variable}}` names this template declares.
    pub fn required_vars(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        scan_placeholders(&self.subject, &mut vars);
        scan_placeholders(&self.body, &mut vars);
        vars
    }

    /// Render with `variables`, failing on any missing placeholder.
    pub fn render(
        &self,
        variables: &BTreeMap<String, String>,
    ) -> Result<Rendered, Error> {
        let missing: Vec<String> = self
            .required_vars()
            .into_iter()
            .filter(|v| !variables.contains_key(v))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "template {}: missing variables: {}",
                self.id,
                missing.join(", "),
            )));
        }
        Ok(Rendered {
            subject: substitute(&self.subject, variables),
            body: substitute(&self.body, variables),
        })
    }
}

fn scan_placeholders(text: &str, out: &mut BTreeSet<String>) {
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                out.insert(after[..end].trim().to_owned());
                rest = &after[end + 2..];
            }
            None => break,
        }
    }
}

fn substitute(text: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = text.to_owned();
    for (name, value) in variables {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// The seed template registry.
pub fn default_templates() -> Vec<Template> {
    let sms = |event, id: &str, body: &str| Template {
        id: format!("sms.{id}"),
        channel: Channel::Sms,
        event,
        subject: String::new(),
        body: body.to_owned(),
    };
    let whatsapp = |event, id: &str, body: &str| Template {
        id: format!("whatsapp.{id}"),
        channel: Channel::Whatsapp,
        event,
        subject: String::new(),
        body: body.to_owned(),
    };
    let email = |event, id: &str, subject: &str, body: &str| Template {
        id: format!("email.{id}"),
        channel: Channel::Email,
        event,
        subject: subject.to_owned(),
        body: body.to_owned(),
    };

    use NotifyEvent::*;
    vec![
        sms(
            PaymentReceived,
            "payment_received",
            "Payment of KES {{amount}} received. You have {{days_remaining}} \
             daily payments to go. Karibu!",
        ),
        sms(
            DepositConfirmed,
            "deposit_confirmed",
            "Deposit of KES {{amount}} received. Your one-month cover will \
             be issued at the next batch. Karibu Bima!",
        ),
        sms(
            DailyCycleCompleted,
            "daily_cycle_completed",
            "Hongera! All 30 daily payments are complete. Your eleven-month \
             cover will be issued shortly.",
        ),
        sms(
            PolicyIssued,
            "policy_issued",
            "Your cover {{policy_number}} is now ACTIVE until {{coverage_end}}. \
             Certificate: {{certificate_url}}",
        ),
        sms(
            PolicyCancelled,
            "policy_cancelled",
            "Your cover {{policy_number}} has been cancelled. A refund of \
             KES {{refund_amount}} is being processed.",
        ),
        sms(
            RefundProcessed,
            "refund_processed",
            "Your refund of KES {{refund_amount}} has been processed to \
             your mobile money account.",
        ),
        sms(
            PaymentFailed,
            "payment_failed",
            "Your payment could not be completed: {{reason}}. Please try \
             again.",
        ),
        sms(
            PaymentReminder,
            "payment_reminder",
            "Habari! A friendly reminder: {{days_remaining}} daily payments \
             of KES {{amount}} remain on your Bima cover.",
        ),
        sms(
            ManualReviewRequired,
            "manual_review",
            "We could not confirm your payment. Our team is reviewing it \
             and will contact you shortly.",
        ),
        whatsapp(
            PolicyIssued,
            "policy_issued",
            "Your cover {{policy_number}} is now active. Your certificate \
             is attached.",
        ),
        email(
            PolicyIssued,
            "policy_issued",
            "Your Bima cover {{policy_number}} is active",
            "Hello,\n\nYour cover {{policy_number}} is active until \
             {{coverage_end}}.\nDownload your certificate: \
             {{certificate_url}}\n\nBima",
        ),
        email(
            RefundProcessed,
            "refund_processed",
            "Your Bima refund",
            "Hello,\n\nYour refund of KES {{refund_amount}} has been \
             processed.\n\nBima",
        ),
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scans_and_renders_placeholders() {
        let template = Template {
            id: "sms.test".to_owned(),
            channel: Channel::Sms,
            event: NotifyEvent::PaymentReceived,
            subject: String::new(),
            body: "KES {{amount}}, {{days_remaining}} to go".to_owned(),
        };
        let required = template.required_vars();
        assert!(required.contains("amount"));
        assert!(required.contains("days_remaining"));

        let mut vars = BTreeMap::new();
        vars.insert("amount".to_owned(), "87.00".to_owned());
        vars.insert("days_remaining".to_owned(), "12".to_owned());
        let rendered = template.render(&vars).unwrap();
        assert_eq!(rendered.body, "KES 87.00, 12 to go");
    }

    #[test]
    fn render_fails_on_missing_variable() {
        let template = Template {
            id: "sms.test".to_owned(),
            channel: Channel::Sms,
            event: NotifyEvent::PaymentReceived,
            subject: String::new(),
            body: "KES {{amount}}".to_owned(),
        };
        let err = template.render(&BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn default_registry_covers_every_sms_event() {
        use strum::VariantArray;
        let templates = default_templates();
        for event in NotifyEvent::VARIANTS {
            assert!(
                templates
                    .iter()
                    .any(|t| t.channel == Channel::Sms && t.event == *event),
                "no sms template for {event}",
            );
        }
    }
}
