//! Email notification of dispatch results.
//!
//! The recipient is derived from the event. Only `push` events carry an
//! obvious one (the head commit's author); every other event type is
//! skipped on purpose. Send failures are logged and dropped.

pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::report::DispatchReport;
use crate::error::NotifyError;
use crate::event::WebhookEvent;

pub use smtp::SmtpMailer;

/// A composed plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), NotifyError>;
}

/// What `notify` ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent { to: String },
    /// Notifications are switched off.
    Disabled,
    /// The event type has no recipient.
    NoRecipient,
    Failed(String),
}

/// Sends a summary of each dispatch to the event's author.
#[derive(Clone)]
pub struct Notifier {
    mailer: Option<Arc<dyn Mailer>>,
    from_address: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, from_address: impl Into<String>) -> Self {
        Self {
            mailer: Some(mailer),
            from_address: from_address.into(),
        }
    }

    /// A notifier that never sends.
    pub fn disabled() -> Self {
        Self {
            mailer: None,
            from_address: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    /// Recipient for an event: the head commit author on `push`, nobody
    /// otherwise.
    pub fn recipient(event: &WebhookEvent) -> Option<&str> {
        if !event.is_push() {
            return None;
        }
        event
            .str_at("/head_commit/author/email")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn subject(report: &DispatchReport) -> String {
        format!(
            "Webhook handler: {} from {} received",
            report.event_type,
            report.repository_label()
        )
    }

    /// Build the message for this event, if it has a recipient.
    pub fn compose(&self, event: &WebhookEvent, report: &DispatchReport) -> Option<OutgoingMail> {
        let to = Self::recipient(event)?;
        Some(OutgoingMail {
            from: self.from_address.clone(),
            to: to.to_string(),
            subject: Self::subject(report),
            body: report.render(),
        })
    }

    pub async fn notify(&self, event: &WebhookEvent, report: &DispatchReport) -> NotifyOutcome {
        let Some(mailer) = &self.mailer else {
            tracing::debug!("Notifications disabled, not sending report");
            return NotifyOutcome::Disabled;
        };
        let Some(mail) = self.compose(event, report) else {
            tracing::debug!(event = %event.event_type, "No recipient for event type, not sending report");
            return NotifyOutcome::NoRecipient;
        };

        let to = mail.to.clone();
        match mailer.send(mail).await {
            Ok(()) => {
                tracing::info!(to = %to, "Report emailed");
                NotifyOutcome::Sent { to }
            }
            Err(e) => {
                tracing::error!(to = %to, "Failed to email report: {e}");
                NotifyOutcome::Failed(e.to_string())
            }
        }
    }
}
