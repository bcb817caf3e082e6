//! SMTP transport via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use crate::notify::{Mailer, OutgoingMail};

/// Connect/IO timeout for one relay conversation.
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends through a configured SMTP relay.
///
/// lettre's `SmtpTransport` is blocking, so each send runs on the blocking
/// pool. A fresh connection is made per message.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: NotifyConfig,
}

impl SmtpMailer {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    fn transport(config: &NotifyConfig) -> Result<SmtpTransport, NotifyError> {
        let mut builder = if config.smtp_tls {
            SmtpTransport::relay(&config.smtp_host)
                .map_err(|e| NotifyError::Relay(e.to_string()))?
        } else {
            // Plain local relay, as with a host-local MTA.
            SmtpTransport::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port).timeout(Some(SMTP_TIMEOUT));

        if let Some(username) = &config.username {
            let password = config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(builder.build())
    }
}

/// Build a lettre message from an [`OutgoingMail`].
pub fn build_message(mail: &OutgoingMail) -> Result<Message, NotifyError> {
    let from: Mailbox = mail.from.parse().map_err(|e| NotifyError::InvalidAddress {
        role: "from",
        address: mail.from.clone(),
        reason: format!("{e}"),
    })?;
    let to: Mailbox = mail.to.parse().map_err(|e| NotifyError::InvalidAddress {
        role: "to",
        address: mail.to.clone(),
        reason: format!("{e}"),
    })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.clone())
        .map_err(|e| NotifyError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), NotifyError> {
        let message = build_message(&mail)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let transport = Self::transport(&config)?;
            transport
                .send(&message)
                .map(|_| ())
                .map_err(|e| NotifyError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| NotifyError::SendFailed(format!("send task failed: {e}")))?
    }
}
