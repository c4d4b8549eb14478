// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Notification mail.

use crate::config::{NotificationConfig, SmtpConfig};
use crate::models::{Mention, MentionStatus};
use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid mail address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Capability to deliver a plain-text mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Mailer backed by an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_mail(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let mut message = Message::builder().from(mailbox(from)?).subject(subject);
        for recipient in to {
            message = message.to(mailbox(recipient)?);
        }
        let message = message.body(body.to_string())?;
        self.transport.send(message).await?;
        debug!(recipients = to.len(), subject = %subject, "Mail sent");
        Ok(())
    }
}

/// A mail captured by [`RecordingMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Keeps mails in memory instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMail {
                from: from.to_string(),
                to: to.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}

/// Tells administrators about finished verifications.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    from: String,
    recipients: Vec<String>,
    public_url: String,
}

impl Notifier {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        config: &NotificationConfig,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            from: config.mail_from.clone(),
            recipients: config.admin_emails.clone(),
            public_url: public_url.into(),
        }
    }

    pub async fn mention_verified(
        &self,
        mention: &Mention,
        status: MentionStatus,
    ) -> Result<(), MailError> {
        if self.recipients.is_empty() {
            warn!("No notification recipients configured");
            return Ok(());
        }
        let body = format!(
            "Source: <{}>\nTarget: <{}>\nNew status: {}\n\nGo to <{}/ui/> for details.",
            mention.source,
            mention.target,
            status,
            self.public_url.trim_end_matches('/'),
        );
        self.mailer
            .send_mail(&self.from, &self.recipients, "Mention verified", &body)
            .await
    }
}
