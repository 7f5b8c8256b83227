//! Transactional email sending abstraction.
//!
//! `EmailSender` is the core trait: `ResendEmailSender` in production,
//! `LogEmailSender` when no API key is configured (logs to tracing),
//! `FakeEmailSender` in tests.
//!
//! The trait is object-safe so callers can hold `Arc<dyn EmailSender>`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::config::Config;

// =============================================================================
// Core trait
// =============================================================================

/// Represents a rendered email message ready to send.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Abstraction over an email transport.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, msg: EmailMessage) -> Result<()>;
}

/// Resend when `RESEND_API_KEY` is configured, otherwise the log sender
pub fn from_config(config: &Config) -> Arc<dyn EmailSender> {
    match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendEmailSender::new(
            api_key.clone(),
            config.email_from_address.clone(),
        )),
        None => {
            info!("RESEND_API_KEY not set, failure e-mails will only be logged");
            Arc::new(LogEmailSender)
        }
    }
}

// =============================================================================
// LogEmailSender: writes to tracing (dev / staging)
// =============================================================================

pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        info!(
            to = %msg.to,
            subject = %msg.subject,
            "[LogEmailSender] Would send email\n---TEXT---\n{}",
            msg.text,
        );
        Ok(())
    }
}

// =============================================================================
// FakeEmailSender: captures sent messages (tests)
// =============================================================================

/// Collects sent messages in memory; fails the first `fail_first` sends.
#[cfg(test)]
#[derive(Default)]
pub struct FakeEmailSender {
    pub sent: parking_lot::Mutex<Vec<EmailMessage>>,
    fail_first: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FakeEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            fail_first: std::sync::atomic::AtomicUsize::new(times),
        }
    }

    pub fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl EmailSender for FakeEmailSender {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        use std::sync::atomic::Ordering;

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("transport unavailable");
        }
        self.sent.lock().push(msg);
        Ok(())
    }
}

// =============================================================================
// ResendEmailSender: live Resend.com API
// =============================================================================

pub struct ResendEmailSender {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendEmailSender {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        let mut body = HashMap::new();
        body.insert("from", self.from.as_str());
        body.insert("to", msg.to.as_str());
        body.insert("subject", msg.subject.as_str());
        body.insert("html", msg.html.as_str());
        body.insert("text", msg.text.as_str());

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Resend API error {}: {}", status, body));
        }

        info!(to = %msg.to, subject = %msg.subject, "Email sent via Resend");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            to: "user@example.com".into(),
            subject: "Import Failed Notification".into(),
            html: "<p>.</p>".into(),
            text: ".".into(),
        }
    }

    #[tokio::test]
    async fn fake_sender_captures_messages() {
        let sender = FakeEmailSender::new();
        sender.send(message()).await.unwrap();

        let msgs = sender.sent_messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].to, "user@example.com");
    }

    #[tokio::test]
    async fn fake_sender_fails_configured_times() {
        let sender = FakeEmailSender::failing(2);
        assert!(sender.send(message()).await.is_err());
        assert!(sender.send(message()).await.is_err());
        assert!(sender.send(message()).await.is_ok());
        assert_eq!(sender.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn log_sender_does_not_error() {
        LogEmailSender.send(message()).await.unwrap();
    }
}
