/// Outbound email delivery
///
/// [`Mailer`] abstracts the delivery provider. [`ResendMailer`] posts to the
/// Resend HTTP API; [`LogMailer`] only logs, for development and tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const RESEND_API_URL: &str = "https://api.resend.com";

/// Error type for email delivery
#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    /// Provider rejected the message
    #[error("Email provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// Network or client failure
    #[error("Email request failed: {0}")]
    Transport(String),

    /// Missing or invalid settings
    #[error("Mailer not configured: {0}")]
    NotConfigured(String),
}

/// A fully rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &str;

    /// Delivers one message
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError>;
}

/// Logs messages instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            html_length = email.html.len(),
            "Email (log mailer, not sent)"
        );
        Ok(())
    }
}

/// Resend HTTP API client
#[derive(Debug, Clone)]
pub struct ResendMailer {
    http: Client,
    base_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl ResendMailer {
    /// Creates a mailer for the given API key and sender address
    pub fn new(
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailerError> {
        Self::with_base_url(RESEND_API_URL, api_key, from, timeout)
    }

    /// Like [`ResendMailer::new`] with a custom API origin
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailerError> {
        let api_key = api_key.into();
        let from = from.into();

        if api_key.trim().is_empty() {
            return Err(MailerError::NotConfigured("Resend API key is empty".into()));
        }
        if !from.contains('@') {
            return Err(MailerError::NotConfigured(format!(
                "invalid sender address '{}'",
                from
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailerError::NotConfigured(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    fn name(&self) -> &str {
        "resend"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError> {
        debug!(to = %email.to, subject = %email.subject, "Sending email via Resend");

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailerError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
