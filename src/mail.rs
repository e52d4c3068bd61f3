//! Outgoing email.
//!
//! Delivery goes through the [`Mailer`] trait. [`HttpMailer`] posts to a
//! Resend style API; [`LogMailer`] only logs and is used when no mail API is
//! configured. Sends are not retried: a failure is logged and the flow that
//! triggered it carries on.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Mail API returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Sends through an HTTP mail API with a bearer key.
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpMailer {
    pub fn new(endpoint: &str, api_key: String) -> Result<Self, MailError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(MailError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Logs emails instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(to = %email.to, subject = %email.subject, "Mail API not configured, email not sent");
        tracing::debug!(html = %email.html, "Email body");
        Ok(())
    }
}

/// Absolute link to a page carrying a signature.
pub fn signed_link(public_url: &Url, path: &str, signature: &str) -> String {
    match public_url.join(path) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("signature", signature);
            url.to_string()
        }
        Err(_) => format!("{}?signature={}", path, signature),
    }
}

/// Builds the emails the service sends and hands them to a [`Mailer`].
#[derive(Clone)]
pub struct Outbox {
    mailer: Arc<dyn Mailer>,
    from: String,
    public_url: Url,
}

impl Outbox {
    pub fn new(mailer: Arc<dyn Mailer>, from: String, public_url: Url) -> Self {
        Self {
            mailer,
            from,
            public_url,
        }
    }

    pub fn signed_link(&self, path: &str, signature: &str) -> String {
        signed_link(&self.public_url, path, signature)
    }

    async fn deliver(&self, to: &str, subject: &str, html: String) {
        let email = Email {
            from: self.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            html,
        };
        if let Err(e) = self.mailer.send(&email).await {
            tracing::error!(to = %to, subject = %subject, error = %e, "Failed to send email");
        }
    }

    pub async fn send_license_code(&self, to: &str, code: &str, signature: &str) {
        let link = self.signed_link("/license-verify", signature);
        let html = format!(
            "<p>Your verification code is <strong>{code}</strong>.</p>\
             <p>It expires in 10 minutes. Enter it on <a href=\"{link}\">the verification page</a>.</p>\
             <p>If you did not request this, you can ignore this email.</p>"
        );
        self.deliver(to, "Your license verification code", html).await;
    }

    pub async fn send_reset_link(&self, to: &str, signature: &str) {
        let link = self.signed_link("/reset-password", signature);
        let html = format!(
            "<p>Someone asked to reset the password for this account.</p>\
             <p><a href=\"{link}\">Choose a new password</a>. The link expires in 1 hour.</p>"
        );
        self.deliver(to, "Reset your password", html).await;
    }

    pub async fn send_invite(&self, to: &str, role: &str, signature: &str) {
        let link = self.signed_link("/invite", signature);
        let html = format!(
            "<p>You have been invited to join as <strong>{role}</strong>.</p>\
             <p><a href=\"{link}\">Accept the invitation</a>. The link expires in 7 days.</p>"
        );
        self.deliver(to, "You have been invited", html).await;
    }
}
