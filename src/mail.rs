//! Mail sender seam.
//!
//! Login codes go out through whatever `Mailer` the server was started with:
//! the SendGrid HTTP API when an API key is configured, otherwise a log-only
//! sender so the flow stays usable in development.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::{AppError, AppResult};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str, html: Option<&str>) -> AppResult<()>;
}

pub type SharedMailer = Arc<dyn Mailer>;

// ---------------------------------------------------------------------------
// SendGrid HTTP API
// ---------------------------------------------------------------------------

pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl SendGridMailer {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
            endpoint: "https://api.sendgrid.com/v3/mail/send".to_string(),
        }
    }

    pub fn new_shared(api_key: impl Into<String>, from: impl Into<String>) -> SharedMailer {
        Arc::new(Self::new(api_key, from))
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, to: &str, subject: &str, text: &str, html: Option<&str>) -> AppResult<()> {
        let mut content = vec![json!({"type": "text/plain", "value": text})];
        if let Some(html) = html {
            content.push(json!({"type": "text/html", "value": html}));
        }
        let payload = json!({
            "personalizations": [{"to": [{"email": to}]}],
            "from": {"email": self.from},
            "subject": subject,
            "content": content,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::delivery(format!("mail request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::delivery(format!(
                "mail provider rejected send: {status} {body}"
            )));
        }
        info!("Login email sent to {}", to);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log-only sender (development fallback)
// ---------------------------------------------------------------------------

pub struct LogMailer;

impl LogMailer {
    pub fn shared() -> SharedMailer {
        Arc::new(LogMailer)
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, text: &str, _html: Option<&str>) -> AppResult<()> {
        info!(target: "mail", "to={} subject={:?} body={:?}", to, subject, text);
        Ok(())
    }
}
