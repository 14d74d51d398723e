//! Outbound SMS gateway port.
//!
//! The dispatcher never sends SMS inline from a handler: user-visible
//! messages go through the `send_notification` queue and only the notify
//! drain talks to this gateway.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::SmsConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("sms gateway is not configured")]
    NotConfigured,
    #[error("no recipient number available")]
    NoRecipient,
    #[error("sms gateway request failed: {0}")]
    Gateway(String),
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotifyError>;

    fn default_recipient(&self) -> Option<String>;

    fn is_configured(&self) -> bool;
}

/// Twilio-style REST adapter: basic-auth form POST to the messages endpoint.
pub struct HttpSmsGateway {
    client: reqwest::Client,
    config: SmsConfig,
}

impl HttpSmsGateway {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        let (Some(sid), Some(token), Some(from)) = (
            self.config.account_sid.as_deref(),
            self.config.auth_token.as_deref(),
            self.config.from_number.as_deref(),
        ) else {
            return Err(NotifyError::NotConfigured);
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(sid, Some(token))
            .form(&[("To", to), ("From", from), ("Body", body)])
            .send()
            .await
            .map_err(|e| NotifyError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Gateway(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        tracing::info!(to, "sms sent");
        Ok(())
    }

    fn default_recipient(&self) -> Option<String> {
        self.config.default_to.clone()
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

/// Capturing adapter for tests and local development.
#[derive(Default)]
pub struct MemorySmsGateway {
    sent: Mutex<Vec<(String, String)>>,
    default_to: Option<String>,
}

impl MemorySmsGateway {
    pub fn new(default_to: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            default_to: Some(default_to.into()),
        }
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SmsGateway for MemorySmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .await
            .push((to.to_string(), body.to_string()));
        Ok(())
    }

    fn default_recipient(&self) -> Option<String> {
        self.default_to.clone()
    }

    fn is_configured(&self) -> bool {
        true
    }
}
