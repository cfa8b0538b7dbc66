//! Emergency text messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SmsConfig;
use crate::error::Result;

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<()>;
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        warn!(phone, message, "No SMS gateway configured, message not delivered");
        Ok(())
    }
}

/// Posts `{"to": .., "message": ..}` to an SMS gateway.
#[derive(Debug, Clone)]
pub struct WebhookSmsSender {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    to: &'a str,
    message: &'a str,
}

impl WebhookSmsSender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SmsSender for WebhookSmsSender {
    #[tracing::instrument(skip(self, message))]
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&SmsPayload { to: phone, message })
            .send()
            .await?
            .error_for_status()?;
        info!("SMS handed to gateway");
        Ok(())
    }
}

/// Sender selected by `[sms]`.
pub fn sender_from_config(config: &SmsConfig) -> Result<Arc<dyn SmsSender>> {
    let sender: Arc<dyn SmsSender> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookSmsSender::new(
            url,
            Duration::from_secs(config.timeout),
        )?),
        None => Arc::new(LogSmsSender),
    };
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let body = serde_json::to_value(SmsPayload {
            to: "6121692423",
            message: "Hola",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"to": "6121692423", "message": "Hola"})
        );
    }

    #[tokio::test]
    async fn test_log_sender_succeeds() {
        LogSmsSender.send("6121692423", "Hola").await.unwrap();
    }
}
