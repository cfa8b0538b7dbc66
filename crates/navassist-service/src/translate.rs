//! Translation of detected-object descriptions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TranslationConfig;
use crate::error::{CollaboratorError, Result};

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String>;
}

/// Client for a LibreTranslate-compatible `/translate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: Client,
    url: String,
    source: String,
    target: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
}

impl HttpTranslator {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            source: config.source.clone(),
            target: config.target.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> TranslateRequest<'a> {
        TranslateRequest {
            q: text,
            source: &self.source,
            target: &self.target,
            format: "text",
            api_key: self.api_key.as_deref(),
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    #[tracing::instrument(skip(self))]
    async fn translate(&self, text: &str) -> Result<String> {
        let response: TranslateResponse = self
            .client
            .post(&self.url)
            .json(&self.request(text))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let translated = response.translated_text.trim();
        if translated.is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "empty translation".to_string(),
            ));
        }
        debug!(translated, "Translated");
        Ok(translated.to_string())
    }
}

/// Returns text unchanged. Used when translation is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let config = TranslationConfig {
            api_key: Some("k".to_string()),
            ..Default::default()
        };
        let translator = HttpTranslator::new(&config).unwrap();
        let body = serde_json::to_value(translator.request("chair")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "q": "chair",
                "source": "en",
                "target": "es",
                "format": "text",
                "api_key": "k",
            })
        );
    }

    #[test]
    fn test_request_body_without_key() {
        let translator = HttpTranslator::new(&TranslationConfig::default()).unwrap();
        let body = serde_json::to_value(translator.request("dog")).unwrap();
        assert!(body.get("api_key").is_none());
    }

    #[test]
    fn test_parse_response() {
        let response: TranslateResponse =
            serde_json::from_str(r#"{"translatedText": "silla"}"#).unwrap();
        assert_eq!(response.translated_text, "silla");
    }

    #[tokio::test]
    async fn test_passthrough() {
        assert_eq!(
            PassthroughTranslator.translate("person").await.unwrap(),
            "person"
        );
    }
}
