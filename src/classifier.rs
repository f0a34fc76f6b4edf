//! Language-model classifier collaborators.
//!
//! - **[`OpenAiClassifier`]** calls the chat completions API in JSON mode
//!   with retry and backoff.
//! - **[`DisabledClassifier`]** is used when `classifier.provider = "disabled"`.
//!   Every call fails with a transient error, so candidates are rejected
//!   individually rather than aborting the run.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx: retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - HTTP 429 with `insufficient_quota`: quota error, no retry
//! - HTTP 429 on the final attempt: quota error
//! - other HTTP 4xx: transient error, no retry
//! - network errors: retry

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::ClassifierConfig;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::traits::TextClassifier;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const SERVICE: &str = "openai";

pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiClassifier {
    /// # Errors
    ///
    /// Returns an error if the configured API key variable is not set.
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextClassifier for OpenAiClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, system: &str, prompt: &str) -> CollaboratorResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    if status.as_u16() == 429 {
                        if body_text.contains("insufficient_quota") {
                            return Err(CollaboratorError::quota(SERVICE, body_text));
                        }
                        warn!(attempt, "classifier rate limited");
                        last_err = Some(CollaboratorError::quota(
                            SERVICE,
                            format!("rate limited after {} attempts", attempt + 1),
                        ));
                        continue;
                    }

                    if status.is_server_error() {
                        last_err = Some(CollaboratorError::transient(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(CollaboratorError::transient(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CollaboratorError::transient("classification failed after retries")))
    }
}

/// Pull `choices[0].message.content` out of a chat completion response.
fn parse_chat_response(json: &serde_json::Value) -> CollaboratorResult<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CollaboratorError::transient("invalid chat response: missing choices[0].message.content")
        })
}

/// Classifier used when `classifier.provider = "disabled"`.
pub struct DisabledClassifier;

#[async_trait]
impl TextClassifier for DisabledClassifier {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn classify(&self, _system: &str, _prompt: &str) -> CollaboratorResult<String> {
        Err(CollaboratorError::transient("classifier provider is disabled"))
    }
}

/// Parse a JSON object out of raw model output.
///
/// Tolerates surrounding prose and Markdown code fences by taking the
/// outermost `{ ... }` span. Returns `None` if no object parses.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(v @ serde_json::Value::Object(_)) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_object() {
        let v = extract_json_object(r#"{"score": 80}"#).unwrap();
        assert_eq!(v["score"], 80);
    }

    #[test]
    fn extracts_fenced_object() {
        let raw = "```json\n{\"is_instructional\": true}\n```";
        let v = extract_json_object(raw).unwrap();
        assert_eq!(v["is_instructional"], true);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(extract_json_object("not json at all").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("} {").is_none());
        assert!(extract_json_object("{ broken").is_none());
    }

    #[test]
    fn parses_chat_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"a\":1}" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn missing_content_is_transient() {
        let json = serde_json::json!({ "choices": [] });
        let err = parse_chat_response(&json).unwrap_err();
        assert!(!err.is_quota());
    }
}
