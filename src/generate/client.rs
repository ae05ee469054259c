//! OpenAI-compatible chat client
//!
//! One blocking round-trip per generation: `POST {base_url}/chat/completions`
//! with a bearer token. No retries here — the generator decides whether a
//! failure degrades to the heuristic path or surfaces.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::LlmConfig;

use super::llm::TextModel;

/// Chat-endpoint failures, all of which map to the `llm_failed` error kind.
#[derive(Debug, Error)]
pub enum LlmClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Server(reqwest::StatusCode),
    #[error("response missing choices[0].message.content")]
    MissingContent,
    #[error("no API key configured")]
    MissingApiKey,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// HTTP client for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiClient {
    /// Build a client from config; errors when no key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmClientError> {
        let api_key = config.api_key.clone().ok_or(LlmClientError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextModel for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmClientError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LlmClientError::Server(resp.status()));
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmClientError::MissingContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_rejected_up_front() {
        let config = LlmConfig::default();
        assert!(matches!(
            OpenAiClient::from_config(&config),
            Err(LlmClientError::MissingApiKey)
        ));
    }

    #[test]
    fn chat_response_shape_parses() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"[]"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).expect("parses");
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("[]"));
    }
}
