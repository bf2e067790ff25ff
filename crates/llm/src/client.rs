//! Messages-API client
//!
//! Non-streaming completion against an Anthropic-compatible endpoint. The
//! caller and judge both produce short structured outputs, so streaming buys
//! nothing here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::LlmError;

/// Client configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.3,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Messages-API client
#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration("LLM API key not set".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Run one completion and return the concatenated text blocks.
    pub async fn complete(
        &self,
        system: Option<&str>,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse("no text content".into()));
        }

        Ok(text)
    }

    /// Complete and parse the first JSON object in the reply.
    ///
    /// Models wrap JSON in prose or fences often enough that we scan for the
    /// outermost braces instead of trusting the whole body.
    pub async fn complete_json<T: serde::de::DeserializeOwned>(
        &self,
        system: Option<&str>,
        messages: &[Message],
    ) -> Result<T, LlmError> {
        let text = self.complete(system, messages).await?;
        extract_json(&text)
    }
}

/// Parse the first top-level JSON object embedded in `text`.
pub fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let start = text
        .find('{')
        .ok_or_else(|| LlmError::InvalidResponse(format!("no JSON object in: {}", text)))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| LlmError::InvalidResponse(format!("unterminated JSON in: {}", text)))?;

    serde_json::from_str(&text[start..=end])
        .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Verdict {
        passed: bool,
    }

    #[test]
    fn extract_json_from_fenced_reply() {
        let reply = "Here is my verdict:\n```json\n{\"passed\": true}\n```";
        let verdict: Verdict = extract_json(reply).unwrap();
        assert!(verdict.passed);
    }

    #[test]
    fn extract_json_rejects_prose() {
        let result: Result<Verdict, _> = extract_json("the agent did well");
        assert!(result.is_err());
    }

    #[test]
    fn missing_key_rejected() {
        let config = LlmConfig::new("https://api.anthropic.com", "", "claude-sonnet-4-20250514");
        assert!(LlmClient::new(config).is_err());
    }
}
