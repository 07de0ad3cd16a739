use crate::domain::ports::LlmAdapter;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat-completions client. Works against any provider
/// exposing the same wire contract; the base URL selects the provider.
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: String, api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build LLM http client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }

    /// Model output sometimes wraps JSON in a markdown fence; strip it before
    /// parsing.
    fn extract_json(content: &str) -> &str {
        let trimmed = content.trim();
        let trimmed = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);
        trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatibleClient {
    fn model_version(&self) -> String {
        self.model.clone()
    }

    async fn propose(&self, prompt: &str) -> Result<serde_json::Value> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are an allocation engine. Respond with a single JSON object and nothing else."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM provider returned {}: {}", status, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Malformed LLM response envelope")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("LLM response had no choices"))?;

        debug!("LLM raw content: {}", content);
        serde_json::from_str(Self::extract_json(content)).context("LLM content was not valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_strips_fences() {
        assert_eq!(
            OpenAiCompatibleClient::extract_json("```json\n{\"a\":1}\n```"),
            "{\"a\":1}"
        );
        assert_eq!(OpenAiCompatibleClient::extract_json("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(
            OpenAiCompatibleClient::extract_json("```\n{\"a\":1}\n```"),
            "{\"a\":1}"
        );
    }
}
