//! Answer generator collaborator: LLM-generated answers for submitted
//! queries.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::settings::LlmConfig;

/// Narrow contract over the LLM. Generation failures propagate to the
/// caller; the service never substitutes an empty answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str) -> Result<String>;
}

/// Generator speaking the OpenAI-compatible chat completions protocol
/// (Groq, OpenAI, and most local inference servers).
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl ChatCompletionGenerator {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("no API key configured for the answer generator"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        })
    }
}

#[async_trait]
impl AnswerGenerator for ChatCompletionGenerator {
    #[instrument(skip(self, question))]
    async fn generate(&self, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": question },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("chat completion request failed with status {status}");
        }

        let completion: ChatCompletion = response.json().await?;
        let answer = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))?;

        debug!("generated answer ({} bytes)", answer.len());
        Ok(answer.trim().to_string())
    }
}

/// Placeholder used when no API key is configured. Every call fails, which
/// surfaces as an upstream error on query submission rather than a silent
/// empty answer.
pub struct UnconfiguredGenerator;

#[async_trait]
impl AnswerGenerator for UnconfiguredGenerator {
    async fn generate(&self, _question: &str) -> Result<String> {
        bail!("answer generator is not configured (missing API key)")
    }
}
