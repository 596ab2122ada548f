//! OpenAI-compatible chat completion client.
//!
//! Used for question classification and LLM reranking. One HTTP attempt per
//! call; retry and backoff live with the caller.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use kbsearch_core::config::LlmSettings;
use kbsearch_core::traits::CompletionModel;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(base_url: &str, api_key: String, model: String, temperature: f32, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            temperature,
        })
    }

    /// Builds a client when the configured key variable is set, `None` otherwise.
    pub fn from_settings(settings: &LlmSettings) -> anyhow::Result<Option<Self>> {
        let key = match std::env::var(&settings.api_key_env) {
            Ok(k) if !k.trim().is_empty() => k,
            _ => return Ok(None),
        };
        Self::new(
            &settings.base_url,
            key,
            settings.model.clone(),
            settings.temperature,
            Duration::from_millis(settings.timeout_ms),
        )
        .map(Some)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
            temperature: self.temperature,
        };
        Ok(serde_json::to_string(&req)?)
    }
}

/// Extracts the first choice's message text from a chat completion response.
pub fn parse_completion(body: &str) -> anyhow::Result<String> {
    let resp: ChatResponse = serde_json::from_str(body).context("malformed chat completion response")?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("chat completion has no content"))
}

#[async_trait]
impl CompletionModel for OpenAiChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let body = self.request_body(system, user)?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("API returned {status}: {}", text.chars().take(300).collect::<String>());
        }
        debug!(model = %self.model, bytes = text.len(), "chat completion received");
        parse_completion(&text)
    }
}
