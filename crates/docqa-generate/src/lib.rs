//! Answer generation over an OpenAI-compatible chat-completions API
//! (OpenRouter, LM Studio, Ollama, vLLM, ...).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use docqa_core::config::Settings;
use docqa_core::traits::TextGenerator;
use docqa_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Base URL up to and including the version segment, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl GeneratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.generation_base_url.clone(),
            api_key: settings.generation_api_key.clone().filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(settings.generation_timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One request per call, no retries; the caller decides whether a
/// transient failure is worth another attempt.
pub struct OpenAiCompatibleGenerator {
    config: GeneratorConfig,
    client: Client,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        if config.api_key.is_none() {
            tracing::warn!(base_url = %config.base_url, "no generation API key configured");
        }
        Ok(Self { config, client })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(GeneratorConfig::from_settings(settings))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let started = Instant::now();
        let request = ChatCompletionsRequest {
            model,
            messages: [ChatMessage { role: "user", content: prompt }],
        };
        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| {
            let transient = e.is_timeout() || e.is_connect();
            Error::generation(format!("request to {} failed: {e}", self.config.base_url), transient)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::generation(
                format!("backend returned {status}: {}", truncate(&body, 500)),
                is_transient_status(status),
            ));
        }

        let parsed: ChatCompletionsResponse = response.json().await.map_err(|e| {
            Error::generation(format!("malformed chat completions response: {e}"), e.is_timeout())
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if answer.trim().is_empty() {
            return Err(Error::generation("backend returned an empty completion", false));
        }
        tracing::info!(
            model,
            prompt_chars = prompt.chars().count(),
            answer_chars = answer.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated answer"
        );
        Ok(answer)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
