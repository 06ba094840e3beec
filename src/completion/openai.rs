//! OpenAI-compatible chat completions client

use super::{ChatMessage, Completion, CompletionBackend, TokenUsage};
use crate::config::CompletionConfig;
use crate::error::{ParleyError, Result};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Request body for `POST /chat/completions`
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

/// Completion backend for OpenAI-compatible HTTP APIs
///
/// Sends the whole conversation in one non-streaming request. The request
/// carries `Authorization: Bearer <key>` only when a key is configured, so
/// local servers without authentication work unchanged.
///
/// # Examples
///
/// ```
/// use parley::completion::OpenAiClient;
/// use parley::config::CompletionConfig;
///
/// let client = OpenAiClient::new(&CompletionConfig::default()).unwrap();
/// assert_eq!(
///     client.endpoint().as_str(),
///     "https://api.openai.com/v1/chat/completions"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Build a client from completion settings
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Config` if the base URL cannot carry a path, or
    /// `ParleyError::Http` if the HTTP client cannot be built
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let endpoint = completions_endpoint(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ParleyError::from)
            .context("Failed to create HTTP client")?;

        let api_key = Some(config.api_key.trim())
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        tracing::info!(
            "Initialized completion client: endpoint={}, authenticated={}",
            endpoint,
            api_key.is_some()
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// Full URL requests are posted to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Append `chat/completions` to the base URL's path
fn completions_endpoint(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim()).map_err(|e| {
        ParleyError::Config(format!("Invalid completion base URL {}: {}", base_url, e))
    })?;
    url.path_segments_mut()
        .map_err(|_| {
            ParleyError::Config(format!("Completion base URL cannot hold a path: {}", base_url))
        })?
        .pop_if_empty()
        .push("chat")
        .push("completions");
    Ok(url)
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<Completion> {
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature,
        };

        tracing::debug!(
            "Sending completion request: model={}, {} messages, temperature={}",
            model,
            messages.len(),
            temperature
        );

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("Completion request failed: {}", e);
            ParleyError::Completion(format!("Request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Completion backend returned {}: {}", status, error_text);
            return Err(ParleyError::Completion(format!(
                "Backend returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse completion response: {}", e);
            ParleyError::Completion(format!("Failed to parse response: {}", e))
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            tracing::error!("Completion response had no choices");
            ParleyError::Completion("Response had no choices".to_string())
        })?;

        tracing::debug!(
            "Completion response: prompt_tokens={}, completion_tokens={}",
            body.usage.prompt_tokens,
            body.usage.completion_tokens
        );

        Ok(Completion {
            reply: ChatMessage::new(choice.message.role, choice.message.content.unwrap_or_default()),
            usage: body.usage,
        })
    }
}
