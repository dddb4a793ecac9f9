//! Azure OpenAI chat-completions client.
//!
//! One blocking request per `generate` call; no retries here. Failures are
//! classified so callers can decide: throttling, server errors and transport
//! problems are [`Error::GenerationUnavailable`], auth failures and content-filter
//! refusals are [`Error::GenerationRejected`].
use std::time::Duration;

use docqa_core::{Error, Generator, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_API_VERSION: &str = "2024-02-01";
const CONTENT_FILTER: &str = "content_filter";

/// Connection settings, normally read from `AZURE_OPENAI_*` variables.
#[derive(Debug, Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl AzureOpenAiConfig {
    /// Reads `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`,
    /// `AZURE_OPENAI_DEPLOYMENT_NAME` and, optionally, `AZURE_OPENAI_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| -> Result<String> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{name} is not set")))
        };
        Ok(Self {
            endpoint: var("AZURE_OPENAI_ENDPOINT")?,
            api_key: var("AZURE_OPENAI_API_KEY")?,
            deployment: var("AZURE_OPENAI_DEPLOYMENT_NAME")?,
            api_version: var("AZURE_OPENAI_API_VERSION").unwrap_or_else(|_| DEFAULT_API_VERSION.to_string()),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(60),
        })
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

pub struct AzureOpenAiGenerator {
    client: Client,
    url: String,
    config: AzureOpenAiConfig,
}

impl AzureOpenAiGenerator {
    /// Builds the HTTP client. Must not be called from inside an async runtime.
    pub fn new(config: AzureOpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url: config.completions_url(), config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(AzureOpenAiConfig::from_env()?)
    }

    pub fn deployment(&self) -> &str {
        &self.config.deployment
    }
}

impl Generator for AzureOpenAiGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: self.config.temperature,
        };
        tracing::debug!(deployment = %self.config.deployment, prompt_chars = prompt.chars().count(), "chat completion request");
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.config.api_key)
            .json(&body)
            .send()
            .map_err(|e| Error::GenerationUnavailable(format!("request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| Error::GenerationUnavailable(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            let err = classify_status(status, &text);
            tracing::warn!(status = status.as_u16(), error = %err, "chat completion failed");
            return Err(err);
        }
        parse_completion(&text)
    }
}

/// Maps a non-success HTTP response to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> Error {
    let api = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = api
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());
    let detail = format!("HTTP {}: {message}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return Error::GenerationUnavailable(detail);
    }
    let filtered = api.as_ref().and_then(|e| e.code.as_deref()) == Some(CONTENT_FILTER);
    if filtered {
        return Error::GenerationRejected(format!("prompt blocked by content filter ({detail})"));
    }
    Error::GenerationRejected(detail)
}

/// Extracts `choices[0].message.content` from a successful response.
pub fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::GenerationUnavailable(format!("malformed completion response: {e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::GenerationUnavailable("completion response has no choices".into()))?;
    if choice.finish_reason.as_deref() == Some(CONTENT_FILTER) {
        return Err(Error::GenerationRejected("completion blocked by content filter".into()));
    }
    choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| Error::GenerationUnavailable("completion has no content".into()))
}
