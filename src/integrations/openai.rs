//! OpenAI-backed providers
//!
//! Embeddings go through `async-openai`; chat completions use a plain
//! `reqwest` client so error statuses stay visible for retry
//! classification.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::model_dimension;
use crate::error::{Error, Result};

use super::{AnswerModel, EmbeddingProvider};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Hard cap on characters per embedded text, to stay under token limits.
const MAX_EMBED_CHARS: usize = 8000;

/// Embedding provider backed by the OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    /// Create from `OPENAI_API_KEY`.
    pub fn from_env(model: impl Into<String>, dimension: usize) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Unauthorized("OPENAI_API_KEY not set".to_string()))?;
        Self::new(api_key, model, dimension)
    }

    pub fn new(api_key: String, model: impl Into<String>, dimension: usize) -> Result<Self> {
        let model = model.into();
        if let Some(expected) = model_dimension(&model) {
            if expected != dimension {
                return Err(Error::Internal(format!(
                    "model {model} produces {expected}-dim vectors, configured {dimension}"
                )));
            }
        }
        let config = OpenAIConfig::new().with_api_key(api_key);
        Ok(Self {
            client: OpenAIClient::with_config(config),
            model,
            dimension,
        })
    }
}

fn map_openai_error(err: OpenAIError) -> Error {
    match &err {
        OpenAIError::ApiError(api) => {
            let message = api.message.to_lowercase();
            if message.contains("rate limit") || message.contains("rate_limit") {
                Error::RateLimited {
                    retry_after_secs: 1,
                }
            } else if message.contains("maximum context length") || message.contains("too large") {
                Error::PayloadTooLarge(api.message.clone())
            } else if message.contains("server error") || message.contains("overloaded") {
                Error::upstream("embedding provider", api.message.clone())
            } else {
                Error::Internal(format!("embedding request rejected: {}", api.message))
            }
        }
        OpenAIError::Reqwest(_) => Error::upstream("embedding provider", err.to_string()),
        _ => Error::Internal(format!("embedding call failed: {err}")),
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("embedding {} texts with {}", texts.len(), self.model);

        let inputs: Vec<String> = texts
            .iter()
            .map(|t| t.trim().chars().take(MAX_EMBED_CHARS).collect())
            .collect();

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(inputs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build embedding request: {e}")))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        info!(
            "embedded {} texts, {} tokens",
            response.data.len(),
            response.usage.total_tokens
        );

        let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != texts.len() {
            return Err(Error::upstream(
                "embedding provider",
                format!("asked for {} vectors, got {}", texts.len(), vectors.len()),
            ));
        }
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(Error::Internal(format!(
                    "provider returned {}-dim vector, expected {}",
                    vector.len(),
                    self.dimension
                )));
            }
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Chat-completion client implementing [`AnswerModel`].
#[derive(Debug, Clone)]
pub struct OpenAiCompleter {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiCompleter {
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Unauthorized("OPENAI_API_KEY not set".to_string()))?;
        Self::new(api_key, model)
    }

    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Unauthorized("empty OpenAI API key".to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent("telegram_recall/0.1.0")
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client error: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
        })
    }

    fn map_status(status: StatusCode, body: &str) -> Error {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Error::RateLimited {
                retry_after_secs: 5,
            }
        } else if status == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge(body.chars().take(200).collect())
        } else if status.is_server_error() {
            Error::upstream("llm", format!("{status}: {body}"))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Error::Unauthorized(format!("llm rejected credentials: {status}"))
        } else {
            Error::Internal(format!("llm error {status}: {body}"))
        }
    }
}

#[async_trait]
impl AnswerModel for OpenAiCompleter {
    async fn complete(&self, system: &str, user: &str, max_output_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: max_output_tokens,
            temperature: 0.3,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::upstream("llm", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::upstream("llm", format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::map_status(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::upstream("llm", format!("invalid response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::upstream("llm", "empty completion"))
    }
}
