// OpenAI API client using reqwest.
//
// Wraps the three upstream calls the relay forwards: chat completions (for
// question generation and prompt refinement), image generation, and image
// variations. All calls are plain request/response JSON; failures map to
// `UpstreamError` and are never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, UpstreamConfig};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream API key not configured")]
    NotConfigured,

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned status {status}")]
    Api { status: u16, body: Value },

    #[error("upstream response missing {what}")]
    Malformed { what: &'static str },

    #[error("image reference is empty")]
    EmptyReference,
}

impl UpstreamError {
    /// Structured context for the relay's error body, when there is any.
    pub fn details(&self) -> Option<Value> {
        match self {
            UpstreamError::Api { body, .. } => Some(body.clone()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream trait
// ---------------------------------------------------------------------------

/// The upstream operations the relay depends on. A trait seam so relay
/// handlers can be exercised against a mock provider in tests.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send a system + user message pair to the chat model and return the
    /// first choice's content verbatim.
    async fn chat(&self, system: &str, user: &str) -> Result<String, UpstreamError>;

    /// Generate a single image for `prompt` and return its URL.
    async fn generate_image(&self, prompt: &str) -> Result<String, UpstreamError>;

    /// Request `n` variations of a previously generated image and return
    /// their URLs in upstream order. An empty result is an error.
    async fn image_variations(&self, reference: &str, n: u32)
        -> Result<Vec<String>, UpstreamError>;
}

// ---------------------------------------------------------------------------
// OpenAiClient
// ---------------------------------------------------------------------------

/// Low-level OpenAI API client.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    image_model: String,
    image_size: String,
}

impl OpenAiClient {
    /// Create a new client for the given API key and upstream settings.
    pub fn new(api_key: String, upstream: &UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: upstream.base_url.clone(),
            chat_model: upstream.chat_model.clone(),
            image_model: upstream.image_model.clone(),
            image_size: upstream.image_size.clone(),
        }
    }

    /// Replace the base URL (tests point this at a local mock server).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));

        if !status.is_success() {
            debug!(status = status.as_u16(), "upstream non-2xx response");
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl Upstream for OpenAiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String, UpstreamError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: [Message<'a>; 2],
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }

        let request = ChatRequest {
            model: &self.chat_model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
        };

        let body = self
            .post_json("/chat/completions", &serde_json::to_value(&request)?)
            .await?;

        let response: ChatResponse =
            serde_json::from_value(body).map_err(|_| UpstreamError::Malformed {
                what: "chat completion choices",
            })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(UpstreamError::Malformed {
                what: "chat completion choices",
            })?;

        Ok(choice.message.content)
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, UpstreamError> {
        let payload = serde_json::json!({
            "model": self.image_model,
            "prompt": prompt,
            "n": 1,
            "size": self.image_size,
        });

        let body = self.post_json("/images/generations", &payload).await?;
        let response: ImageResponse =
            serde_json::from_value(body).map_err(|_| UpstreamError::Malformed {
                what: "image data",
            })?;

        response
            .data
            .into_iter()
            .next()
            .and_then(|item| item.url)
            .ok_or(UpstreamError::Malformed { what: "image URL" })
    }

    async fn image_variations(
        &self,
        reference: &str,
        n: u32,
    ) -> Result<Vec<String>, UpstreamError> {
        if reference.trim().is_empty() {
            return Err(UpstreamError::EmptyReference);
        }

        let payload = serde_json::json!({
            "model": self.image_model,
            "image": reference,
            "n": n,
        });

        let body = self.post_json("/images/variations", &payload).await?;
        let response: ImageResponse =
            serde_json::from_value(body).map_err(|_| UpstreamError::Malformed {
                what: "image data",
            })?;

        let urls: Vec<String> = response
            .data
            .into_iter()
            .filter_map(|item| item.url)
            .collect();

        if urls.is_empty() {
            return Err(UpstreamError::Malformed {
                what: "image URLs in variations response",
            });
        }

        Ok(urls)
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(_: serde_json::Error) -> Self {
        UpstreamError::Malformed {
            what: "serializable payload",
        }
    }
}

/// Image generation / variation response shape shared by both image
/// endpoints: `{ "data": [ { "url": ... }, ... ] }`.
#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

// ---------------------------------------------------------------------------
// UpstreamClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that is either an active OpenAI client or disabled.
///
/// With no API key configured the relay still serves; every operation fails
/// with `NotConfigured` and surfaces as a regular 500 to the caller.
pub enum UpstreamClient {
    Active(OpenAiClient),
    Disabled,
}

impl UpstreamClient {
    /// Build an `UpstreamClient` from the application config. Returns
    /// `Active` when a non-empty API key is present, otherwise `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.openai_api_key {
            Some(key) if !key.is_empty() => {
                UpstreamClient::Active(OpenAiClient::new(key.clone(), &config.upstream))
            }
            _ => UpstreamClient::Disabled,
        }
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String, UpstreamError> {
        match self {
            UpstreamClient::Active(client) => client.chat(system, user).await,
            UpstreamClient::Disabled => Err(UpstreamError::NotConfigured),
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, UpstreamError> {
        match self {
            UpstreamClient::Active(client) => client.generate_image(prompt).await,
            UpstreamClient::Disabled => Err(UpstreamError::NotConfigured),
        }
    }

    async fn image_variations(
        &self,
        reference: &str,
        n: u32,
    ) -> Result<Vec<String>, UpstreamError> {
        match self {
            UpstreamClient::Active(client) => client.image_variations(reference, n).await,
            UpstreamClient::Disabled => Err(UpstreamError::NotConfigured),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
