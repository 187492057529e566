// HTTP client for the relay, used by the session controller.
//
// The browser-fetch equivalent: one reqwest call per operation, a typed
// response on 2xx, and a `ClientError` otherwise. Failures are terminal for
// that single request; the controller leaves state untouched so the user
// can retry manually.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::{
    ErrorBody, GenerateImageRequest, GenerateImageResponse, QuestionAnswer, QuestionsRequest,
    QuestionsResponse, RefineRequest, RefineResponse, VariationsRequest, VariationsResponse,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay returned status {status}: {error}")]
    Relay { status: u16, error: String },
}

// ---------------------------------------------------------------------------
// RelayClient
// ---------------------------------------------------------------------------

pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    /// Create a client for the relay at `base_url` (no trailing slash).
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn generate_questions(&self, prompt: &str) -> Result<QuestionsResponse, ClientError> {
        self.post(
            "/generate-questions",
            &QuestionsRequest {
                prompt: prompt.to_string(),
            },
        )
        .await
    }

    pub async fn refine_prompt(
        &self,
        original_prompt: &str,
        questions_answers: Vec<QuestionAnswer>,
    ) -> Result<RefineResponse, ClientError> {
        self.post(
            "/refine-prompt",
            &RefineRequest {
                original_prompt: original_prompt.to_string(),
                questions_answers,
            },
        )
        .await
    }

    pub async fn generate_image(&self, prompt: &str) -> Result<GenerateImageResponse, ClientError> {
        self.post(
            "/generate-image",
            &GenerateImageRequest {
                prompt: prompt.to_string(),
            },
        )
        .await
    }

    pub async fn image_variations(
        &self,
        image_id: &str,
    ) -> Result<VariationsResponse, ClientError> {
        self.post(
            "/generate-image-variations",
            &VariationsRequest {
                image_id: image_id.to_string(),
            },
        )
        .await
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
                error: "relay error with unreadable body".into(),
                details: None,
            });
            return Err(ClientError::Relay {
                status: status.as_u16(),
                error: body.error,
            });
        }

        Ok(response.json().await?)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
