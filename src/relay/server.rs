// The relay's HTTP server and endpoint handlers.
//
// Stateless request/response forwarding: each endpoint shapes a payload for
// the upstream provider, awaits the reply, and reshapes it for the client.
// No caching, no retries, no cross-request state. Every failure surfaces as
// the uniform `{error, details}` body.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::protocol::{
    ErrorBody, GenerateImageRequest, GenerateImageResponse, QuestionsRequest, QuestionsResponse,
    RefineRequest, RefineResponse, VariationsRequest, VariationsResponse,
};
use crate::relay::http;
use crate::upstream::{prompt, Upstream, UpstreamError};

// ---------------------------------------------------------------------------
// Context and listener
// ---------------------------------------------------------------------------

/// Everything the endpoint handlers need: the upstream client and the fixed
/// forwarding parameters.
pub struct RelayContext {
    pub upstream: Arc<dyn Upstream>,
    /// How many variant images to request per variation call.
    pub variation_count: u32,
}

/// A bound TCP listener for the relay, split from `run` so callers (and
/// tests) can bind port 0 and discover the actual port before serving.
pub struct RelayListener {
    inner: TcpListener,
}

impl RelayListener {
    /// Bind on `127.0.0.1:{port}`. Port 0 binds an ephemeral port.
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let inner = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.inner.local_addr()
    }
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

/// Accept connections forever, serving one request per connection on a
/// spawned task. Returns only on listener errors (or when the task running
/// it is aborted).
pub async fn run(listener: RelayListener, ctx: Arc<RelayContext>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Relay listening on {local_addr}");

    loop {
        let (stream, addr) = listener.inner.accept().await?;
        debug!("Accepted connection from {addr}");

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                debug!("Connection from {addr} ended with i/o error: {e}");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, ctx: Arc<RelayContext>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let response = match http::read_request(&mut reader).await {
        Ok(request) => dispatch(&ctx, &request).await,
        Err(http::HttpError::Io(e)) => return Err(e),
        Err(e) => {
            warn!("Rejecting malformed HTTP request: {e}");
            error_response(
                400,
                ErrorBody {
                    error: e.to_string(),
                    details: None,
                },
            )
        }
    };

    write_half.write_all(response.as_bytes()).await?;
    write_half.shutdown().await
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

const ENDPOINTS: &[&str] = &[
    "/generate-image",
    "/generate-image-variations",
    "/generate-questions",
    "/refine-prompt",
];

/// Route a parsed request to its handler and serialize the full HTTP
/// response. This is the unit-test surface for the endpoint behavior.
pub async fn dispatch(ctx: &RelayContext, request: &http::Request) -> String {
    if request.method == "OPTIONS" {
        return http::empty_response(204);
    }

    if ENDPOINTS.contains(&request.path.as_str()) && request.method != "POST" {
        return error_response(
            405,
            ErrorBody {
                error: format!("method {} not allowed", request.method),
                details: None,
            },
        );
    }

    let result = match request.path.as_str() {
        "/generate-image" => generate_image(ctx, &request.body).await,
        "/generate-image-variations" => generate_image_variations(ctx, &request.body).await,
        "/generate-questions" => generate_questions(ctx, &request.body).await,
        "/refine-prompt" => refine_prompt(ctx, &request.body).await,
        other => {
            return error_response(
                404,
                ErrorBody {
                    error: format!("unknown endpoint {other}"),
                    details: None,
                },
            )
        }
    };

    match result {
        Ok(body) => http::json_response(200, &body.to_string()),
        Err((status, body)) => error_response(status, body),
    }
}

fn error_response(status: u16, body: ErrorBody) -> String {
    let serialized = serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"error":"internal error","details":null}"#.to_string());
    http::json_response(status, &serialized)
}

// ---------------------------------------------------------------------------
// Endpoint handlers
// ---------------------------------------------------------------------------

type Failure = (u16, ErrorBody);

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, Failure> {
    serde_json::from_str(body).map_err(|e| {
        (
            400,
            ErrorBody {
                error: "invalid request body".into(),
                details: Some(Value::String(e.to_string())),
            },
        )
    })
}

fn upstream_failure(operation: &str, e: UpstreamError) -> Failure {
    warn!("{operation} failed: {e}");
    (
        500,
        ErrorBody {
            error: e.to_string(),
            details: e.details(),
        },
    )
}

/// `POST /generate-image`: forward the prompt with fixed parameters (one
/// image, configured model and size) and return the image URL.
async fn generate_image(ctx: &RelayContext, body: &str) -> Result<Value, Failure> {
    let request: GenerateImageRequest = parse_body(body)?;

    let image_url = ctx
        .upstream
        .generate_image(&request.prompt)
        .await
        .map_err(|e| upstream_failure("generate-image", e))?;

    Ok(serde_json::json!(GenerateImageResponse { image_url }))
}

/// `POST /generate-image-variations`: request variants of a previously
/// generated image. An empty reference fails immediately; an upstream reply
/// with zero URLs is an error, never an empty success.
async fn generate_image_variations(ctx: &RelayContext, body: &str) -> Result<Value, Failure> {
    let request: VariationsRequest = parse_body(body)?;

    if request.image_id.trim().is_empty() {
        return Err(upstream_failure(
            "generate-image-variations",
            UpstreamError::EmptyReference,
        ));
    }

    let image_urls = ctx
        .upstream
        .image_variations(&request.image_id, ctx.variation_count)
        .await
        .map_err(|e| upstream_failure("generate-image-variations", e))?;

    Ok(serde_json::json!(VariationsResponse { image_urls }))
}

/// `POST /generate-questions`: ask the chat model for clarifying questions
/// and parse its text output as JSON. The contract depends on the model
/// honoring its instruction; unparsable output is a 500 whose `details`
/// carry the raw text. No schema repair is attempted.
async fn generate_questions(ctx: &RelayContext, body: &str) -> Result<Value, Failure> {
    let request: QuestionsRequest = parse_body(body)?;

    let content = ctx
        .upstream
        .chat(&prompt::questions_system_prompt(), &request.prompt)
        .await
        .map_err(|e| upstream_failure("generate-questions", e))?;

    let parsed: QuestionsResponse = serde_json::from_str(content.trim()).map_err(|e| {
        warn!("generate-questions: model output was not valid questions JSON: {e}");
        (
            500,
            ErrorBody {
                error: "model output was not valid questions JSON".into(),
                details: Some(serde_json::json!({
                    "modelOutput": content,
                    "parseError": e.to_string(),
                })),
            },
        )
    })?;

    Ok(serde_json::json!(parsed))
}

/// `POST /refine-prompt`: build the composite text block from the original
/// prompt and the answered questions, send it to the chat model, and return
/// the model's text verbatim as the new prompt.
async fn refine_prompt(ctx: &RelayContext, body: &str) -> Result<Value, Failure> {
    let request: RefineRequest = parse_body(body)?;

    let input =
        prompt::build_refinement_input(&request.original_prompt, &request.questions_answers);

    let refined_prompt = ctx
        .upstream
        .chat(&prompt::refine_system_prompt(), &input)
        .await
        .map_err(|e| upstream_failure("refine-prompt", e))?;

    Ok(serde_json::json!(RefineResponse { refined_prompt }))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
