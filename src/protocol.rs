// Shared protocol types: the relay's JSON wire contract and the message
// types exchanged between the session controller and its front end.
//
// Wire field names are camelCase to match the browser-facing contract
// (`imageUrl`, `questionsAnswers`, ...); the Rust side stays snake_case
// via serde renames.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Relay wire types
// ---------------------------------------------------------------------------

/// Request body for `POST /generate-image`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
}

/// Response body for `POST /generate-image`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    pub image_url: String,
}

/// Request body for `POST /generate-image-variations`.
///
/// `image_id` is an opaque reference to a previously generated image; the
/// client sends the image URL it is currently displaying.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationsRequest {
    pub image_id: String,
}

/// Response body for `POST /generate-image-variations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationsResponse {
    pub image_urls: Vec<String>,
}

/// Request body for `POST /generate-questions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsRequest {
    pub prompt: String,
}

/// Response body for `POST /generate-questions`.
///
/// Five questions by convention; the length depends on the upstream model
/// honoring its instruction and is not enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsResponse {
    pub questions: Vec<String>,
}

/// One answered clarifying question, sent as part of a refinement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Request body for `POST /refine-prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    pub original_prompt: String,
    pub questions_answers: Vec<QuestionAnswer>,
}

/// Response body for `POST /refine-prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineResponse {
    pub refined_prompt: String,
}

/// Uniform failure body returned by every relay endpoint.
///
/// `details` carries structured context when there is any (the upstream
/// error payload, the unparsable model text), otherwise null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Session controller messages
// ---------------------------------------------------------------------------

/// Commands a front end sends to the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// The prompt text changed (one event per edit; the controller
    /// debounces the resulting question fetches).
    EditPrompt(String),
    /// The answer for the question at `index` changed.
    EditAnswer { index: usize, text: String },
    /// Refine the prompt using only the question/answer at `index`.
    Refine { index: usize },
    /// Generate an image from the current prompt.
    Submit,
    /// Request variations of the currently displayed image.
    Variations,
    /// Shut the controller down.
    Quit,
}

/// Updates the session controller pushes back to its front end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A fresh question set was loaded (all answers reset to empty).
    QuestionsChanged(Vec<String>),
    /// The prompt was replaced (refinement result).
    PromptChanged(String),
    /// The displayed image changed.
    ImageChanged(String),
    /// A relay call failed; state was left unchanged so the user can retry.
    Failed { operation: &'static str, message: String },
}
