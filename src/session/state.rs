// Session state and its reducer.
//
// The state is a plain value updated exclusively by `reduce`, a pure
// function over explicit actions. The controller owns all side effects
// (debouncing, relay calls) and feeds completed facts in as actions, which
// keeps every ordering contract testable without a front end or a network.

use crate::protocol::QuestionAnswer;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The complete client-side session state.
///
/// Invariant: `answers.len() == questions.len()` after every reduction.
/// `answers[i]` belongs to `questions[i]`; replacing the question set resets
/// every answer so no stale answer can refer to a question that no longer
/// exists at its index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// The evolving prompt, the single source of truth for what will be
    /// sent to image generation. Replaced wholesale on each refinement.
    pub prompt: String,
    /// Current clarifying questions, in display order.
    pub questions: Vec<String>,
    /// One answer per question, keyed by position.
    pub answers: Vec<String>,
    /// The last generated image, if any. At most one live value.
    pub image_url: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The question/answer pair at `index`, for building a refinement
    /// request. `None` when the index is out of range.
    pub fn pair_at(&self, index: usize) -> Option<QuestionAnswer> {
        Some(QuestionAnswer {
            question: self.questions.get(index)?.clone(),
            answer: self.answers.get(index)?.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Completed facts the controller folds into the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The user edited the prompt.
    PromptChanged(String),
    /// A question fetch for the current prompt finished.
    QuestionsLoaded(Vec<String>),
    /// The user edited the answer at `index`.
    AnswerChanged { index: usize, text: String },
    /// A refinement finished; `String` is the new prompt.
    PromptRefined(String),
    /// An image generation finished.
    ImageGenerated(String),
    /// A variation request finished.
    VariationsLoaded(Vec<String>),
}

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// Fold one action into the state, returning the next state.
pub fn reduce(state: &SessionState, action: Action) -> SessionState {
    let mut next = state.clone();
    match action {
        Action::PromptChanged(text) => {
            next.prompt = text;
        }
        Action::QuestionsLoaded(questions) => {
            next.answers = vec![String::new(); questions.len()];
            next.questions = questions;
        }
        Action::AnswerChanged { index, text } => {
            // Out-of-range answers (stale front-end events racing a
            // question reset) are dropped rather than resized into place.
            if let Some(slot) = next.answers.get_mut(index) {
                *slot = text;
            }
        }
        Action::PromptRefined(prompt) => {
            // The refined prompt invalidates the question set it was derived
            // from: clear questions and answers and force a full
            // re-derivation instead of merging answers across prompts.
            next.prompt = prompt;
            next.questions.clear();
            next.answers.clear();
        }
        Action::ImageGenerated(url) => {
            next.image_url = Some(url);
        }
        Action::VariationsLoaded(urls) => {
            // Only the first variant is displayed; the rest are discarded.
            if let Some(first) = urls.into_iter().next() {
                next.image_url = Some(first);
            }
        }
    }
    next
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
