// Prompt templates for question generation and prompt refinement.
//
// The question prompt asks the chat model to probe the parts of an image
// description most likely to be filled in with generic or biased defaults
// by an image generator. The refinement prompt constrains the model to
// edit only the aspects the user explicitly answered.

use crate::protocol::QuestionAnswer;

// ---------------------------------------------------------------------------
// System prompts
// ---------------------------------------------------------------------------

/// System instruction for the question-generation call.
///
/// The model is asked for a JSON object with a `questions` array of exactly
/// five questions. The relay parses that output as JSON and fails the
/// request when the model does not honor the shape; no repair is attempted.
pub fn questions_system_prompt() -> String {
    "You are an assistant that generates a list of ONLY five questions, returned \
     as a JSON object of the form {\"questions\": [\"...\", \"...\", \"...\", \"...\", \"...\"]} \
     and nothing else. The user's message is a description of an image they want \
     an AI image generator to produce. Ask questions that surface the visual \
     subjects their description leaves underspecified and that an image model is \
     likely to fill in with a generic or biased default: appearance, activity, \
     setting, color, and emotion or expression are typical angles. For example, \
     'a fluffy dog' will usually come back as a golden retriever even though \
     thousands of breeds fit the words, so asking what the dog looks like helps \
     the user notice the gap. Concepts that image models are known to portray \
     with demographic bias (occupations, roles, groups of people) deserve at \
     least one clarifying question whenever they appear. Respond with the JSON \
     object only, using double quotes."
        .to_string()
}

/// System instruction for the prompt-refinement call.
///
/// The model must fold the user's answers into the original prompt without
/// inventing details: only the aspects that were explicitly answered may
/// change, and the result is returned as bare text without quote wrapping.
pub fn refine_system_prompt() -> String {
    "You rewrite image-generation prompts. The user wrote an original prompt and \
     answered one or more clarifying questions about it. Edit the original prompt \
     so that it incorporates concise descriptors taken from the answers they \
     provided, and change nothing else. Do not add details the user did not state, \
     do not guess their intent for subjects they did not clarify, and do not \
     prepend phrasing like 'generate an image of' unless the original prompt \
     already contains it. Unanswered questions must leave their part of the \
     prompt untouched. Reply with the rewritten prompt as plain text, not \
     wrapped in quotes."
        .to_string()
}

// ---------------------------------------------------------------------------
// Refinement input
// ---------------------------------------------------------------------------

/// Build the composite user message for a refinement call: the original
/// prompt, one `- question: answer` line per pair, and a fixed closing
/// instruction. An empty pair list yields the header and instruction only.
pub fn build_refinement_input(original_prompt: &str, pairs: &[QuestionAnswer]) -> String {
    let mut input = format!(
        "Based on the original description: \"{original_prompt}\", and the following details:\n"
    );
    for QuestionAnswer { question, answer } in pairs {
        input.push_str(&format!("- {question}: {answer}\n"));
    }
    input.push_str("Generate a refined, detailed prompt for generating an image:");
    input
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
