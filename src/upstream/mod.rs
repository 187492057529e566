// Upstream AI provider: the OpenAI-compatible API the relay forwards to.

pub mod client;
pub mod prompt;

pub use client::{OpenAiClient, Upstream, UpstreamClient, UpstreamError};
