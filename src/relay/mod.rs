// Relay service: stateless HTTP front for the upstream AI provider.

pub mod http;
pub mod server;

pub use server::{RelayContext, RelayListener};
