// Session controller: client-side state and workflow driving the relay.

pub mod client;
pub mod controller;
pub mod debounce;
pub mod state;

pub use client::{ClientError, RelayClient};
pub use state::{reduce, Action, SessionState};
