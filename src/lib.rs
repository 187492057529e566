// Library root: re-exports all modules so integration tests and the two
// binaries can access the crate's public API.

pub mod config;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod upstream;
