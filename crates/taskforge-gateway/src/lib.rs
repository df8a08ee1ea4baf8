//! # TaskForge Gateway
//!
//! The read/write HTTP control surface over the engine: job CRUD, manual
//! runs, cancellation, scheduler start/stop/mode, logs, and resource-group
//! summaries. JSON in, JSON out; errors use `{error, message}`.

pub mod routes;
pub mod server;

pub use server::{build_router, serve, AppState};
