//! VibeStudy progress gateway.
//!
//! HTTP front door for learner progress: bearer-token auth, per-client rate
//! limiting on every progress route, and last-write-wins upserts into a
//! [`ProgressStore`](vibestudy_core::ProgressStore).

pub mod auth;
pub mod error;
pub mod health_api;
pub mod progress_api;
pub mod rate_limit;
pub mod server;

pub use auth::{RequireAuth, TokenTable};
pub use error::ApiError;
pub use rate_limit::{PROGRESS_READ, PROGRESS_WRITE};
pub use server::{build_router, serve, start_server, GatewayState};
