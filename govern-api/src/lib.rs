//! HTTP surface and service wiring for the workspace orchestrator.

pub mod api_docs;
pub mod auth;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use reconciler::start_reconciler_task;
pub use routes::create_app;
pub use state::{build_state, AppState};
