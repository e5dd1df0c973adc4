//! Workspace lifecycle orchestration
//!
//! This crate drives tenant workspaces through their lifecycle by applying
//! idempotent transactions against external systems in dependency order.
//! It is consumed by the govern-api service, which runs the [`Reconciler`]
//! as a background task next to the HTTP API.

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod reconciler;
pub mod registry;
pub mod reservation;
pub mod state;
pub mod transaction;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clients::{ClientError, Clients};
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use executor::{Execution, Executor};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use reconciler::{Reconciler, ReconcilerSettings};
pub use registry::{SqliteRegistry, WorkspaceRegistry};
pub use reservation::ReservationPool;
pub use state::{State, StateCatalog, StateId};
pub use transaction::{CycleError, Outcome, Transaction, TransactionId, TransactionRegistry};
pub use workspace::{ClaimRequest, Workspace, WorkspaceFilters, WorkspaceSize, WorkspaceTier};
