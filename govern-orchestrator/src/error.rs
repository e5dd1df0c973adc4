use crate::clients::ClientError;
use crate::state::StateId;
use crate::transaction::{CycleError, TransactionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No state registered for status {0}")]
    StateNotFound(StateId),

    #[error("No transaction registered for {0}")]
    UnknownTransaction(TransactionId),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("No reserved workspace is available to claim")]
    NoReservation,

    #[error("External client error: {0}")]
    Client(#[from] ClientError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
