//! External systems the provisioning transactions talk to.
//!
//! Each collaborator is a narrow async trait so transactions can be exercised
//! against the in-memory fakes in [`memory`] and run against the HTTP clients
//! in [`http`] in production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod http;
pub mod memory;

/// Errors surfaced by external collaborators.
///
/// Transactions absorb `AlreadyExists` (on create) and `NotFound` (on delete)
/// as success. `Unavailable` is retried on a later tick; `Rejected` is a hard
/// failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limiting, 5xx responses, timeouts, connection failures
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Validation or permission failures that will not fix themselves
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Race an external call against shutdown. A cancelled call is reported as
/// `Unavailable`, so the transaction is retried from scratch on a later tick.
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(ClientError::Unavailable("cancelled by shutdown".to_string()))
        }
        result = call => result,
    }
}

/// Cloud IAM role and policy management
#[async_trait]
pub trait IamClient: Send + Sync {
    async fn create_role(&self, role_name: &str, trust_policy: &str) -> ClientResult<()>;

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ClientResult<()>;

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ClientResult<()>;

    async fn delete_role(&self, role_name: &str) -> ClientResult<()>;
}

/// Namespace-scoped release objects in the workspace cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub namespace: String,
    pub name: String,
    pub chart: String,
    pub version: String,
    pub values: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    Ready,
    Progressing,
    Failed(String),
}

#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn create_namespace(&self, name: &str) -> ClientResult<()>;

    async fn delete_namespace(&self, name: &str) -> ClientResult<()>;

    /// Create the release object. Returns `AlreadyExists` if it is already there.
    async fn apply_release(&self, release: &ReleaseSpec) -> ClientResult<()>;

    /// Returns `NotFound` if the release object does not exist.
    async fn release_status(&self, namespace: &str, name: &str) -> ClientResult<ReleaseStatus>;

    async fn delete_release(&self, namespace: &str, name: &str) -> ClientResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Discovery / analytics scheduler
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn discovery_status(&self, workspace_handle: &str) -> ClientResult<DiscoveryStatus>;

    async fn trigger_analytics_job(&self, workspace_handle: &str) -> ClientResult<i64>;

    async fn analytics_job_status(&self, workspace_handle: &str, job_id: i64)
        -> ClientResult<JobStatus>;
}

/// Credential vault (KV store)
#[async_trait]
pub trait VaultClient: Send + Sync {
    async fn secret_exists(&self, path: &str) -> ClientResult<bool>;

    async fn put_secret(&self, path: &str, data: &serde_json::Value) -> ClientResult<()>;

    async fn delete_secret(&self, path: &str) -> ClientResult<()>;
}

/// The full set of collaborators handed to transaction constructors.
#[derive(Clone)]
pub struct Clients {
    pub iam: Arc<dyn IamClient>,
    pub kube: Arc<dyn KubeClient>,
    pub scheduler: Arc<dyn SchedulerClient>,
    pub vault: Arc<dyn VaultClient>,
}
