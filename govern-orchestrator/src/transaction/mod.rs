//! Provisioning transactions and their dependency graph.
//!
//! A transaction is one idempotent unit of provisioning work against an
//! external system. Each declares the transactions it depends on; the
//! [`TransactionRegistry`] turns a state's requirement set into an order in
//! which every dependency comes strictly before its dependents.

use crate::clients::{ClientError, Clients};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::registry::WorkspaceRegistry;
use crate::state::StateCatalog;
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

mod analytics_job;
mod bootstrap_input;
mod credential_onboarded;
mod discovery_finished;
mod helm_release;
mod master_credential;
mod namespace;
mod service_account_roles;

pub use analytics_job::RunAnalyticsJob;
pub use bootstrap_input::EnsureBootstrapInputFinished;
pub use credential_onboarded::EnsureCredentialOnboarded;
pub use discovery_finished::EnsureDiscoveryFinished;
pub use helm_release::CreateHelmRelease;
pub use master_credential::CreateMasterCredential;
pub use namespace::CreateNamespace;
pub use service_account_roles::CreateServiceAccountRoles;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
    ToSchema,
)]
pub enum TransactionId {
    CreateMasterCredential,
    CreateServiceAccountRoles,
    CreateNamespace,
    CreateHelmRelease,
    EnsureCredentialOnboarded,
    EnsureBootstrapInputFinished,
    EnsureDiscoveryFinished,
    RunAnalyticsJob,
}

impl TransactionId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionId::CreateMasterCredential => "CreateMasterCredential",
            TransactionId::CreateServiceAccountRoles => "CreateServiceAccountRoles",
            TransactionId::CreateNamespace => "CreateNamespace",
            TransactionId::CreateHelmRelease => "CreateHelmRelease",
            TransactionId::EnsureCredentialOnboarded => "EnsureCredentialOnboarded",
            TransactionId::EnsureBootstrapInputFinished => "EnsureBootstrapInputFinished",
            TransactionId::EnsureDiscoveryFinished => "EnsureDiscoveryFinished",
            TransactionId::RunAnalyticsJob => "RunAnalyticsJob",
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one `apply_idempotent` call.
#[derive(Debug)]
pub enum Outcome {
    /// The external side effect is in place.
    Success,
    /// Not ready yet. Nothing is wrong; ask again on a later tick.
    NeedsTime(String),
    /// Unrecoverable. Triggers rollback of the workspace.
    Failed(anyhow::Error),
}

impl Outcome {
    pub fn needs_time(reason: impl Into<String>) -> Self {
        Outcome::NeedsTime(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NeedsTime(_) => "needs_time",
            Outcome::Failed(_) => "failed",
        }
    }
}

impl From<ClientError> for Outcome {
    fn from(err: ClientError) -> Self {
        if err.is_transient() {
            Outcome::NeedsTime(err.to_string())
        } else {
            Outcome::Failed(err.into())
        }
    }
}

impl From<OrchestratorError> for Outcome {
    // Registry writes made from inside a transaction are retried like any
    // other transient failure.
    fn from(err: OrchestratorError) -> Self {
        Outcome::NeedsTime(err.to_string())
    }
}

/// Unwrap a client result inside `apply_idempotent`, converting the error
/// into the matching [`Outcome`].
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return $crate::transaction::Outcome::from(err),
        }
    };
}
pub(crate) use try_outcome;

#[async_trait]
pub trait Transaction: Send + Sync {
    /// Transactions that must have been applied before this one.
    fn requirements(&self) -> Vec<TransactionId>;

    /// Apply the side effect. Must be safe to call again after success or
    /// after a partial failure, absorbing "already exists" as success.
    ///
    /// External calls are raced against `cancel`; a call abandoned on
    /// shutdown yields [`Outcome::NeedsTime`].
    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome;

    /// Undo the side effect. Must be safe to call when it was never applied.
    ///
    /// Compensation runs to completion even after `cancel` fires.
    async fn rollback_idempotent(
        &self,
        cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> anyhow::Result<()>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction dependency cycle: {}", format_path(.path))]
pub struct CycleError {
    /// The cycle, starting and ending with the same transaction
    pub path: Vec<TransactionId>,
}

fn format_path(path: &[TransactionId]) -> String {
    path.iter()
        .map(TransactionId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Named transactions plus the resolver over their dependency graph.
#[derive(Default)]
pub struct TransactionRegistry {
    transactions: HashMap<TransactionId, Arc<dyn Transaction>>,
    resolved: RwLock<HashMap<Vec<TransactionId>, Arc<[TransactionId]>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transaction of the standard lifecycle, wired to its collaborators.
    pub fn standard(
        config: &OrchestratorConfig,
        clients: &Clients,
        registry: Arc<dyn WorkspaceRegistry>,
    ) -> Result<Self> {
        let mut transactions = Self::new();
        transactions.register(
            TransactionId::CreateMasterCredential,
            Arc::new(CreateMasterCredential::new(clients.vault.clone())),
        )?;
        transactions.register(
            TransactionId::CreateServiceAccountRoles,
            Arc::new(CreateServiceAccountRoles::new(config, clients.iam.clone())),
        )?;
        transactions.register(
            TransactionId::CreateNamespace,
            Arc::new(CreateNamespace::new(clients.kube.clone())),
        )?;
        transactions.register(
            TransactionId::CreateHelmRelease,
            Arc::new(CreateHelmRelease::new(
                config,
                clients.kube.clone(),
                registry.clone(),
            )),
        )?;
        transactions.register(
            TransactionId::EnsureCredentialOnboarded,
            Arc::new(EnsureCredentialOnboarded::new(clients.vault.clone())),
        )?;
        transactions.register(
            TransactionId::EnsureBootstrapInputFinished,
            Arc::new(EnsureBootstrapInputFinished::new()),
        )?;
        transactions.register(
            TransactionId::EnsureDiscoveryFinished,
            Arc::new(EnsureDiscoveryFinished::new(clients.scheduler.clone())),
        )?;
        transactions.register(
            TransactionId::RunAnalyticsJob,
            Arc::new(RunAnalyticsJob::new(clients.scheduler.clone(), registry)),
        )?;

        Ok(transactions)
    }

    pub fn register(&mut self, id: TransactionId, transaction: Arc<dyn Transaction>) -> Result<()> {
        if self.transactions.contains_key(&id) {
            return Err(OrchestratorError::InvalidInput(format!(
                "transaction {} is already registered",
                id
            )));
        }
        self.transactions.insert(id, transaction);
        self.resolved
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(())
    }

    pub fn get(&self, id: TransactionId) -> Result<&Arc<dyn Transaction>> {
        self.transactions
            .get(&id)
            .ok_or(OrchestratorError::UnknownTransaction(id))
    }

    /// Order `required` and everything it transitively depends on so each
    /// transaction's requirements appear strictly before it.
    ///
    /// Depth-first over the declaration order, so the result is deterministic.
    /// Results are cached per requirement set.
    pub fn resolve(&self, required: &[TransactionId]) -> Result<Arc<[TransactionId]>> {
        if let Some(order) = self
            .resolved
            .read()
            .ok()
            .and_then(|cache| cache.get(required).cloned())
        {
            return Ok(order);
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        let mut order = Vec::new();
        for id in required {
            self.visit(*id, &mut marks, &mut path, &mut order)?;
        }

        let order: Arc<[TransactionId]> = order.into();
        if let Ok(mut cache) = self.resolved.write() {
            cache.insert(required.to_vec(), order.clone());
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: TransactionId,
        marks: &mut HashMap<TransactionId, Mark>,
        path: &mut Vec<TransactionId>,
        order: &mut Vec<TransactionId>,
    ) -> Result<()> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(id);
                return Err(CycleError { path: cycle }.into());
            }
            None => {}
        }

        let transaction = self.get(id)?;
        marks.insert(id, Mark::Visiting);
        path.push(id);
        for dependency in transaction.requirements() {
            self.visit(dependency, marks, path, order)?;
        }
        path.pop();
        marks.insert(id, Mark::Done);
        order.push(id);

        Ok(())
    }

    /// Resolve every state of `catalog`. Run once at startup: a cycle or a
    /// missing transaction is a configuration error, not a per-workspace one.
    pub fn validate(&self, catalog: &StateCatalog) -> Result<()> {
        for state in catalog.states() {
            self.resolve(state.requirements())?;
        }
        Ok(())
    }
}
