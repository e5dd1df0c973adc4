use super::{try_outcome, Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, DiscoveryStatus, SchedulerClient};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Polls the scheduler until the first asset discovery of the workspace has
/// completed. Every other status, failures included, just means "later":
/// the scheduler retries discovery on its own.
pub struct EnsureDiscoveryFinished {
    scheduler: Arc<dyn SchedulerClient>,
}

impl EnsureDiscoveryFinished {
    pub fn new(scheduler: Arc<dyn SchedulerClient>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Transaction for EnsureDiscoveryFinished {
    fn requirements(&self) -> Vec<TransactionId> {
        vec![
            TransactionId::CreateHelmRelease,
            TransactionId::EnsureBootstrapInputFinished,
        ]
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        let status = self.scheduler.discovery_status(&workspace.handle);
        match try_outcome!(until_cancelled(cancel, status).await) {
            DiscoveryStatus::Completed => Outcome::Success,
            status => Outcome::needs_time(format!("discovery is {:?}", status)),
        }
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        _workspace: &Workspace,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
