use super::{try_outcome, Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, JobStatus, SchedulerClient};
use crate::registry::WorkspaceRegistry;
use crate::workspace::Workspace;
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs the first analytics job over the discovered assets.
///
/// The job id is persisted on the workspace as soon as the scheduler hands it
/// out, so later calls poll that job instead of starting another one.
pub struct RunAnalyticsJob {
    scheduler: Arc<dyn SchedulerClient>,
    registry: Arc<dyn WorkspaceRegistry>,
}

impl RunAnalyticsJob {
    pub fn new(scheduler: Arc<dyn SchedulerClient>, registry: Arc<dyn WorkspaceRegistry>) -> Self {
        Self {
            scheduler,
            registry,
        }
    }
}

#[async_trait]
impl Transaction for RunAnalyticsJob {
    fn requirements(&self) -> Vec<TransactionId> {
        vec![TransactionId::EnsureDiscoveryFinished]
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        // The caller's copy may predate a job started by an earlier call.
        let current = try_outcome!(self.registry.get(&workspace.id).await);

        let job_id = match current.analytics_job_id {
            Some(id) => id,
            None => {
                // Not raced: abandoning an accepted trigger would lose the job id.
                let id = try_outcome!(
                    self.scheduler
                        .trigger_analytics_job(&workspace.handle)
                        .await
                );
                try_outcome!(
                    self.registry
                        .set_analytics_job_id(&workspace.id, Some(id))
                        .await
                );
                id
            }
        };

        let status = self.scheduler.analytics_job_status(&workspace.handle, job_id);
        match try_outcome!(until_cancelled(cancel, status).await) {
            JobStatus::Succeeded => Outcome::Success,
            JobStatus::Failed => Outcome::Failed(anyhow!("analytics job {} failed", job_id)),
            status => Outcome::needs_time(format!("analytics job {} is {:?}", job_id, status)),
        }
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        self.registry
            .set_analytics_job_id(&workspace.id, None)
            .await?;
        Ok(())
    }
}
