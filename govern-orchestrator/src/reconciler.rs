//! The control loop driving every non-terminal workspace toward its target
//! status.

use crate::error::{OrchestratorError, Result};
use crate::executor::{Execution, Executor};
use crate::metrics::MetricsSink;
use crate::registry::WorkspaceRegistry;
use crate::reservation::ReservationPool;
use crate::state::StateCatalog;
use crate::transaction::TransactionRegistry;
use crate::workspace::{Workspace, WorkspaceFilters};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    /// Workspaces processed concurrently within one tick
    pub concurrency: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            concurrency: 4,
        }
    }
}

pub struct Reconciler {
    registry: Arc<dyn WorkspaceRegistry>,
    catalog: Arc<StateCatalog>,
    transactions: Arc<TransactionRegistry>,
    executor: Executor,
    pool: ReservationPool,
    metrics: Arc<dyn MetricsSink>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        catalog: Arc<StateCatalog>,
        transactions: Arc<TransactionRegistry>,
        pool: ReservationPool,
        metrics: Arc<dyn MetricsSink>,
        settings: ReconcilerSettings,
    ) -> Self {
        let executor = Executor::new(registry.clone(), transactions.clone(), metrics.clone());
        Self {
            registry,
            catalog,
            transactions,
            executor,
            pool,
            metrics,
            settings,
        }
    }

    /// Tick on the configured interval until `cancel` fires. A failed tick is
    /// logged and retried on the next interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Reconciler running (every {:?}, {} workspaces at a time)",
            self.settings.interval, self.settings.concurrency
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(&cancel).await {
                Ok(()) => self.metrics.record_tick("ok"),
                Err(e) => {
                    error!("Reconciler tick aborted: {}", e);
                    self.metrics.record_tick("error");
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// One pass over every workspace in a processing status, followed by a
    /// reservation pool check.
    ///
    /// A registry failure stops workspaces that have not started yet and is
    /// returned once the in-flight ones have settled.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<()> {
        let filters = WorkspaceFilters::with_statuses(self.catalog.processing_states());
        let workspaces = self.registry.list(&filters).await?;
        debug!("Reconciling {} workspace(s)", workspaces.len());

        let abort = cancel.child_token();
        let first_error: Mutex<Option<OrchestratorError>> = Mutex::new(None);

        stream::iter(workspaces)
            .for_each_concurrent(self.settings.concurrency.max(1), |workspace| {
                let abort = &abort;
                let first_error = &first_error;
                async move {
                    if abort.is_cancelled() {
                        return;
                    }
                    if let Err(e) = self.reconcile(workspace, abort).await {
                        abort.cancel();
                        let mut slot = first_error
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        slot.get_or_insert(e);
                    }
                }
            })
            .await;

        let pass = first_error
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if cancel.is_cancelled() {
            return pass.map_or(Ok(()), Err);
        }

        let reservation = self.pool.ensure_reservation().await.map(|_| ());
        match pass {
            Some(e) => Err(e),
            None => reservation,
        }
    }

    #[instrument(skip_all, fields(workspace_id = %workspace.id, status = %workspace.status))]
    async fn reconcile(&self, workspace: Workspace, cancel: &CancellationToken) -> Result<()> {
        let state = self.catalog.get_state(workspace.status)?;
        let order = self.transactions.resolve(state.requirements())?;

        match self.executor.execute(&workspace, &order, cancel).await? {
            Execution::Satisfied => {
                if self
                    .registry
                    .update_status(&workspace.id, state.processing, state.finished)
                    .await?
                {
                    info!(
                        "Workspace {} advanced from {} to {}",
                        workspace.id, state.processing, state.finished
                    );
                    self.metrics.record_workspace("advanced");
                } else {
                    debug!(
                        "Workspace {} left {} concurrently",
                        workspace.id, state.processing
                    );
                }
            }
            Execution::Pending { blocked_on, reason } => {
                debug!(
                    "Workspace {} waiting on {}: {}",
                    workspace.id, blocked_on, reason
                );
                self.metrics.record_workspace("pending");
            }
            Execution::Failed { transaction, cause } => {
                warn!(
                    "Workspace {} failed at {}: {}",
                    workspace.id, transaction, cause
                );
                self.metrics.record_workspace("failed");
            }
            Execution::Cancelled => {
                debug!("Workspace {} interrupted by shutdown", workspace.id);
            }
        }

        Ok(())
    }
}
