//! Applies a resolved transaction order to one workspace.

use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::registry::WorkspaceRegistry;
use crate::transaction::{Outcome, TransactionId, TransactionRegistry};
use crate::workspace::Workspace;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one [`Executor::execute`] call achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Every transaction in the order has a completion record.
    Satisfied,
    /// `blocked_on` needs more time; nothing after it was attempted.
    Pending {
        blocked_on: TransactionId,
        reason: String,
    },
    /// `transaction` failed hard. Every completed transaction was rolled back and
    /// the workspace is marked failed with `cause`.
    Failed {
        transaction: TransactionId,
        cause: String,
    },
    /// Shutdown was requested between two transactions, or abandoned the
    /// external call of the one in flight.
    Cancelled,
}

impl Execution {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Execution::Satisfied)
    }
}

#[derive(Clone)]
pub struct Executor {
    registry: Arc<dyn WorkspaceRegistry>,
    transactions: Arc<TransactionRegistry>,
    metrics: Arc<dyn MetricsSink>,
}

impl Executor {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        transactions: Arc<TransactionRegistry>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            transactions,
            metrics,
        }
    }

    /// Walk `order`, skipping transactions with a completion record and
    /// applying the rest one at a time.
    ///
    /// Transaction outcomes never surface as `Err`; an `Err` means the
    /// registry could not be read or written.
    pub async fn execute(
        &self,
        workspace: &Workspace,
        order: &[TransactionId],
        cancel: &CancellationToken,
    ) -> Result<Execution> {
        let completed = self.registry.completed_transactions(&workspace.id).await?;
        let mut applied = Vec::with_capacity(order.len());

        for &id in order {
            if completed.contains(&id) {
                applied.push(id);
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(Execution::Cancelled);
            }

            let transaction = self.transactions.get(id)?;
            let outcome = transaction.apply_idempotent(cancel, workspace).await;
            self.metrics.record_transaction(id, outcome.label());

            match outcome {
                Outcome::Success => {
                    self.registry.mark_completed(&workspace.id, id).await?;
                    debug!("Transaction {} applied to workspace {}", id, workspace.id);
                    applied.push(id);
                }
                Outcome::NeedsTime(_) if cancel.is_cancelled() => {
                    debug!("Transaction {} on workspace {} cancelled", id, workspace.id);
                    return Ok(Execution::Cancelled);
                }
                Outcome::NeedsTime(reason) => {
                    debug!(
                        "Transaction {} needs time on workspace {}: {}",
                        id, workspace.id, reason
                    );
                    return Ok(Execution::Pending {
                        blocked_on: id,
                        reason,
                    });
                }
                Outcome::Failed(err) => {
                    let cause = format!("{} failed: {:#}", id, err);
                    warn!("Workspace {}: {}, rolling back", workspace.id, cause);

                    // Records left by earlier states predate everything in `order`.
                    let earlier = self.earlier_records(&completed, order)?;
                    self.rollback(workspace, &applied, cancel).await?;
                    self.rollback(workspace, &earlier, cancel).await?;
                    self.registry.mark_failed(&workspace.id, &cause).await?;

                    return Ok(Execution::Failed {
                        transaction: id,
                        cause,
                    });
                }
            }
        }

        Ok(Execution::Satisfied)
    }

    /// Completion records outside `order`, in dependency order.
    fn earlier_records(
        &self,
        completed: &HashSet<TransactionId>,
        order: &[TransactionId],
    ) -> Result<Vec<TransactionId>> {
        let mut earlier = completed
            .iter()
            .copied()
            .filter(|done| !order.contains(done))
            .collect::<Vec<_>>();
        if earlier.is_empty() {
            return Ok(earlier);
        }
        earlier.sort();

        Ok(self
            .transactions
            .resolve(&earlier)?
            .iter()
            .copied()
            .filter(|id| earlier.contains(id))
            .collect())
    }

    /// Best-effort compensation in reverse order. A transaction whose rollback
    /// fails keeps its completion record so an operator can see what is left.
    async fn rollback(
        &self,
        workspace: &Workspace,
        applied: &[TransactionId],
        cancel: &CancellationToken,
    ) -> Result<()> {
        for &id in applied.iter().rev() {
            let transaction = self.transactions.get(id)?;
            match transaction.rollback_idempotent(cancel, workspace).await {
                Ok(()) => {
                    self.metrics.record_rollback(id, true);
                    self.registry.clear_completed(&workspace.id, id).await?;
                    info!("Rolled back {} on workspace {}", id, workspace.id);
                }
                Err(e) => {
                    self.metrics.record_rollback(id, false);
                    error!(
                        "Rollback of {} on workspace {} failed: {:#}",
                        id, workspace.id, e
                    );
                }
            }
        }
        Ok(())
    }
}
