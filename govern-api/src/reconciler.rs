use govern_orchestrator::Reconciler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Background task driving the workspace lifecycle until `cancel` fires.
pub async fn start_reconciler_task(reconciler: Arc<Reconciler>, cancel: CancellationToken) {
    info!("Reconciler task running");

    reconciler.run(cancel).await;

    info!("Reconciler task stopped");
}
