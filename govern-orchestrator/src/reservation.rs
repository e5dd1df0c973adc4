//! The hot-spare pool: exactly one unclaimed, pre-provisioned workspace.
//!
//! Reserving a workspace sets up its slow infrastructure ahead of demand, so
//! signup only has to claim the spare and finish provisioning. A claim leaves
//! a gap that the next [`ReservationPool::ensure_reservation`] fills.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::metrics::MetricsSink;
use crate::registry::WorkspaceRegistry;
use crate::state::StateId;
use crate::workspace::{
    ClaimRequest, NewWorkspace, Workspace, WorkspaceFilters, WorkspaceSize, WorkspaceTier,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Status a spare is created in.
pub const RESERVING: StateId = StateId::Reserving;
/// Status a spare can be claimed from.
pub const RESERVED: StateId = StateId::Reserved;
/// Status a claimed workspace moves to.
pub const CLAIMED: StateId = StateId::WaitingForCredential;

#[derive(Clone)]
pub struct ReservationPool {
    registry: Arc<dyn WorkspaceRegistry>,
    metrics: Arc<dyn MetricsSink>,
    tier: WorkspaceTier,
    size: WorkspaceSize,
    retry_after: Duration,
}

impl ReservationPool {
    pub fn new(
        config: &OrchestratorConfig,
        registry: Arc<dyn WorkspaceRegistry>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            metrics,
            tier: config.reservation_tier,
            size: config.reservation_size,
            retry_after: config.reservation_retry(),
        }
    }

    /// Unclaimed workspaces that are reserved or still being reserved.
    async fn spares(&self) -> Result<Vec<Workspace>> {
        let filters = WorkspaceFilters {
            statuses: vec![RESERVING, RESERVED],
            unclaimed_only: true,
            ..Default::default()
        };
        self.registry.list(&filters).await
    }

    /// The most recently failed spare, if it failed less than `retry_after` ago.
    async fn recent_failure(&self) -> Result<Option<Workspace>> {
        let filters = WorkspaceFilters {
            statuses: vec![StateId::Failed],
            unclaimed_only: true,
            ..Default::default()
        };
        let latest = self
            .registry
            .list(&filters)
            .await?
            .into_iter()
            .max_by_key(|workspace| workspace.updated_at);

        Ok(latest.filter(|workspace| {
            // A timestamp in the future counts as recent.
            (Utc::now() - workspace.updated_at)
                .to_std()
                .map_or(true, |age| age < self.retry_after)
        }))
    }

    /// Create a spare if none exists. A spare that is still reserving counts,
    /// so a slow reservation is never duplicated. Extra spares left behind by
    /// a race are kept. After a spare fails, no replacement is created until
    /// `reservation_retry_secs` have passed.
    ///
    /// Returns the workspace that was created, if any.
    pub async fn ensure_reservation(&self) -> Result<Option<Workspace>> {
        let spares = self.spares().await?;
        if !spares.is_empty() {
            debug!("Reservation pool holds {} spare(s)", spares.len());
            return Ok(None);
        }
        if let Some(failed) = self.recent_failure().await? {
            error!(
                "Spare workspace {} failed at {} ({}), holding off new reservations for {}s",
                failed.id,
                failed.updated_at,
                failed.error_message.as_deref().unwrap_or("unknown cause"),
                self.retry_after.as_secs()
            );
            return Ok(None);
        }

        let workspace = self
            .registry
            .create(&NewWorkspace::reservation(self.tier, self.size))
            .await?;
        self.metrics.record_reservation_created();
        info!(
            "Created spare workspace {} ({})",
            workspace.id, workspace.handle
        );

        Ok(Some(workspace))
    }

    /// Hand the oldest reserved spare to the caller and move it on to
    /// credential onboarding.
    ///
    /// A spare claimed concurrently by someone else is skipped in favour of
    /// the next one. Fails with [`OrchestratorError::NoReservation`] when no
    /// spare is ready.
    pub async fn claim(&self, request: &ClaimRequest) -> Result<Workspace> {
        if request.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "workspace name must not be empty".to_string(),
            ));
        }
        if request.owner_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "owner must not be empty".to_string(),
            ));
        }

        let filters = WorkspaceFilters {
            statuses: vec![RESERVED],
            unclaimed_only: true,
            ..Default::default()
        };
        for candidate in self.registry.list(&filters).await? {
            if self
                .registry
                .claim(&candidate.id, request, RESERVED, CLAIMED)
                .await?
            {
                info!(
                    "Workspace {} claimed by {} as '{}'",
                    candidate.id, request.owner_id, request.name
                );
                return self.registry.get(&candidate.id).await;
            }
            debug!("Workspace {} was claimed concurrently", candidate.id);
        }

        Err(OrchestratorError::NoReservation)
    }
}
