use super::{Outcome, Transaction, TransactionId};
use crate::workspace::Workspace;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Waits for the owner to finish the bootstrap questionnaire, recorded by the
/// onboarding flow as the `bootstrap_input_finished` marker.
#[derive(Default)]
pub struct EnsureBootstrapInputFinished;

impl EnsureBootstrapInputFinished {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transaction for EnsureBootstrapInputFinished {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> Outcome {
        if workspace.bootstrap_input_finished {
            Outcome::Success
        } else {
            Outcome::needs_time("waiting for bootstrap input")
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
