use super::{try_outcome, Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, VaultClient};
use crate::workspace::Workspace;
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the onboarding flow stores the cloud credential for a workspace:
/// the organization's credential set, or the owner's when there is no
/// organization.
pub fn onboarded_credential_path(workspace: &Workspace) -> Option<String> {
    if let Some(org) = &workspace.organization_id {
        return Some(format!("organizations/{}/credentials", org));
    }
    workspace
        .owner_id
        .as_ref()
        .map(|owner| format!("users/{}/credentials", owner))
}

/// Waits until the new owner has onboarded a cloud credential.
pub struct EnsureCredentialOnboarded {
    vault: Arc<dyn VaultClient>,
}

impl EnsureCredentialOnboarded {
    pub fn new(vault: Arc<dyn VaultClient>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Transaction for EnsureCredentialOnboarded {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        let Some(path) = onboarded_credential_path(workspace) else {
            return Outcome::Failed(anyhow!(
                "workspace {} has neither an owner nor an organization",
                workspace.id
            ));
        };

        if try_outcome!(until_cancelled(cancel, self.vault.secret_exists(&path)).await) {
            Outcome::Success
        } else {
            Outcome::needs_time(format!("no credential onboarded at {}", path))
        }
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        _workspace: &Workspace,
    ) -> anyhow::Result<()> {
        // The credential belongs to the owner, not to the workspace.
        Ok(())
    }
}
