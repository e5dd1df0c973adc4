use super::{try_outcome, Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, ClientError, VaultClient};
use crate::workspace::Workspace;
use async_trait::async_trait;
use rand::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MASTER_USERNAME: &str = "govern_master";
const PASSWORD_LENGTH: usize = 32;

/// Vault path of the workspace's master database credential.
pub fn master_credential_path(workspace: &Workspace) -> String {
    format!("workspaces/{}/master-credential", workspace.id)
}

fn generate_password(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                            abcdefghijklmnopqrstuvwxyz\
                            0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Generates the master credential once and stores it in the vault.
pub struct CreateMasterCredential {
    vault: Arc<dyn VaultClient>,
}

impl CreateMasterCredential {
    pub fn new(vault: Arc<dyn VaultClient>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Transaction for CreateMasterCredential {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        let path = master_credential_path(workspace);

        // Never regenerate: services may already hold the stored password.
        if try_outcome!(until_cancelled(cancel, self.vault.secret_exists(&path)).await) {
            return Outcome::Success;
        }

        let credential = json!({
            "username": MASTER_USERNAME,
            "password": generate_password(PASSWORD_LENGTH),
        });
        try_outcome!(until_cancelled(cancel, self.vault.put_secret(&path, &credential)).await);

        Outcome::Success
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        match self
            .vault
            .delete_secret(&master_credential_path(workspace))
            .await
        {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
