use super::{Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, ClientError, KubeClient};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The workspace namespace, named after the workspace handle.
pub struct CreateNamespace {
    kube: Arc<dyn KubeClient>,
}

impl CreateNamespace {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl Transaction for CreateNamespace {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        match until_cancelled(cancel, self.kube.create_namespace(&workspace.handle)).await {
            Ok(()) | Err(ClientError::AlreadyExists(_)) => Outcome::Success,
            Err(e) => e.into(),
        }
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        match self.kube.delete_namespace(&workspace.handle).await {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
