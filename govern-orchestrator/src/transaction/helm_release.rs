use super::master_credential::master_credential_path;
use super::service_account_roles::{role_arn, SERVICE_ACCOUNTS};
use super::{try_outcome, Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, ClientError, KubeClient, ReleaseSpec, ReleaseStatus};
use crate::config::OrchestratorConfig;
use crate::registry::WorkspaceRegistry;
use crate::workspace::Workspace;
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Installs the workspace release into its namespace and waits for it to
/// report ready.
pub struct CreateHelmRelease {
    kube: Arc<dyn KubeClient>,
    registry: Arc<dyn WorkspaceRegistry>,
    chart: String,
    version: String,
    account_id: String,
    region: String,
    domain_suffix: String,
}

impl CreateHelmRelease {
    pub fn new(
        config: &OrchestratorConfig,
        kube: Arc<dyn KubeClient>,
        registry: Arc<dyn WorkspaceRegistry>,
    ) -> Self {
        Self {
            kube,
            registry,
            chart: config.release_chart.clone(),
            version: config.release_version.clone(),
            account_id: config.account_id.clone(),
            region: config.region.clone(),
            domain_suffix: config.domain_suffix.clone(),
        }
    }

    pub fn release_name(workspace: &Workspace) -> String {
        format!("{}-release", workspace.handle)
    }

    fn release_spec(&self, workspace: &Workspace) -> ReleaseSpec {
        let mut service_accounts = Map::new();
        for service_account in SERVICE_ACCOUNTS {
            service_accounts.insert(
                service_account.to_string(),
                json!({ "roleArn": role_arn(&self.account_id, workspace, service_account) }),
            );
        }

        ReleaseSpec {
            namespace: workspace.handle.clone(),
            name: Self::release_name(workspace),
            chart: self.chart.clone(),
            version: self.version.clone(),
            values: json!({
                "workspace": {
                    "id": workspace.id,
                    "handle": workspace.handle,
                    "size": workspace.size,
                    "replicas": workspace.size.replicas(),
                    "hostname": format!("{}.{}", workspace.handle, self.domain_suffix),
                },
                "region": self.region,
                "serviceAccounts": Value::Object(service_accounts),
                "masterCredential": {
                    "vaultPath": master_credential_path(workspace),
                },
            }),
        }
    }
}

#[async_trait]
impl Transaction for CreateHelmRelease {
    fn requirements(&self) -> Vec<TransactionId> {
        vec![
            TransactionId::CreateMasterCredential,
            TransactionId::CreateServiceAccountRoles,
            TransactionId::CreateNamespace,
        ]
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        let spec = self.release_spec(workspace);

        match until_cancelled(cancel, self.kube.apply_release(&spec)).await {
            Ok(()) | Err(ClientError::AlreadyExists(_)) => {}
            Err(e) => return e.into(),
        }
        if !workspace.is_created {
            try_outcome!(self.registry.set_created(&workspace.id, true).await);
        }

        let status = self.kube.release_status(&spec.namespace, &spec.name);
        match until_cancelled(cancel, status).await {
            Ok(ReleaseStatus::Ready) => Outcome::Success,
            Ok(ReleaseStatus::Progressing) | Err(ClientError::NotFound(_)) => {
                Outcome::needs_time(format!("release {} is not ready yet", spec.name))
            }
            Ok(ReleaseStatus::Failed(reason)) => {
                Outcome::Failed(anyhow!("release {} failed: {}", spec.name, reason))
            }
            Err(e) => e.into(),
        }
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        match self
            .kube
            .delete_release(&workspace.handle, &Self::release_name(workspace))
            .await
        {
            Ok(()) | Err(ClientError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.registry.set_created(&workspace.id, false).await?;

        Ok(())
    }
}
