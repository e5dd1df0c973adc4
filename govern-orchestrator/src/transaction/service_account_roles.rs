use super::{Outcome, Transaction, TransactionId};
use crate::clients::{until_cancelled, ClientError, IamClient};
use crate::config::OrchestratorConfig;
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Kubernetes service accounts in a workspace namespace that get a cloud role.
pub const SERVICE_ACCOUNTS: &[&str] = &["scheduler", "inventory", "compliance", "analytics"];

pub fn role_name(workspace: &Workspace, service_account: &str) -> String {
    format!("{}-{}", workspace.handle, service_account)
}

pub fn role_arn(account_id: &str, workspace: &Workspace, service_account: &str) -> String {
    format!(
        "arn:aws:iam::{}:role/{}",
        account_id,
        role_name(workspace, service_account)
    )
}

/// One IAM role per service account, trusted through the cluster's OIDC
/// provider and bound to that service account only.
pub struct CreateServiceAccountRoles {
    iam: Arc<dyn IamClient>,
    account_id: String,
    oidc_provider: String,
}

impl CreateServiceAccountRoles {
    pub fn new(config: &OrchestratorConfig, iam: Arc<dyn IamClient>) -> Self {
        Self {
            iam,
            account_id: config.account_id.clone(),
            oidc_provider: config.oidc_provider.clone(),
        }
    }

    fn policy_arn(&self, service_account: &str) -> String {
        format!(
            "arn:aws:iam::{}:policy/govern-{}",
            self.account_id, service_account
        )
    }

    fn trust_policy(&self, workspace: &Workspace, service_account: &str) -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {
                    "Federated": format!(
                        "arn:aws:iam::{}:oidc-provider/{}",
                        self.account_id, self.oidc_provider
                    ),
                },
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {
                    "StringEquals": {
                        format!("{}:sub", self.oidc_provider): format!(
                            "system:serviceaccount:{}:{}",
                            workspace.handle, service_account
                        ),
                    },
                },
            }],
        })
        .to_string()
    }
}

#[async_trait]
impl Transaction for CreateServiceAccountRoles {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(&self, cancel: &CancellationToken, workspace: &Workspace) -> Outcome {
        for service_account in SERVICE_ACCOUNTS {
            let role = role_name(workspace, service_account);

            let trust_policy = self.trust_policy(workspace, service_account);
            match until_cancelled(cancel, self.iam.create_role(&role, &trust_policy)).await {
                Ok(()) | Err(ClientError::AlreadyExists(_)) => {}
                Err(e) => return e.into(),
            }

            let policy_arn = self.policy_arn(service_account);
            match until_cancelled(cancel, self.iam.attach_role_policy(&role, &policy_arn)).await {
                Ok(()) | Err(ClientError::AlreadyExists(_)) => {}
                Err(e) => return e.into(),
            }
        }

        Outcome::Success
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        for service_account in SERVICE_ACCOUNTS {
            let role = role_name(workspace, service_account);

            match self
                .iam
                .detach_role_policy(&role, &self.policy_arn(service_account))
                .await
            {
                Ok(()) | Err(ClientError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }

            match self.iam.delete_role(&role).await {
                Ok(()) | Err(ClientError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}
