//! HTTP implementations of the external collaborators.
//!
//! Status codes are folded into [`ClientError`] the same way for every
//! backend: 404 is `NotFound`, 409 is `AlreadyExists`, 408/429/5xx and
//! transport failures are `Unavailable`, any other non-success is `Rejected`.

use super::{
    ClientError, ClientResult, DiscoveryStatus, JobStatus, KubeClient, ReleaseSpec, ReleaseStatus,
    SchedulerClient, VaultClient,
};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const HELM_RELEASE_API: &str = "apis/helm.toolkit.fluxcd.io/v2";

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("govern-orchestrator/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| OrchestratorError::InvalidInput(format!("failed to build http client: {}", e)))
}

fn classify_status(status: StatusCode, context: String) -> ClientError {
    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(context),
        StatusCode::CONFLICT => ClientError::AlreadyExists(context),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ClientError::Unavailable(format!("{} ({})", context, status))
        }
        s if s.is_server_error() => ClientError::Unavailable(format!("{} ({})", context, status)),
        _ => ClientError::Rejected(format!("{} ({})", context, status)),
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return classify_status(status, err.to_string());
        }
        if err.is_decode() || err.is_builder() {
            ClientError::Rejected(err.to_string())
        } else {
            ClientError::Unavailable(err.to_string())
        }
    }
}

async fn send(request: RequestBuilder, context: impl Into<String>) -> ClientResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let context = context.into();
    let body = response.text().await.unwrap_or_default();
    debug!("{} returned {}: {}", context, status, body);
    Err(classify_status(status, context))
}

/// Kubernetes API client for namespaces and Flux `HelmRelease` objects
pub struct HttpKubeClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpKubeClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.http_timeout())?,
            base_url: config.kube_api_url.trim_end_matches('/').to_string(),
            token: config.kube_token.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    fn release_url(&self, namespace: &str, name: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}/namespaces/{}/helmreleases",
            self.base_url, HELM_RELEASE_API, namespace
        );
        if let Some(name) = name {
            url.push('/');
            url.push_str(name);
        }
        url
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseObject {
    #[serde(default)]
    status: ReleaseObjectStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseObjectStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

fn release_status_from_conditions(conditions: &[Condition]) -> ReleaseStatus {
    let Some(ready) = conditions.iter().find(|c| c.kind == "Ready") else {
        return ReleaseStatus::Progressing;
    };

    match ready.status.as_str() {
        "True" => ReleaseStatus::Ready,
        "False" if ready.reason.ends_with("Failed") => {
            ReleaseStatus::Failed(format!("{}: {}", ready.reason, ready.message))
        }
        _ => ReleaseStatus::Progressing,
    }
}

#[async_trait]
impl KubeClient for HttpKubeClient {
    async fn create_namespace(&self, name: &str) -> ClientResult<()> {
        let body = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name },
        });
        let request = self
            .client
            .post(format!("{}/api/v1/namespaces", self.base_url))
            .json(&body);
        send(self.authorize(request), format!("namespace {}", name)).await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> ClientResult<()> {
        let request = self
            .client
            .delete(format!("{}/api/v1/namespaces/{}", self.base_url, name));
        send(self.authorize(request), format!("namespace {}", name)).await?;
        Ok(())
    }

    async fn apply_release(&self, release: &ReleaseSpec) -> ClientResult<()> {
        let body = json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {
                "name": release.name,
                "namespace": release.namespace,
            },
            "spec": {
                "interval": "5m",
                "chart": {
                    "spec": {
                        "chart": release.chart,
                        "version": release.version,
                        "sourceRef": {
                            "kind": "HelmRepository",
                            "name": "govern",
                            "namespace": "flux-system",
                        },
                    },
                },
                "values": release.values,
            },
        });
        let request = self
            .client
            .post(self.release_url(&release.namespace, None))
            .json(&body);
        send(
            self.authorize(request),
            format!("release {}/{}", release.namespace, release.name),
        )
        .await?;
        Ok(())
    }

    async fn release_status(&self, namespace: &str, name: &str) -> ClientResult<ReleaseStatus> {
        let request = self.client.get(self.release_url(namespace, Some(name)));
        let response = send(
            self.authorize(request),
            format!("release {}/{}", namespace, name),
        )
        .await?;
        let object: ReleaseObject = response.json().await?;

        Ok(release_status_from_conditions(&object.status.conditions))
    }

    async fn delete_release(&self, namespace: &str, name: &str) -> ClientResult<()> {
        let request = self.client.delete(self.release_url(namespace, Some(name)));
        send(
            self.authorize(request),
            format!("release {}/{}", namespace, name),
        )
        .await?;
        Ok(())
    }
}

/// Scheduler service client (discovery status and analytics jobs)
pub struct HttpSchedulerClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse<T> {
    status: T,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    job_id: i64,
}

impl HttpSchedulerClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.http_timeout())?,
            base_url: config.scheduler_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn discovery_status(&self, workspace_handle: &str) -> ClientResult<DiscoveryStatus> {
        let request = self
            .client
            .get(format!("{}/api/v1/discovery/status", self.base_url))
            .query(&[("workspace", workspace_handle)]);
        let response = send(request, format!("discovery status for {}", workspace_handle)).await?;
        let body: StatusResponse<DiscoveryStatus> = response.json().await?;
        Ok(body.status)
    }

    async fn trigger_analytics_job(&self, workspace_handle: &str) -> ClientResult<i64> {
        let request = self
            .client
            .post(format!("{}/api/v1/analytics/jobs", self.base_url))
            .json(&json!({ "workspace": workspace_handle }));
        let response = send(request, format!("analytics job for {}", workspace_handle)).await?;
        let body: TriggerResponse = response.json().await?;
        Ok(body.job_id)
    }

    async fn analytics_job_status(
        &self,
        workspace_handle: &str,
        job_id: i64,
    ) -> ClientResult<JobStatus> {
        let request = self
            .client
            .get(format!("{}/api/v1/analytics/jobs/{}", self.base_url, job_id))
            .query(&[("workspace", workspace_handle)]);
        let response = send(request, format!("analytics job {}", job_id)).await?;
        let body: StatusResponse<JobStatus> = response.json().await?;
        Ok(body.status)
    }
}

/// Vault KV v2 client
pub struct HttpVaultClient {
    client: Client,
    base_url: String,
    token: String,
    mount: String,
}

impl HttpVaultClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            client: build_client(config.http_timeout())?,
            base_url: config.vault_url.trim_end_matches('/').to_string(),
            token: config.vault_token.clone(),
            mount: config.vault_mount.clone(),
        })
    }

    fn url(&self, section: &str, path: &str) -> String {
        format!(
            "{}/v1/{}/{}/{}",
            self.base_url,
            self.mount,
            section,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl VaultClient for HttpVaultClient {
    async fn secret_exists(&self, path: &str) -> ClientResult<bool> {
        let request = self
            .client
            .get(self.url("metadata", path))
            .header("X-Vault-Token", &self.token);

        match send(request, format!("secret {}", path)).await {
            Ok(_) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn put_secret(&self, path: &str, data: &Value) -> ClientResult<()> {
        let request = self
            .client
            .post(self.url("data", path))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": data }));
        send(request, format!("secret {}", path)).await?;
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> ClientResult<()> {
        let request = self
            .client
            .delete(self.url("metadata", path))
            .header("X-Vault-Token", &self.token);
        send(request, format!("secret {}", path)).await?;
        Ok(())
    }
}
