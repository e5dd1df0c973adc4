//! Explicit orchestrator configuration.
//!
//! Built once at startup and handed to the state catalog, the reconciler and
//! every transaction constructor. Nothing in this crate reads the process
//! environment after `OrchestratorConfig::from_env()` returns.

use crate::error::{OrchestratorError, Result};
use crate::workspace::{WorkspaceSize, WorkspaceTier};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Cloud region roles and releases are created in
    #[serde(default = "default_region")]
    pub region: String,

    /// Cloud account that owns the per-workspace IAM roles
    #[serde(default = "default_account_id")]
    pub account_id: String,

    /// OIDC provider the service-account roles trust
    #[serde(default = "default_oidc_provider")]
    pub oidc_provider: String,

    /// Suffix appended to a workspace handle to build its public hostname
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,

    #[serde(default = "default_release_chart")]
    pub release_chart: String,

    #[serde(default = "default_release_version")]
    pub release_version: String,

    /// Size of the hot spare kept in the reservation pool
    #[serde(default)]
    pub reservation_size: WorkspaceSize,

    #[serde(default)]
    pub reservation_tier: WorkspaceTier,

    /// How long after a spare fails before another one is created
    #[serde(default = "default_reservation_retry")]
    pub reservation_retry_secs: u64,

    #[serde(default = "default_scheduler_url")]
    pub scheduler_url: String,

    #[serde(default = "default_vault_url")]
    pub vault_url: String,

    #[serde(default = "default_vault_token")]
    pub vault_token: String,

    /// KV v2 mount holding workspace secrets
    #[serde(default = "default_vault_mount")]
    pub vault_mount: String,

    #[serde(default = "default_kube_api_url")]
    pub kube_api_url: String,

    #[serde(default = "default_kube_token")]
    pub kube_token: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn default_region() -> String {
    env_or("GOVERN_REGION", "us-east-2")
}

fn default_account_id() -> String {
    env_or("GOVERN_ACCOUNT_ID", "000000000000")
}

fn default_oidc_provider() -> String {
    env_or("GOVERN_OIDC_PROVIDER", "oidc.eks.us-east-2.amazonaws.com/id/local")
}

fn default_domain_suffix() -> String {
    env_or("GOVERN_DOMAIN_SUFFIX", "govern.local")
}

fn default_release_chart() -> String {
    env_or("GOVERN_RELEASE_CHART", "govern-workspace")
}

fn default_release_version() -> String {
    env_or("GOVERN_RELEASE_VERSION", "0.1.0")
}

fn default_reservation_retry() -> u64 {
    std::env::var("GOVERN_RESERVATION_RETRY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300)
}

fn default_scheduler_url() -> String {
    env_or("GOVERN_SCHEDULER_URL", "http://scheduler:7251")
}

fn default_vault_url() -> String {
    env_or("GOVERN_VAULT_URL", "http://vault:8200")
}

fn default_vault_token() -> String {
    env_or("GOVERN_VAULT_TOKEN", "")
}

fn default_vault_mount() -> String {
    env_or("GOVERN_VAULT_MOUNT", "secret")
}

fn default_kube_api_url() -> String {
    env_or("GOVERN_KUBE_API_URL", "https://kubernetes.default.svc")
}

fn default_kube_token() -> String {
    env_or("GOVERN_KUBE_TOKEN", "")
}

fn default_http_timeout() -> u64 {
    std::env::var("GOVERN_HTTP_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30)
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            account_id: default_account_id(),
            oidc_provider: default_oidc_provider(),
            domain_suffix: default_domain_suffix(),
            release_chart: default_release_chart(),
            release_version: default_release_version(),
            reservation_size: std::env::var("GOVERN_RESERVATION_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            reservation_tier: std::env::var("GOVERN_RESERVATION_TIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            reservation_retry_secs: default_reservation_retry(),
            scheduler_url: default_scheduler_url(),
            vault_url: default_vault_url(),
            vault_token: default_vault_token(),
            vault_mount: default_vault_mount(),
            kube_api_url: default_kube_api_url(),
            kube_token: default_kube_token(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn reservation_retry(&self) -> Duration {
        Duration::from_secs(self.reservation_retry_secs)
    }

    /// Reject configurations the vault client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.vault_url.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "vault url must not be empty".to_string(),
            ));
        }
        if !self.vault_url.starts_with("http://") && !self.vault_url.starts_with("https://") {
            return Err(OrchestratorError::InvalidInput(format!(
                "vault url must be http(s): {}",
                self.vault_url
            )));
        }
        if self.vault_token.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "vault token must be set (GOVERN_VAULT_TOKEN)".to_string(),
            ));
        }
        if self.vault_mount.trim().is_empty() || self.vault_mount.contains('/') {
            return Err(OrchestratorError::InvalidInput(format!(
                "invalid vault mount: {:?}",
                self.vault_mount
            )));
        }
        if self.http_timeout_secs == 0 {
            return Err(OrchestratorError::InvalidInput(
                "http timeout must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}
