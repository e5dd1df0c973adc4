use govern_orchestrator::{OrchestratorConfig, ReconcilerSettings};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_reconcile_concurrency")]
    pub reconcile_concurrency: usize,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_bind_addr() -> String {
    std::env::var("GOVERN_API_BIND").unwrap_or_else(|_| "0.0.0.0:3121".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("GOVERN_API_DB_PATH") {
        return PathBuf::from(path);
    }

    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("govern").join("govern.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".govern").join("govern.db")
    }
}

fn default_reconcile_interval() -> u64 {
    std::env::var("GOVERN_RECONCILE_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10) // 10 seconds
}

fn default_reconcile_concurrency() -> usize {
    std::env::var("GOVERN_RECONCILE_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            reconcile_interval_secs: default_reconcile_interval(),
            reconcile_concurrency: default_reconcile_concurrency(),
            orchestrator: OrchestratorConfig::from_env(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            interval: Duration::from_secs(self.reconcile_interval_secs.max(1)),
            concurrency: self.reconcile_concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_settings_are_clamped() {
        let config = Config {
            reconcile_interval_secs: 0,
            reconcile_concurrency: 0,
            ..Config::default()
        };
        let settings = config.reconciler_settings();
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.concurrency, 1);
    }
}
