//! Shared fixtures for govern-orchestrator integration tests
//!
//! Scripted transactions record every apply/rollback call into a shared
//! journal so tests can assert on ordering, skips and compensation.

#![allow(dead_code)]

use async_trait::async_trait;
use govern_orchestrator::test_utils::create_test_db;
use govern_orchestrator::workspace::NewWorkspace;
use govern_orchestrator::{
    ClaimRequest, MetricsSink, OrchestratorConfig, Outcome, SqliteRegistry, Transaction,
    TransactionId, Workspace, WorkspaceRegistry, WorkspaceSize, WorkspaceTier,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Configuration pointing at nothing; the tests only use in-memory clients.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        region: "us-east-2".to_string(),
        account_id: "123456789012".to_string(),
        oidc_provider: "oidc.example.com/id/TEST".to_string(),
        domain_suffix: "govern.test".to_string(),
        release_chart: "govern-workspace".to_string(),
        release_version: "1.2.3".to_string(),
        reservation_size: WorkspaceSize::Sm,
        reservation_tier: WorkspaceTier::Free,
        reservation_retry_secs: 300,
        scheduler_url: "http://scheduler.test".to_string(),
        vault_url: "http://vault.test".to_string(),
        vault_token: "test-token".to_string(),
        vault_mount: "secret".to_string(),
        kube_api_url: "http://kube.test".to_string(),
        kube_token: String::new(),
        http_timeout_secs: 5,
    }
}

/// A fresh SQLite-backed registry
pub async fn create_test_registry() -> Arc<SqliteRegistry> {
    Arc::new(SqliteRegistry::new(create_test_db().await))
}

/// Fixture: an unclaimed workspace in `reserving`
pub async fn fixture_reservation(registry: &SqliteRegistry) -> Workspace {
    registry
        .create(&NewWorkspace::reservation(
            WorkspaceTier::Free,
            WorkspaceSize::Sm,
        ))
        .await
        .expect("Failed to create fixture reservation")
}

pub fn claim_request(owner: &str, organization: Option<&str>) -> ClaimRequest {
    ClaimRequest {
        name: format!("{}'s workspace", owner),
        owner_id: owner.to_string(),
        organization_id: organization.map(|s| s.to_string()),
        tier: WorkspaceTier::Teams,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Apply(TransactionId),
    Rollback(TransactionId),
}

pub type Journal = Arc<Mutex<Vec<Call>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(journal: &Journal) -> Vec<Call> {
    journal.lock().unwrap().clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Wait,
    Fail,
}

/// A transaction that plays back `steps`, then keeps succeeding.
pub struct Scripted {
    id: TransactionId,
    requirements: Vec<TransactionId>,
    steps: Mutex<VecDeque<Step>>,
    rollback_fails: bool,
    journal: Journal,
}

impl Scripted {
    pub fn new(
        journal: &Journal,
        id: TransactionId,
        requirements: Vec<TransactionId>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            id,
            requirements,
            steps: Mutex::new(steps.into()),
            rollback_fails: false,
            journal: journal.clone(),
        }
    }

    pub fn with_failing_rollback(mut self) -> Self {
        self.rollback_fails = true;
        self
    }
}

#[async_trait]
impl Transaction for Scripted {
    fn requirements(&self) -> Vec<TransactionId> {
        self.requirements.clone()
    }

    async fn apply_idempotent(
        &self,
        _cancel: &CancellationToken,
        _workspace: &Workspace,
    ) -> Outcome {
        self.journal.lock().unwrap().push(Call::Apply(self.id));
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Outcome::Success,
            Step::Wait => Outcome::needs_time(format!("{} is warming up", self.id)),
            Step::Fail => Outcome::Failed(anyhow::anyhow!("{} exploded", self.id)),
        }
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        _workspace: &Workspace,
    ) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(Call::Rollback(self.id));
        if self.rollback_fails {
            anyhow::bail!("{} refused to roll back", self.id);
        }
        Ok(())
    }
}

/// Metrics sink that remembers workspace outcomes and created reservations.
#[derive(Default)]
pub struct RecordingMetrics {
    pub workspaces: Mutex<Vec<String>>,
    pub transactions: Mutex<Vec<(TransactionId, String)>>,
    pub reservations: Mutex<usize>,
}

impl RecordingMetrics {
    pub fn workspace_outcomes(&self, outcome: &str) -> usize {
        self.workspaces
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.as_str() == outcome)
            .count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_tick(&self, _outcome: &str) {}

    fn record_transaction(&self, transaction: TransactionId, outcome: &str) {
        self.transactions
            .lock()
            .unwrap()
            .push((transaction, outcome.to_string()));
    }

    fn record_rollback(&self, _transaction: TransactionId, _succeeded: bool) {}

    fn record_workspace(&self, outcome: &str) {
        self.workspaces.lock().unwrap().push(outcome.to_string());
    }

    fn record_reservation_created(&self) {
        *self.reservations.lock().unwrap() += 1;
    }
}
