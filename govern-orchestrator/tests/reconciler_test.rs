//! Integration tests for the reconciler loop
//!
//! Drives workspaces through the standard lifecycle against in-memory
//! collaborators, one tick at a time.

mod common;

use async_trait::async_trait;
use common::{
    calls, claim_request, create_test_registry, fixture_reservation, journal, test_config, Call,
    RecordingMetrics, Scripted,
};
use govern_orchestrator::clients::memory::{MemoryClients, MemoryKube};
use govern_orchestrator::{
    OrchestratorError, Outcome, Reconciler, ReconcilerSettings, ReservationPool, SqliteRegistry,
    State, StateCatalog, StateId, Transaction, TransactionId, TransactionRegistry, Workspace,
    WorkspaceFilters, WorkspaceRegistry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        interval: Duration::from_millis(10),
        concurrency: 4,
    }
}

fn standard_reconciler(
    registry: &Arc<SqliteRegistry>,
    memory: &MemoryClients,
    metrics: &Arc<RecordingMetrics>,
) -> Reconciler {
    let config = test_config();
    let transactions =
        TransactionRegistry::standard(&config, &memory.clients(), registry.clone()).unwrap();
    let pool = ReservationPool::new(&config, registry.clone(), metrics.clone());

    Reconciler::new(
        registry.clone(),
        Arc::new(StateCatalog::standard().unwrap()),
        Arc::new(transactions),
        pool,
        metrics.clone(),
        settings(),
    )
}

async fn status(registry: &SqliteRegistry, id: &str) -> StateId {
    registry.get(id).await.expect("Failed to get workspace").status
}

#[tokio::test]
async fn test_full_lifecycle() {
    let registry = create_test_registry().await;
    let memory = MemoryClients::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = standard_reconciler(&registry, &memory, &metrics);
    let cancel = CancellationToken::new();

    // Tick 1: nothing to reconcile, the pool creates a spare
    reconciler.tick(&cancel).await.expect("Tick failed");
    let spares = registry.list(&WorkspaceFilters::default()).await.unwrap();
    assert_eq!(spares.len(), 1);
    let spare = spares[0].clone();
    assert_eq!(spare.status, StateId::Reserving);

    // Tick 2: the spare's infrastructure is set up
    reconciler.tick(&cancel).await.unwrap();
    assert_eq!(status(&registry, &spare.id).await, StateId::Reserved);
    assert!(memory.kube.has_namespace(&spare.handle));
    assert_eq!(memory.iam.roles_created(), 4);
    assert!(registry.get(&spare.id).await.unwrap().is_created);

    // Signup claims it
    let pool = ReservationPool::new(&test_config(), registry.clone(), metrics.clone());
    pool.claim(&claim_request("alice", Some("acme")))
        .await
        .expect("Failed to claim");

    // Tick 3: no credential yet; a replacement spare appears
    reconciler.tick(&cancel).await.unwrap();
    assert_eq!(
        status(&registry, &spare.id).await,
        StateId::WaitingForCredential
    );
    assert_eq!(*metrics.reservations.lock().unwrap(), 2);

    memory.vault.insert(
        "organizations/acme/credentials",
        serde_json::json!({ "role_arn": "arn:aws:iam::999:role/govern" }),
    );

    // Tick 4: credential onboarded
    reconciler.tick(&cancel).await.unwrap();
    assert_eq!(status(&registry, &spare.id).await, StateId::Provisioning);

    // Tick 5: waiting for the bootstrap questionnaire
    reconciler.tick(&cancel).await.unwrap();
    assert_eq!(status(&registry, &spare.id).await, StateId::Provisioning);

    registry
        .set_bootstrap_input_finished(&spare.id)
        .await
        .unwrap();

    // Tick 6: discovery and analytics complete
    reconciler.tick(&cancel).await.unwrap();
    let workspace = registry.get(&spare.id).await.unwrap();
    assert_eq!(workspace.status, StateId::Provisioned);
    assert_eq!(workspace.analytics_job_id, Some(1));

    // Reserved infrastructure was not applied again while provisioning
    assert_eq!(memory.kube.namespaces_created(), 2);
    assert_eq!(memory.kube.releases_applied(), 2);
    assert_eq!(memory.scheduler.jobs_triggered(), 1);

    // Provisioned is not a processing status; further ticks leave it alone
    reconciler.tick(&cancel).await.unwrap();
    assert_eq!(status(&registry, &spare.id).await, StateId::Provisioned);
}

#[tokio::test]
async fn test_status_advances_exactly_once() {
    let registry = create_test_registry().await;
    let memory = MemoryClients::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = standard_reconciler(&registry, &memory, &metrics);
    let cancel = CancellationToken::new();

    let workspace = fixture_reservation(&registry).await;
    for _ in 0..3 {
        reconciler.tick(&cancel).await.unwrap();
    }

    assert_eq!(status(&registry, &workspace.id).await, StateId::Reserved);
    assert_eq!(metrics.workspace_outcomes("advanced"), 1);

    // The reserved fixture is the pool's spare, so nothing else was created
    assert_eq!(*metrics.reservations.lock().unwrap(), 0);
    assert_eq!(
        registry
            .list(&WorkspaceFilters::default())
            .await
            .unwrap()
            .len(),
        1
    );
}

/// Fails hard for one specific workspace, succeeds for everyone else.
struct FailsFor {
    workspace_id: String,
}

#[async_trait]
impl Transaction for FailsFor {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(
        &self,
        _cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> Outcome {
        if workspace.id == self.workspace_id {
            Outcome::Failed(anyhow::anyhow!("quota exceeded"))
        } else {
            Outcome::Success
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

/// Rejected for every workspace, like a misconfigured IAM policy.
struct AlwaysRejected;

#[async_trait]
impl Transaction for AlwaysRejected {
    fn requirements(&self) -> Vec<TransactionId> {
        Vec::new()
    }

    async fn apply_idempotent(
        &self,
        _cancel: &CancellationToken,
        _workspace: &Workspace,
    ) -> Outcome {
        Outcome::Failed(anyhow::anyhow!("access denied"))
    }

    async fn rollback_idempotent(
        &self,
        _cancel: &CancellationToken,
        _workspace: &Workspace,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_hard_failure_is_isolated_to_its_workspace() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let doomed = fixture_reservation(&registry).await;
    let healthy = fixture_reservation(&registry).await;

    let journal = journal();
    let mut transactions = TransactionRegistry::new();
    transactions
        .register(
            TransactionId::CreateNamespace,
            Arc::new(Scripted::new(
                &journal,
                TransactionId::CreateNamespace,
                vec![],
                vec![],
            )),
        )
        .unwrap();
    transactions
        .register(
            TransactionId::CreateHelmRelease,
            Arc::new(FailsFor {
                workspace_id: doomed.id.clone(),
            }),
        )
        .unwrap();

    let mut catalog = StateCatalog::new();
    catalog
        .register(State::new(
            StateId::Reserving,
            StateId::Reserved,
            [
                TransactionId::CreateNamespace,
                TransactionId::CreateHelmRelease,
            ],
        ))
        .unwrap();
    transactions.validate(&catalog).unwrap();

    let reconciler = Reconciler::new(
        registry.clone(),
        Arc::new(catalog),
        Arc::new(transactions),
        ReservationPool::new(&test_config(), registry.clone(), metrics.clone()),
        metrics.clone(),
        settings(),
    );

    reconciler
        .tick(&CancellationToken::new())
        .await
        .expect("A failed workspace must not abort the tick");

    let doomed = registry.get(&doomed.id).await.unwrap();
    assert_eq!(doomed.status, StateId::Failed);
    assert!(doomed
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("quota exceeded"));
    assert_eq!(status(&registry, &healthy.id).await, StateId::Reserved);

    assert_eq!(metrics.workspace_outcomes("failed"), 1);
    assert_eq!(metrics.workspace_outcomes("advanced"), 1);
    assert!(calls(&journal).contains(&Call::Rollback(TransactionId::CreateNamespace)));

    // Failed is terminal: the next tick does not touch it
    let before = calls(&journal).len();
    reconciler.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(status(&registry, &doomed.id).await, StateId::Failed);
    assert_eq!(calls(&journal).len(), before);
}

#[tokio::test]
async fn test_registry_failure_aborts_the_tick() {
    let registry = create_test_registry().await;
    let memory = MemoryClients::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = standard_reconciler(&registry, &memory, &metrics);

    fixture_reservation(&registry).await;
    registry.pool().close().await;

    match reconciler.tick(&CancellationToken::new()).await {
        Err(OrchestratorError::Database(_)) => {}
        other => panic!("Expected database error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_tick_does_no_work() {
    let registry = create_test_registry().await;
    let memory = MemoryClients::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = standard_reconciler(&registry, &memory, &metrics);
    let workspace = fixture_reservation(&registry).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    reconciler.tick(&cancel).await.unwrap();

    assert_eq!(status(&registry, &workspace.id).await, StateId::Reserving);
    assert_eq!(memory.kube.namespaces_created(), 0);
    assert_eq!(*metrics.reservations.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_run_stops_on_cancellation() {
    let registry = create_test_registry().await;
    let memory = MemoryClients::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = Arc::new(standard_reconciler(&registry, &memory, &metrics));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    // Let a few ticks run so the spare gets reserved
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let reserved = registry
                .list(&WorkspaceFilters::with_statuses([StateId::Reserved]))
                .await
                .unwrap();
            if !reserved.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Spare was never reserved");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Reconciler did not stop")
        .expect("Reconciler task panicked");
}

#[tokio::test]
async fn test_persistent_reservation_failure_does_not_churn_spares() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut transactions = TransactionRegistry::new();
    transactions
        .register(
            TransactionId::CreateServiceAccountRoles,
            Arc::new(AlwaysRejected),
        )
        .unwrap();
    let catalog = StateCatalog::from_states([State::new(
        StateId::Reserving,
        StateId::Reserved,
        [TransactionId::CreateServiceAccountRoles],
    )])
    .unwrap();

    let reconciler = Reconciler::new(
        registry.clone(),
        Arc::new(catalog),
        Arc::new(transactions),
        ReservationPool::new(&test_config(), registry.clone(), metrics.clone()),
        metrics.clone(),
        settings(),
    );

    let cancel = CancellationToken::new();
    for _ in 0..10 {
        reconciler.tick(&cancel).await.unwrap();
    }

    let workspaces = registry.list(&WorkspaceFilters::default()).await.unwrap();
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].status, StateId::Failed);
    assert_eq!(*metrics.reservations.lock().unwrap(), 1);
    assert_eq!(metrics.workspace_outcomes("failed"), 1);
}

#[tokio::test]
async fn test_cancellation_abandons_slow_external_call() {
    let registry = create_test_registry().await;
    let memory = MemoryClients {
        kube: Arc::new(MemoryKube::new().with_latency(Duration::from_secs(3))),
        ..MemoryClients::new()
    };
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = standard_reconciler(&registry, &memory, &metrics);
    let workspace = fixture_reservation(&registry).await;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        }
    });

    let started = Instant::now();
    reconciler.tick(&cancel).await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(1),
        "tick took {:?} after shutdown was requested",
        elapsed
    );
    assert_eq!(status(&registry, &workspace.id).await, StateId::Reserving);
    assert_eq!(memory.kube.namespaces_created(), 0);
    assert_eq!(*metrics.reservations.lock().unwrap(), 0);

    // The abandoned call left no completion record behind
    let completed = registry.completed_transactions(&workspace.id).await.unwrap();
    assert!(!completed.contains(&TransactionId::CreateNamespace));
}
