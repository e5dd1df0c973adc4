//! Integration tests for the reservation pool
//!
//! The pool keeps exactly one unclaimed spare and hands it out on claim.

mod common;

use common::{
    claim_request, create_test_registry, fixture_reservation, test_config, RecordingMetrics,
};
use govern_orchestrator::{
    OrchestratorConfig, OrchestratorError, ReservationPool, SqliteRegistry, StateId,
    WorkspaceFilters, WorkspaceRegistry,
};
use std::sync::Arc;

fn pool(registry: &Arc<SqliteRegistry>, metrics: &Arc<RecordingMetrics>) -> ReservationPool {
    ReservationPool::new(&test_config(), registry.clone(), metrics.clone())
}

async fn unclaimed(registry: &SqliteRegistry) -> usize {
    registry
        .list(&WorkspaceFilters {
            unclaimed_only: true,
            ..Default::default()
        })
        .await
        .expect("Failed to list workspaces")
        .len()
}

#[tokio::test]
async fn test_empty_pool_gets_one_spare() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    let created = pool
        .ensure_reservation()
        .await
        .expect("Failed to ensure reservation")
        .expect("Expected a new spare");
    assert_eq!(created.status, StateId::Reserving);
    assert!(created.owner_id.is_none());

    // The spare is still reserving, which already counts
    assert!(pool.ensure_reservation().await.unwrap().is_none());
    assert!(pool.ensure_reservation().await.unwrap().is_none());

    assert_eq!(unclaimed(&registry).await, 1);
    assert_eq!(*metrics.reservations.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_claimed_spare_is_backfilled_once() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    let spare = pool.ensure_reservation().await.unwrap().unwrap();
    registry
        .update_status(&spare.id, StateId::Reserving, StateId::Reserved)
        .await
        .unwrap();
    assert!(pool.ensure_reservation().await.unwrap().is_none());

    let claimed = pool
        .claim(&claim_request("alice", Some("acme")))
        .await
        .expect("Failed to claim");
    assert_eq!(claimed.id, spare.id);
    assert_eq!(claimed.status, StateId::WaitingForCredential);
    assert_eq!(claimed.owner_id.as_deref(), Some("alice"));

    let replacement = pool.ensure_reservation().await.unwrap();
    assert!(replacement.is_some());
    assert!(pool.ensure_reservation().await.unwrap().is_none());
    assert_eq!(unclaimed(&registry).await, 1);
}

#[tokio::test]
async fn test_extra_spares_are_left_alone() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    // Two spares, as left behind by a race between two processes
    let first = fixture_reservation(&registry).await;
    let second = fixture_reservation(&registry).await;
    for spare in [&first, &second] {
        registry
            .update_status(&spare.id, StateId::Reserving, StateId::Reserved)
            .await
            .unwrap();
    }

    assert!(pool.ensure_reservation().await.unwrap().is_none());
    assert_eq!(unclaimed(&registry).await, 2);
}

#[tokio::test]
async fn test_claim_takes_oldest_spare() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    let first = fixture_reservation(&registry).await;
    let second = fixture_reservation(&registry).await;
    for spare in [&first, &second] {
        registry
            .update_status(&spare.id, StateId::Reserving, StateId::Reserved)
            .await
            .unwrap();
    }

    let alice = pool.claim(&claim_request("alice", None)).await.unwrap();
    let bob = pool.claim(&claim_request("bob", None)).await.unwrap();
    assert_eq!(alice.id, first.id);
    assert_eq!(bob.id, second.id);

    assert!(matches!(
        pool.claim(&claim_request("carol", None)).await,
        Err(OrchestratorError::NoReservation)
    ));
}

#[tokio::test]
async fn test_claim_without_ready_spare() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    assert!(matches!(
        pool.claim(&claim_request("alice", None)).await,
        Err(OrchestratorError::NoReservation)
    ));

    // A spare that is still reserving cannot be claimed yet
    pool.ensure_reservation().await.unwrap();
    assert!(matches!(
        pool.claim(&claim_request("alice", None)).await,
        Err(OrchestratorError::NoReservation)
    ));
}

#[tokio::test]
async fn test_claim_validates_request() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    let mut request = claim_request("alice", None);
    request.name = "   ".to_string();
    assert!(matches!(
        pool.claim(&request).await,
        Err(OrchestratorError::InvalidInput(_))
    ));

    let mut request = claim_request("alice", None);
    request.owner_id = String::new();
    assert!(matches!(
        pool.claim(&request).await,
        Err(OrchestratorError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_failed_spare_is_not_replaced_within_retry_window() {
    let registry = create_test_registry().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let pool = pool(&registry, &metrics);

    let spare = pool.ensure_reservation().await.unwrap().unwrap();
    registry
        .mark_failed(&spare.id, "CreateServiceAccountRoles failed: rejected: 403")
        .await
        .unwrap();

    for _ in 0..5 {
        assert!(pool.ensure_reservation().await.unwrap().is_none());
    }
    assert_eq!(*metrics.reservations.lock().unwrap(), 1);

    // Once the window has passed a replacement is reserved again
    let config = OrchestratorConfig {
        reservation_retry_secs: 0,
        ..test_config()
    };
    let impatient = ReservationPool::new(&config, registry.clone(), metrics.clone());
    let replacement = impatient.ensure_reservation().await.unwrap();
    assert!(replacement.is_some());
    assert_eq!(*metrics.reservations.lock().unwrap(), 2);
}
