//! Common test utilities and helpers for govern-api tests
//!
//! Builds the real application state over an in-memory database and
//! in-memory collaborators, and wraps request plumbing in a small client.

#![allow(dead_code)]

use axum::Router;
use govern_api::{build_state, create_app, AppState, Config};
use govern_orchestrator::clients::memory::MemoryClients;
use govern_orchestrator::test_utils::create_test_db;
use govern_orchestrator::workspace::NewWorkspace;
use govern_orchestrator::{
    ClaimRequest, OrchestratorConfig, PrometheusMetrics, StateId, Workspace, WorkspaceRegistry,
    WorkspaceTier,
};
use std::path::PathBuf;
use std::sync::Arc;

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        db_path: PathBuf::from(":memory:"),
        reconcile_interval_secs: 1,
        reconcile_concurrency: 2,
        orchestrator: OrchestratorConfig {
            account_id: "123456789012".to_string(),
            domain_suffix: "govern.test".to_string(),
            vault_token: "test-token".to_string(),
            ..OrchestratorConfig::default()
        },
    }
}

/// Application state wired to in-memory collaborators
pub async fn create_test_state() -> (AppState, MemoryClients) {
    let pool = create_test_db().await;
    let memory = MemoryClients::new();
    let metrics = Arc::new(PrometheusMetrics::new().expect("Failed to create metrics"));

    let state = build_state(&test_config(), pool, &memory.clients(), metrics)
        .expect("Failed to build application state");

    (state, memory)
}

/// Fixture: a spare that finished reserving and can be claimed
pub async fn fixture_reserved(state: &AppState) -> Workspace {
    let spare = state
        .registry
        .create(&NewWorkspace::reservation(
            WorkspaceTier::Free,
            Default::default(),
        ))
        .await
        .expect("Failed to create fixture reservation");

    state
        .registry
        .update_status(&spare.id, StateId::Reserving, StateId::Reserved)
        .await
        .expect("Failed to reserve fixture");

    state.registry.get(&spare.id).await.expect("Failed to reload fixture")
}

/// Fixture: a workspace claimed by `owner`
pub async fn fixture_claimed(state: &AppState, owner: &str) -> Workspace {
    fixture_reserved(state).await;

    state
        .reservations
        .claim(&ClaimRequest {
            name: format!("{}'s workspace", owner),
            owner_id: owner.to_string(),
            organization_id: Some("acme".to_string()),
            tier: WorkspaceTier::Teams,
        })
        .await
        .expect("Failed to claim fixture workspace")
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// Helper to extract a plain text body from axum response
pub async fn extract_text_body(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    String::from_utf8(body.to_vec()).expect("Body is not UTF-8")
}

/// Helper to create authenticated request headers
pub fn auth_headers(username: &str) -> Vec<(&'static str, &str)> {
    vec![("x-user", username)]
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub state: AppState,
    pub memory: MemoryClients,
}

impl TestClient {
    /// Create a new TestClient over a fresh in-memory database
    pub async fn new() -> Self {
        let (state, memory) = create_test_state().await;
        let app = create_app(state.clone());
        Self { app, state, memory }
    }

    /// Send a request to the API
    pub async fn send_request(
        &self,
        request: axum::http::Request<axum::body::Body>,
    ) -> axum::http::Response<axum::body::Body> {
        use tower::ServiceExt;
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        headers: Option<Vec<(&str, &str)>>,
    ) -> axum::http::Response<axum::body::Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");

        if let Some(h) = headers {
            for (k, v) in h {
                builder = builder.header(k, v);
            }
        }

        let request = builder.body(axum::body::Body::from(req_body)).unwrap();
        self.send_request(request).await
    }

    /// Get request to an endpoint
    pub async fn get(
        &self,
        uri: &str,
        headers: Option<Vec<(&str, &str)>>,
    ) -> axum::http::Response<axum::body::Body> {
        let mut builder = axum::http::Request::builder().method("GET").uri(uri);

        if let Some(h) = headers {
            for (k, v) in h {
                builder = builder.header(k, v);
            }
        }

        let request = builder.body(axum::body::Body::empty()).unwrap();
        self.send_request(request).await
    }
}
