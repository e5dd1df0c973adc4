use crate::{
    auth::{check_workspace_owner, AuthenticatedUser},
    error::ApiResult,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use govern_orchestrator::{
    ClaimRequest, StateId, Workspace, WorkspaceFilters, WorkspaceRegistry, WorkspaceSize,
    WorkspaceTier,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workspaces", get(list_workspaces))
        .route("/api/v1/workspaces/claim", post(claim_workspace))
        .route("/api/v1/workspaces/{id}", get(get_workspace))
        .route(
            "/api/v1/workspaces/{id}/bootstrap-finished",
            post(finish_bootstrap_input),
        )
}

/// Body of a claim; the owner is always the authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimWorkspaceRequest {
    pub name: String,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub tier: WorkspaceTier,
}

/// A workspace as its owner sees it, with lifecycle progress.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceView {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    pub tier: WorkspaceTier,
    pub size: WorkspaceSize,
    pub status: StateId,
    pub handle: String,
    pub bootstrap_input_finished: bool,
    /// Transactions of the current phase already applied
    pub completed_transactions: usize,
    /// Transactions the current phase needs; absent outside processing statuses
    pub required_transactions: Option<usize>,
    /// Only present once the workspace has failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceView {
    fn new(workspace: Workspace, completed: usize, required: Option<usize>) -> Self {
        let error = match workspace.status {
            StateId::Failed => workspace.error_message,
            _ => None,
        };

        Self {
            id: workspace.id,
            name: workspace.name,
            owner_id: workspace.owner_id,
            organization_id: workspace.organization_id,
            tier: workspace.tier,
            size: workspace.size,
            status: workspace.status,
            handle: workspace.handle,
            bootstrap_input_finished: workspace.bootstrap_input_finished,
            completed_transactions: completed,
            required_transactions: required,
            error,
            created_at: workspace.created_at,
            updated_at: workspace.updated_at,
        }
    }
}

async fn view(state: &AppState, workspace: Workspace) -> ApiResult<WorkspaceView> {
    let records = state.registry.completed_transactions(&workspace.id).await?;

    if !state.catalog.is_processing(workspace.status) {
        let completed = records.len();
        return Ok(WorkspaceView::new(workspace, completed, None));
    }

    let phase = state.catalog.get_state(workspace.status)?;
    let order = state.transactions.resolve(phase.requirements())?;
    let completed = order.iter().filter(|id| records.contains(id)).count();

    Ok(WorkspaceView::new(workspace, completed, Some(order.len())))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    tag = "workspaces",
    responses(
        (status = 200, description = "Workspaces owned by the caller", body = [WorkspaceView]),
        (status = 401, description = "Missing caller identity")
    )
)]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<WorkspaceView>>> {
    let filters = WorkspaceFilters {
        owner_id: Some(user.username),
        ..Default::default()
    };

    let workspaces = state.registry.list(&filters).await?;

    let mut views = Vec::with_capacity(workspaces.len());
    for workspace in workspaces {
        views.push(view(&state, workspace).await?);
    }

    Ok(Json(views))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace with progress", body = WorkspaceView),
        (status = 403, description = "Workspace belongs to someone else"),
        (status = 404, description = "Workspace not found")
    )
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceView>> {
    let workspace = check_workspace_owner(state.registry.as_ref(), &id, &user).await?;

    Ok(Json(view(&state, workspace).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/claim",
    tag = "workspaces",
    request_body = ClaimWorkspaceRequest,
    responses(
        (status = 201, description = "Reserved workspace claimed", body = WorkspaceView),
        (status = 400, description = "Invalid claim"),
        (status = 409, description = "No reserved workspace is available yet")
    )
)]
pub async fn claim_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ClaimWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<WorkspaceView>)> {
    let request = ClaimRequest {
        name: req.name,
        owner_id: user.username,
        organization_id: req.organization_id,
        tier: req.tier,
    };

    let workspace = state.reservations.claim(&request).await?;

    Ok((StatusCode::CREATED, Json(view(&state, workspace).await?)))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/bootstrap-finished",
    tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Bootstrap questionnaire recorded", body = WorkspaceView),
        (status = 403, description = "Workspace belongs to someone else"),
        (status = 404, description = "Workspace not found")
    )
)]
pub async fn finish_bootstrap_input(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceView>> {
    check_workspace_owner(state.registry.as_ref(), &id, &user).await?;

    state.registry.set_bootstrap_input_finished(&id).await?;
    let workspace = state.registry.get(&id).await?;

    Ok(Json(view(&state, workspace).await?))
}
