use crate::routes::workspaces::{ClaimWorkspaceRequest, WorkspaceView};
use govern_orchestrator::{StateId, WorkspaceSize, WorkspaceTier};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::health::metrics,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::claim_workspace,
        crate::routes::workspaces::finish_bootstrap_input,
    ),
    components(
        schemas(
            WorkspaceView,
            ClaimWorkspaceRequest,
            StateId,
            WorkspaceSize,
            WorkspaceTier
        )
    ),
    tags(
        (name = "health", description = "Liveness, readiness and metrics"),
        (name = "workspaces", description = "Workspace claim and lifecycle progress")
    )
)]
pub struct ApiDoc;
