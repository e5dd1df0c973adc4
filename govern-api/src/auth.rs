use crate::error::ApiError;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use govern_orchestrator::{Workspace, WorkspaceRegistry};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: Option<String>,
}

/// Auth middleware - extracts the caller from identity headers
///
/// An authenticating proxy in front of the service sets `x-forwarded-user`.
/// For local development the plain `x-user` header is accepted as well.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let username = req
        .headers()
        .get("x-forwarded-user")
        .or_else(|| req.headers().get("x-user"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let email = req
        .headers()
        .get("x-forwarded-email")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let username = username.ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut()
        .insert(AuthenticatedUser { username, email });

    Ok(next.run(req).await)
}

/// Fetch a workspace on behalf of the caller
///
/// Returns the workspace if the caller owns it, otherwise:
/// - ApiError::NotFound if the workspace doesn't exist
/// - ApiError::Forbidden if it exists but belongs to someone else or is
///   still an unclaimed spare
pub async fn check_workspace_owner(
    registry: &dyn WorkspaceRegistry,
    workspace_id: &str,
    user: &AuthenticatedUser,
) -> Result<Workspace, ApiError> {
    let workspace = registry.get(workspace_id).await?;

    if workspace.owner_id.as_deref() != Some(user.username.as_str()) {
        return Err(ApiError::Forbidden(format!(
            "Access denied: workspace {} is not owned by {}",
            workspace_id, user.username
        )));
    }

    Ok(workspace)
}
