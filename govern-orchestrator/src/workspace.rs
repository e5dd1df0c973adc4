use crate::state::StateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// A tenant environment tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// `None` while the workspace sits in the reservation pool
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    pub tier: WorkspaceTier,
    pub size: WorkspaceSize,
    pub status: StateId,
    /// Provider-unique handle; namespace, role and release names derive from it
    pub handle: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub bootstrap_input_finished: bool,
    /// Set once the workspace release object exists in the cluster
    pub is_created: bool,
    pub analytics_job_id: Option<i64>,

    pub error_message: Option<String>,
}

impl Workspace {
    pub fn is_claimed(&self) -> bool {
        self.owner_id.is_some()
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum WorkspaceTier {
    #[default]
    Free,
    Teams,
    Enterprise,
}

impl WorkspaceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceTier::Free => "free",
            WorkspaceTier::Teams => "teams",
            WorkspaceTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for WorkspaceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(WorkspaceTier::Free),
            "teams" => Ok(WorkspaceTier::Teams),
            "enterprise" => Ok(WorkspaceTier::Enterprise),
            other => Err(format!("unknown workspace tier: {}", other)),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum WorkspaceSize {
    Xs,
    #[default]
    Sm,
    Md,
    Lg,
}

impl WorkspaceSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceSize::Xs => "xs",
            WorkspaceSize::Sm => "sm",
            WorkspaceSize::Md => "md",
            WorkspaceSize::Lg => "lg",
        }
    }

    /// Replica count handed to the workspace release
    pub fn replicas(&self) -> u32 {
        match self {
            WorkspaceSize::Xs | WorkspaceSize::Sm => 1,
            WorkspaceSize::Md => 2,
            WorkspaceSize::Lg => 3,
        }
    }
}

impl fmt::Display for WorkspaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xs" => Ok(WorkspaceSize::Xs),
            "sm" => Ok(WorkspaceSize::Sm),
            "md" => Ok(WorkspaceSize::Md),
            "lg" => Ok(WorkspaceSize::Lg),
            other => Err(format!("unknown workspace size: {}", other)),
        }
    }
}

/// Row to insert for a brand-new workspace
#[derive(Debug, Clone)]
pub struct NewWorkspace {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    pub tier: WorkspaceTier,
    pub size: WorkspaceSize,
    pub status: StateId,
    pub handle: String,
}

impl NewWorkspace {
    /// An unowned workspace entering the reservation pipeline.
    pub fn reservation(tier: WorkspaceTier, size: WorkspaceSize) -> Self {
        let id = Uuid::new_v4();
        let short = id.simple().to_string();
        let handle = format!("ws-{}", &short[..12]);

        Self {
            id: id.to_string(),
            name: format!("reserved-{}", &short[..12]),
            owner_id: None,
            organization_id: None,
            tier,
            size,
            status: StateId::Reserving,
            handle,
        }
    }
}

/// What the signup flow writes onto a reserved workspace when it claims it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimRequest {
    pub name: String,
    pub owner_id: String,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub tier: WorkspaceTier,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilters {
    pub owner_id: Option<String>,
    /// Empty means any status
    pub statuses: Vec<StateId>,
    pub unclaimed_only: bool,
}

impl WorkspaceFilters {
    pub fn with_statuses(statuses: impl IntoIterator<Item = StateId>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Default::default()
        }
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
pub(crate) struct WorkspaceRow {
    id: String,
    name: String,
    owner_id: Option<String>,
    organization_id: Option<String>,
    tier: WorkspaceTier,
    size: WorkspaceSize,
    status: StateId,
    handle: String,
    created_at: i64,
    updated_at: i64,
    bootstrap_input_finished: bool,
    is_created: bool,
    analytics_job_id: Option<i64>,
    error_message: Option<String>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            organization_id: row.organization_id,
            tier: row.tier,
            size: row.size,
            status: row.status,
            handle: row.handle,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
            bootstrap_input_finished: row.bootstrap_input_finished,
            is_created: row.is_created,
            analytics_job_id: row.analytics_job_id,
            error_message: row.error_message,
        }
    }
}
