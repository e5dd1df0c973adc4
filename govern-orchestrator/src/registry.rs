//! Workspace registry: the single source of truth for workspace status and
//! per-transaction completion records.
//!
//! Concurrent writers (the reconciler and the signup claim) are reconciled
//! here rather than with in-process locks: status moves are compare-and-set
//! on the status the writer last observed, and a claim only succeeds on a
//! still-unowned workspace.

use crate::error::{OrchestratorError, Result};
use crate::state::StateId;
use crate::transaction::TransactionId;
use crate::workspace::{ClaimRequest, NewWorkspace, Workspace, WorkspaceFilters, WorkspaceRow};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteQueryResult, SqlitePool};
use std::collections::HashSet;

#[async_trait]
pub trait WorkspaceRegistry: Send + Sync {
    async fn get(&self, id: &str) -> Result<Workspace>;

    /// Oldest first.
    async fn list(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>>;

    async fn create(&self, workspace: &NewWorkspace) -> Result<Workspace>;

    /// Move `id` from `expected` to `next`. Returns `false` without writing
    /// if the stored status is no longer `expected`.
    async fn update_status(&self, id: &str, expected: StateId, next: StateId) -> Result<bool>;

    /// Terminal failure with a human-readable cause.
    async fn mark_failed(&self, id: &str, cause: &str) -> Result<()>;

    /// Hand an unowned workspace in `expected` status to its owner and move it
    /// to `next`. Returns `false` if someone else claimed it first.
    async fn claim(
        &self,
        id: &str,
        claim: &ClaimRequest,
        expected: StateId,
        next: StateId,
    ) -> Result<bool>;

    async fn set_bootstrap_input_finished(&self, id: &str) -> Result<()>;

    async fn set_created(&self, id: &str, created: bool) -> Result<()>;

    async fn set_analytics_job_id(&self, id: &str, job_id: Option<i64>) -> Result<()>;

    async fn completed_transactions(&self, id: &str) -> Result<HashSet<TransactionId>>;

    async fn mark_completed(&self, id: &str, transaction: TransactionId) -> Result<()>;

    async fn clear_completed(&self, id: &str, transaction: TransactionId) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ensure_found(result: SqliteQueryResult, id: &str) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl WorkspaceRegistry for SqliteRegistry {
    async fn get(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        Ok(row.into())
    }

    async fn list(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>> {
        let mut query = "SELECT * FROM workspaces WHERE 1=1".to_string();

        if filters.owner_id.is_some() {
            query.push_str(" AND owner_id = ?");
        }
        if filters.unclaimed_only {
            query.push_str(" AND owner_id IS NULL");
        }
        if !filters.statuses.is_empty() {
            let placeholders = vec!["?"; filters.statuses.len()].join(", ");
            query.push_str(&format!(" AND status IN ({})", placeholders));
        }

        query.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut q = sqlx::query_as::<_, WorkspaceRow>(&query);

        if let Some(owner) = &filters.owner_id {
            q = q.bind(owner);
        }
        for status in &filters.statuses {
            q = q.bind(*status);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    async fn create(&self, workspace: &NewWorkspace) -> Result<Workspace> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, owner_id, organization_id, tier, size, status, handle, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(&workspace.owner_id)
        .bind(&workspace.organization_id)
        .bind(workspace.tier)
        .bind(workspace.size)
        .bind(workspace.status)
        .bind(&workspace.handle)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(&workspace.id).await
    }

    async fn update_status(&self, id: &str, expected: StateId, next: StateId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workspaces
             SET status = ?, updated_at = ?, error_message = NULL
             WHERE id = ? AND status = ?",
        )
        .bind(next)
        .bind(Utc::now().timestamp())
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: &str, cause: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workspaces SET status = ?, updated_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(StateId::Failed)
        .bind(Utc::now().timestamp())
        .bind(cause)
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_found(result, id)
    }

    async fn claim(
        &self,
        id: &str,
        claim: &ClaimRequest,
        expected: StateId,
        next: StateId,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workspaces
             SET owner_id = ?, organization_id = ?, name = ?, tier = ?, status = ?, updated_at = ?
             WHERE id = ? AND owner_id IS NULL AND status = ?",
        )
        .bind(&claim.owner_id)
        .bind(&claim.organization_id)
        .bind(&claim.name)
        .bind(claim.tier)
        .bind(next)
        .bind(Utc::now().timestamp())
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_bootstrap_input_finished(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workspaces SET bootstrap_input_finished = 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_found(result, id)
    }

    async fn set_created(&self, id: &str, created: bool) -> Result<()> {
        let result = sqlx::query("UPDATE workspaces SET is_created = ?, updated_at = ? WHERE id = ?")
            .bind(created)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        ensure_found(result, id)
    }

    async fn set_analytics_job_id(&self, id: &str, job_id: Option<i64>) -> Result<()> {
        let result =
            sqlx::query("UPDATE workspaces SET analytics_job_id = ?, updated_at = ? WHERE id = ?")
                .bind(job_id)
                .bind(Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await?;

        ensure_found(result, id)
    }

    async fn completed_transactions(&self, id: &str) -> Result<HashSet<TransactionId>> {
        let ids = sqlx::query_scalar::<_, TransactionId>(
            "SELECT transaction_id FROM workspace_transactions WHERE workspace_id = ?",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn mark_completed(&self, id: &str, transaction: TransactionId) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO workspace_transactions (workspace_id, transaction_id, completed_at)
             VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(transaction)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_completed(&self, id: &str, transaction: TransactionId) -> Result<()> {
        sqlx::query("DELETE FROM workspace_transactions WHERE workspace_id = ? AND transaction_id = ?")
            .bind(id)
            .bind(transaction)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
