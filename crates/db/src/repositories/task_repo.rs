//! Repository for the `tasks` table.
//!
//! Uses `TaskStatus` from `reelgen_core` for all status literals and
//! builds partial updates dynamically so only supplied fields are written.

use sqlx::PgPool;

use reelgen_core::task::{StatusId, TaskStatus};
use reelgen_core::types::DbId;

use crate::models::task::{NewTask, TaskFilter, TaskPatch, TaskRecord};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, owner_id, job_type, parameters, remote_job_id, status_id, \
    progress_percent, progress_message, progress_updated_at, \
    video_url, error_message, polling_attempts, \
    submitted_at, processing_started_at, completed_at, removed_at, \
    created_at, updated_at";

/// Provides CRUD operations for orchestrated tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Persist a freshly admitted task in `Pending` status.
    pub async fn insert(pool: &PgPool, input: &NewTask) -> Result<TaskRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (owner_id, job_type, parameters, remote_job_id, status_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRecord>(&query)
            .bind(input.owner_id)
            .bind(&input.job_type)
            .bind(&input.parameters)
            .bind(&input.remote_job_id)
            .bind(TaskStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Apply a partial update. Only the patch's `Some` fields are written;
    /// `updated_at` is always refreshed. An empty patch is a no-op.
    pub async fn update(pool: &PgPool, id: DbId, patch: &TaskPatch) -> Result<(), sqlx::Error> {
        if patch.is_empty() {
            return Ok(());
        }

        // Build the SET clause and track the next bind parameter index.
        // The bind order below must match the field order here exactly.
        let mut sets: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 2; // $1 is the row id

        let mut push = |sets: &mut Vec<String>, column: &str| {
            sets.push(format!("{column} = ${bind_idx}"));
            bind_idx += 1;
        };

        if patch.status_id.is_some() {
            push(&mut sets, "status_id");
        }
        if patch.remote_job_id.is_some() {
            push(&mut sets, "remote_job_id");
        }
        if patch.progress_percent.is_some() {
            push(&mut sets, "progress_percent");
        }
        if patch.progress_message.is_some() {
            push(&mut sets, "progress_message");
        }
        if patch.progress_updated_at.is_some() {
            push(&mut sets, "progress_updated_at");
        }
        if patch.video_url.is_some() {
            push(&mut sets, "video_url");
        }
        if patch.error_message.is_some() {
            push(&mut sets, "error_message");
        }
        if patch.polling_attempts.is_some() {
            push(&mut sets, "polling_attempts");
        }
        if patch.processing_started_at.is_some() {
            push(&mut sets, "processing_started_at");
        }
        if patch.completed_at.is_some() {
            push(&mut sets, "completed_at");
        }
        if patch.removed_at.is_some() {
            push(&mut sets, "removed_at");
        }
        sets.push("updated_at = NOW()".to_string());

        let query = format!("UPDATE tasks SET {} WHERE id = $1", sets.join(", "));

        let mut q = sqlx::query(&query).bind(id);
        if let Some(v) = patch.status_id {
            q = q.bind(v);
        }
        if let Some(v) = &patch.remote_job_id {
            q = q.bind(v);
        }
        if let Some(v) = patch.progress_percent {
            q = q.bind(v);
        }
        if let Some(v) = &patch.progress_message {
            q = q.bind(v);
        }
        if let Some(v) = patch.progress_updated_at {
            q = q.bind(v);
        }
        if let Some(v) = &patch.video_url {
            q = q.bind(v);
        }
        if let Some(v) = &patch.error_message {
            q = q.bind(v);
        }
        if let Some(v) = patch.polling_attempts {
            q = q.bind(v);
        }
        if let Some(v) = patch.processing_started_at {
            q = q.bind(v);
        }
        if let Some(v) = patch.completed_at {
            q = q.bind(v);
        }
        if let Some(v) = patch.removed_at {
            q = q.bind(v);
        }

        q.execute(pool).await?;
        Ok(())
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<TaskRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List tasks matching the filter, oldest submission first.
    pub async fn query(pool: &PgPool, filter: &TaskFilter) -> Result<Vec<TaskRecord>, sqlx::Error> {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if !filter.include_removed {
            conditions.push("removed_at IS NULL".to_string());
        }
        if filter.owner_id.is_some() {
            conditions.push(format!("owner_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if !filter.statuses.is_empty() {
            conditions.push(format!("status_id = ANY(${bind_idx})"));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM tasks {where_clause} ORDER BY submitted_at ASC"
        );

        let mut q = sqlx::query_as::<_, TaskRecord>(&query);
        if let Some(owner_id) = filter.owner_id {
            q = q.bind(owner_id);
        }
        if !filter.statuses.is_empty() {
            let ids: Vec<StatusId> = filter.statuses.iter().map(|s| s.id()).collect();
            q = q.bind(ids);
        }

        q.fetch_all(pool).await
    }
}
