//! The narrow persistence contract consumed by the orchestration engine.
//!
//! The engine never touches sqlx directly; it holds an
//! `Arc<dyn TaskStore>` so production runs against Postgres
//! ([`PgTaskStore`]) while tests run against an in-memory implementation.

use async_trait::async_trait;
use reelgen_core::types::DbId;

use crate::models::task::{NewTask, TaskFilter, TaskPatch, TaskRecord};
use crate::repositories::TaskRepo;

/// Errors surfaced by a task store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row exists for the given task id.
    #[error("Task {0} not found")]
    NotFound(DbId),

    /// The underlying database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Row-oriented CRUD over persisted tasks.
///
/// `update` applies partial patches (only supplied fields), so concurrent
/// writers of unrelated fields never clobber each other.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError>;
    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), StoreError>;
    async fn get_by_id(&self, id: DbId) -> Result<Option<TaskRecord>, StoreError>;
    async fn query(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;
}

/// Postgres-backed [`TaskStore`] delegating to [`TaskRepo`].
pub struct PgTaskStore {
    pool: sqlx::PgPool,
}

impl PgTaskStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        Ok(TaskRepo::insert(&self.pool, &task).await?)
    }

    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), StoreError> {
        Ok(TaskRepo::update(&self.pool, id, &patch).await?)
    }

    async fn get_by_id(&self, id: DbId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(TaskRepo::find_by_id(&self.pool, id).await?)
    }

    async fn query(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(TaskRepo::query(&self.pool, &filter).await?)
    }
}
