//! Task entity model and DTOs for the orchestration engine.

use reelgen_core::task::{StatusId, TaskStatus};
use reelgen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskRecord {
    pub id: DbId,
    pub owner_id: DbId,
    pub job_type: String,
    pub parameters: serde_json::Value,
    pub remote_job_id: Option<String>,
    pub status_id: StatusId,
    pub progress_percent: i16,
    pub progress_message: Option<String>,
    pub progress_updated_at: Option<Timestamp>,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    pub polling_attempts: i32,
    pub submitted_at: Timestamp,
    pub processing_started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub removed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TaskRecord {
    /// Decode the stored status id. `None` for ids outside the seed range.
    pub fn status(&self) -> Option<TaskStatus> {
        TaskStatus::from_id(self.status_id)
    }
}

/// Fields required to persist a freshly admitted task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner_id: DbId,
    pub job_type: String,
    pub parameters: serde_json::Value,
    /// Remote job id assigned at creation time, when the upstream create
    /// already succeeded.
    pub remote_job_id: Option<String>,
}

/// Partial update for a task row. Only `Some` fields are written, so
/// concurrent writers of unrelated fields are never clobbered.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status_id: Option<StatusId>,
    pub remote_job_id: Option<String>,
    pub progress_percent: Option<i16>,
    pub progress_message: Option<String>,
    pub progress_updated_at: Option<Timestamp>,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    pub polling_attempts: Option<i32>,
    pub processing_started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub removed_at: Option<Timestamp>,
}

impl TaskPatch {
    /// True when no field is set; such a patch is a no-op.
    pub fn is_empty(&self) -> bool {
        self.status_id.is_none()
            && self.remote_job_id.is_none()
            && self.progress_percent.is_none()
            && self.progress_message.is_none()
            && self.progress_updated_at.is_none()
            && self.video_url.is_none()
            && self.error_message.is_none()
            && self.polling_attempts.is_none()
            && self.processing_started_at.is_none()
            && self.completed_at.is_none()
            && self.removed_at.is_none()
    }
}

/// Row filter for [`TaskStore::query`](crate::store::TaskStore::query).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to a single owner.
    pub owner_id: Option<DbId>,
    /// Restrict to these statuses; empty means any status.
    pub statuses: Vec<TaskStatus>,
    /// Include soft-removed rows. Off by default.
    pub include_removed: bool,
}

impl TaskFilter {
    /// Non-terminal tasks for one owner -- the gate's quota query and
    /// recovery's restart query.
    pub fn active_for_owner(owner_id: DbId) -> Self {
        Self {
            owner_id: Some(owner_id),
            statuses: reelgen_core::task::ACTIVE_STATUSES.to_vec(),
            include_removed: false,
        }
    }
}
