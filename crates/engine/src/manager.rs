//! Authoritative in-memory view of the session's active tasks.
//!
//! The manager owns liveness, not history: it decides what the scheduler
//! polls, while the task store keeps the durable record. Deregistering a
//! task is the engine's cancellation primitive.

use std::collections::HashMap;
use std::sync::RwLock;

use reelgen_core::progress::{ProgressInputs, ProgressSnapshot};
use reelgen_core::task::TaskStatus;
use reelgen_core::types::{DbId, Timestamp};
use reelgen_db::models::task::TaskRecord;

/// Volatile, in-memory state for one active task.
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub id: DbId,
    pub owner_id: DbId,
    pub remote_job_id: Option<String>,
    pub status: TaskStatus,
    pub submitted_at: Timestamp,
    pub processing_started_at: Option<Timestamp>,
    /// Last known percentage (0-100); non-decreasing while active.
    pub percent: i16,
    /// Last known phase label.
    pub status_text: String,
    /// When `percent`/`status_text` were last refreshed.
    pub progress_updated_at: Option<Timestamp>,
    /// Remote status queries that failed back-to-back for this task.
    pub consecutive_poll_failures: u32,
    /// Total remote status queries issued for this task.
    pub polling_attempts: i32,
}

impl ActiveTask {
    /// Build the in-memory view from a persisted row.
    ///
    /// Returns `None` when the row carries a status id outside the seed
    /// range (a corrupt row must not enter the active set).
    pub fn from_record(record: &TaskRecord) -> Option<Self> {
        Some(Self {
            id: record.id,
            owner_id: record.owner_id,
            remote_job_id: record.remote_job_id.clone(),
            status: record.status()?,
            submitted_at: record.submitted_at,
            processing_started_at: record.processing_started_at,
            percent: record.progress_percent,
            status_text: record.progress_message.clone().unwrap_or_default(),
            progress_updated_at: record.progress_updated_at,
            consecutive_poll_failures: 0,
            polling_attempts: record.polling_attempts,
        })
    }

    /// Estimator inputs for this task. The current in-memory reading acts
    /// as the snapshot floor, so progress never moves backwards within a
    /// session.
    pub fn progress_inputs(&self) -> ProgressInputs {
        ProgressInputs {
            status: self.status,
            submitted_at: self.submitted_at,
            processing_started_at: self.processing_started_at,
            snapshot: self.progress_updated_at.map(|recorded_at| ProgressSnapshot {
                percent: self.percent,
                message: Some(self.status_text.clone()),
                recorded_at,
            }),
        }
    }
}

/// Registry of tasks the scheduler should currently poll.
///
/// Single-writer discipline: only the engine's own control flow mutates
/// the set, while `list`/`get` may be called concurrently from any number
/// of external readers.
#[derive(Default)]
pub struct TaskManager {
    tasks: RwLock<HashMap<DbId, ActiveTask>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for polling.
    ///
    /// Registering an id that already exists replaces the entry's volatile
    /// fields but never creates a duplicate, and keeps the existing poll
    /// counters.
    pub fn register(&self, task: ActiveTask) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                existing.status = task.status;
                existing.remote_job_id = task.remote_job_id;
                existing.processing_started_at = task.processing_started_at;
                existing.percent = existing.percent.max(task.percent);
                existing.status_text = task.status_text;
                existing.progress_updated_at = task.progress_updated_at;
            }
            None => {
                tasks.insert(task.id, task);
            }
        }
    }

    /// Remove a task from the active set. Returns whether it was present.
    pub fn deregister(&self, id: DbId) -> bool {
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    /// Owned copy of one task's current state.
    pub fn get(&self, id: DbId) -> Option<ActiveTask> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Stable snapshot of the active set, ordered by task id.
    ///
    /// The scheduler iterates this copy, so concurrent registrations never
    /// expose a half-updated structure; a task registered mid-tick is
    /// picked up on the next tick.
    pub fn list(&self) -> Vec<ActiveTask> {
        let mut tasks: Vec<ActiveTask> = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record one remote status query against a task.
    pub fn note_poll_attempt(&self, id: DbId) -> Option<i32> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let task = tasks.get_mut(&id)?;
        task.polling_attempts += 1;
        Some(task.polling_attempts)
    }

    /// Increment and return a task's consecutive failure count.
    pub fn record_poll_failure(&self, id: DbId) -> Option<u32> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let task = tasks.get_mut(&id)?;
        task.consecutive_poll_failures += 1;
        Some(task.consecutive_poll_failures)
    }

    /// Reset a task's consecutive failure count after a successful poll.
    pub fn clear_poll_failures(&self, id: DbId) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(&id) {
            task.consecutive_poll_failures = 0;
        }
    }

    /// Apply a mapped poll result to a task's volatile fields.
    ///
    /// `percent` is clamped forward against the stored value to keep
    /// progress monotonic.
    pub fn apply_progress(
        &self,
        id: DbId,
        status: TaskStatus,
        percent: i16,
        status_text: &str,
        processing_started_at: Option<Timestamp>,
        now: Timestamp,
    ) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(&id) {
            task.status = status;
            task.percent = task.percent.max(percent);
            task.status_text = status_text.to_string();
            task.progress_updated_at = Some(now);
            if task.processing_started_at.is_none() {
                task.processing_started_at = processing_started_at;
            }
        }
    }
}
