//! Restart recovery: reconstruct in-flight state from the task store.
//!
//! Runs once per session start (or re-entry). Re-entrant calls
//! short-circuit while a recovery is in progress, returning an empty
//! report instead of double-processing. A failure recovering one task is
//! recorded and does not abort the rest -- partial recovery is strictly
//! better than none.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use reelgen_core::config::RecoveryConfig;
use reelgen_core::progress::{self, LABEL_COMPLETED, LABEL_FAILED};
use reelgen_core::task::TaskStatus;
use reelgen_core::types::{DbId, Timestamp};
use reelgen_db::models::task::{TaskFilter, TaskPatch, TaskRecord};
use reelgen_db::store::TaskStore;
use reelgen_remote::client::{RemoteClientError, RemoteJobClient, RemoteJobStatus};

use crate::manager::{ActiveTask, TaskManager};

/// Outcome of one recovery run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Tasks re-registered with the task manager.
    pub restored_count: usize,
    /// Tasks whose remote tracking was successfully re-attached.
    pub resumed_polling_count: usize,
    /// Per-task failures; recovery of the remaining tasks continued.
    pub errors: Vec<String>,
    /// Ids of the re-registered tasks.
    pub restored_ids: Vec<DbId>,
}

/// What happened to one row during recovery.
enum RowOutcome {
    /// Re-registered and re-attached; polling should resume.
    Resumed,
    /// Left untouched (e.g. still inside the grace window).
    Skipped,
    /// Resolved to a terminal state; nothing to resume.
    Resolved,
}

/// Rebuilds the active set from persisted rows after a restart.
pub struct RecoveryService {
    store: Arc<dyn TaskStore>,
    client: Arc<dyn RemoteJobClient>,
    manager: Arc<TaskManager>,
    config: RecoveryConfig,
    in_progress: AtomicBool,
}

impl RecoveryService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        client: Arc<dyn RemoteJobClient>,
        manager: Arc<TaskManager>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            client,
            manager,
            config,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Recover all of an owner's non-terminal tasks.
    ///
    /// Safe to call concurrently with itself: the second caller gets an
    /// empty report while the first is still running.
    pub async fn recover(&self, owner_id: DbId) -> RecoveryReport {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(owner_id, "Recovery already in progress, skipping");
            return RecoveryReport::default();
        }

        let report = self.run(owner_id).await;
        self.in_progress.store(false, Ordering::SeqCst);

        tracing::info!(
            owner_id,
            restored = report.restored_count,
            resumed_polling = report.resumed_polling_count,
            errors = report.errors.len(),
            "Recovery finished",
        );
        report
    }

    async fn run(&self, owner_id: DbId) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        let rows = match self
            .store
            .query(TaskFilter::active_for_owner(owner_id))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                report.errors.push(format!("querying task store: {e}"));
                return report;
            }
        };

        tracing::info!(owner_id, count = rows.len(), "Recovering in-flight tasks");
        let now = Utc::now();

        for row in rows {
            match self.recover_row(&row, now).await {
                Ok(RowOutcome::Resumed) => {
                    report.restored_ids.push(row.id);
                    report.restored_count += 1;
                    report.resumed_polling_count += 1;
                }
                Ok(RowOutcome::Skipped | RowOutcome::Resolved) => {}
                Err(msg) => report.errors.push(format!("task {}: {msg}", row.id)),
            }
        }

        report
    }

    /// Recover a single row. Errors leave the row untouched for a later
    /// recovery pass.
    async fn recover_row(&self, row: &TaskRecord, now: Timestamp) -> Result<RowOutcome, String> {
        let status = row
            .status()
            .ok_or_else(|| format!("invalid status id {}", row.status_id))?;

        let Some(remote_job_id) = row.remote_job_id.clone() else {
            return self.resolve_missing_remote_id(row, now).await;
        };

        // Re-fetch the remote status directly -- the job may have
        // completed or failed while the client was offline.
        match self.client.poll(&remote_job_id).await {
            Ok(RemoteJobStatus::Done { result_url }) => {
                // Terminal while offline: persist and skip, no false resume.
                let patch = TaskPatch {
                    status_id: Some(TaskStatus::Completed.id()),
                    progress_percent: Some(100),
                    progress_message: Some(LABEL_COMPLETED.to_string()),
                    progress_updated_at: Some(now),
                    video_url: Some(result_url),
                    completed_at: Some(now),
                    ..Default::default()
                };
                self.persist(row.id, patch).await?;
                tracing::info!(task_id = row.id, "Task completed while offline");
                Ok(RowOutcome::Resolved)
            }

            Ok(RemoteJobStatus::Failed { reason }) => {
                self.persist_failure(row.id, &reason, now).await?;
                tracing::info!(task_id = row.id, "Task failed while offline");
                Ok(RowOutcome::Resolved)
            }

            Err(RemoteClientError::JobNotFound(_)) => {
                self.persist_failure(row.id, "Remote job no longer exists upstream", now)
                    .await?;
                Ok(RowOutcome::Resolved)
            }

            // Transient: leave the row for a later recovery pass.
            Err(e) => Err(e.to_string()),

            Ok(remote_status @ (RemoteJobStatus::Queued | RemoteJobStatus::Running { .. })) => {
                let resumed = self
                    .client
                    .resume(&remote_job_id, row.id)
                    .await
                    .map_err(|e| e.to_string())?;
                if !resumed {
                    self.persist_failure(row.id, "Remote job no longer exists upstream", now)
                        .await?;
                    return Ok(RowOutcome::Resolved);
                }

                // Forward-only status mapping, as in the scheduler.
                let mapped = if matches!(remote_status, RemoteJobStatus::Running { .. })
                    || status == TaskStatus::Processing
                {
                    TaskStatus::Processing
                } else {
                    TaskStatus::Pending
                };
                let processing_started_at = match mapped {
                    TaskStatus::Processing => Some(row.processing_started_at.unwrap_or(now)),
                    _ => row.processing_started_at,
                };

                // Seed the estimate: a fresh persisted snapshot acts as a
                // floor, a stale one is recomputed from elapsed time.
                let mut task = ActiveTask::from_record(row)
                    .ok_or_else(|| format!("invalid status id {}", row.status_id))?;
                task.status = mapped;
                task.processing_started_at = processing_started_at;
                let est =
                    progress::estimate(&task.progress_inputs(), self.config.freshness_window, now);
                task.percent = est.percent;
                task.status_text = est.label.clone();
                task.progress_updated_at = Some(now);

                let patch = TaskPatch {
                    status_id: (mapped != status).then(|| mapped.id()),
                    progress_percent: Some(est.percent),
                    progress_message: Some(est.label),
                    progress_updated_at: Some(now),
                    processing_started_at: (row.processing_started_at.is_none()
                        && mapped == TaskStatus::Processing)
                        .then_some(now),
                    ..Default::default()
                };
                self.persist(row.id, patch).await?;
                self.manager.register(task);

                tracing::info!(
                    task_id = row.id,
                    %remote_job_id,
                    status = mapped.as_str(),
                    "Task re-registered for polling",
                );
                Ok(RowOutcome::Resumed)
            }
        }
    }

    /// Resolve a row that never received a remote job id.
    ///
    /// Past the grace window this is a stuck submission (e.g. the client
    /// crashed mid-creation) and is failed; inside the window it is left
    /// alone for a later pass.
    async fn resolve_missing_remote_id(
        &self,
        row: &TaskRecord,
        now: Timestamp,
    ) -> Result<RowOutcome, String> {
        let started = row.processing_started_at.unwrap_or(row.submitted_at);
        let age_secs = now.signed_duration_since(started).num_seconds();

        if age_secs > self.config.grace_window.as_secs() as i64 {
            tracing::warn!(
                task_id = row.id,
                age_secs,
                "Failing task stuck without a remote job id",
            );
            self.persist_failure(
                row.id,
                "Submission never completed: no remote job id within the grace window",
                now,
            )
            .await?;
            return Ok(RowOutcome::Resolved);
        }

        Ok(RowOutcome::Skipped)
    }

    async fn persist_failure(
        &self,
        id: DbId,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), String> {
        let patch = TaskPatch {
            status_id: Some(TaskStatus::Failed.id()),
            progress_message: Some(LABEL_FAILED.to_string()),
            progress_updated_at: Some(now),
            error_message: Some(reason.to_string()),
            completed_at: Some(now),
            ..Default::default()
        };
        self.persist(id, patch).await
    }

    async fn persist(&self, id: DbId, patch: TaskPatch) -> Result<(), String> {
        self.store
            .update(id, patch)
            .await
            .map_err(|e| format!("persisting update: {e}"))
    }
}
