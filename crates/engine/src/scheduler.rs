//! The polling loop reconciling local task state against the remote API.
//!
//! A single timer loop per engine: each tick snapshots the active set,
//! queries the remote job status for every task with bounded concurrency,
//! then applies the results sequentially so writes to the task store never
//! interleave. The loop exits when the active set drains (idle) and is
//! respawned on demand by [`TaskEngine`](crate::engine::TaskEngine).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use reelgen_core::config::{PollProfile, PollingConfig};
use reelgen_core::progress::{self, LABEL_COMPLETED, LABEL_FAILED};
use reelgen_core::task::TaskStatus;
use reelgen_core::types::{DbId, Timestamp};
use reelgen_db::models::task::TaskPatch;
use reelgen_db::store::TaskStore;
use reelgen_remote::client::{RemoteClientError, RemoteJobClient, RemoteJobStatus};

use crate::broadcaster::ProgressBroadcaster;
use crate::events::ProgressUpdate;
use crate::manager::{ActiveTask, TaskManager};

/// Shared slot holding the currently running loop's handle.
///
/// The loop clears the slot under its lock when it decides to stop, so
/// `ensure_polling` can never observe a live handle for a loop that has
/// already committed to exiting.
pub(crate) type LoopSlot = Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>;

/// Everything one scheduler loop needs, cloned out of the engine.
pub(crate) struct SchedulerContext {
    pub store: Arc<dyn TaskStore>,
    pub client: Arc<dyn RemoteJobClient>,
    pub manager: Arc<TaskManager>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub polling: PollingConfig,
    pub freshness_window: Duration,
    pub profile: Arc<RwLock<PollProfile>>,
}

/// Run the polling loop until cancelled or idle.
pub(crate) async fn run(ctx: SchedulerContext, cancel: CancellationToken, slot: LoopSlot) {
    tracing::info!("Polling scheduler started");

    loop {
        if ctx.manager.is_empty() {
            let mut guard = slot.lock().await;
            // Re-check under the lock: a task registered between the
            // first check and here keeps the loop alive.
            if ctx.manager.is_empty() {
                *guard = None;
                tracing::info!("No active tasks remain, polling scheduler idle");
                return;
            }
        }

        let interval = {
            let profile = *ctx.profile.read().unwrap_or_else(|e| e.into_inner());
            ctx.polling.interval_for(profile)
        };

        let Some(interval) = interval else {
            // Hidden: never poll while the client is not visible. Re-check
            // the profile at the background cadence.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(ctx.polling.background_interval) => {}
            }
            continue;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        tick(&ctx).await;
    }

    let mut guard = slot.lock().await;
    *guard = None;
    tracing::info!("Polling scheduler shut down");
}

/// One tick: poll every active task, then apply results in order.
async fn tick(ctx: &SchedulerContext) {
    let snapshot = ctx.manager.list();
    let mut results: Vec<(DbId, Result<RemoteJobStatus, RemoteClientError>)> =
        Vec::with_capacity(snapshot.len());

    for chunk in snapshot.chunks(ctx.polling.max_concurrent_polls.max(1)) {
        let mut polls = JoinSet::new();
        for task in chunk {
            let Some(remote_job_id) = task.remote_job_id.clone() else {
                // Rows without a remote job id are recovery's concern.
                tracing::debug!(task_id = task.id, "Skipping poll: no remote job id");
                continue;
            };
            let client = Arc::clone(&ctx.client);
            let id = task.id;
            polls.spawn(async move { (id, client.poll(&remote_job_id).await) });
        }
        while let Some(joined) = polls.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => tracing::error!(error = %e, "Poll task panicked"),
            }
        }
    }

    for (id, result) in results {
        apply_poll_result(ctx, id, result, Utc::now()).await;
    }
}

/// Apply one poll outcome to the task's in-memory and persisted state.
async fn apply_poll_result(
    ctx: &SchedulerContext,
    id: DbId,
    result: Result<RemoteJobStatus, RemoteClientError>,
    now: Timestamp,
) {
    // Deregistered while the query was in flight: discard the result.
    let Some(task) = ctx.manager.get(id) else {
        return;
    };
    let attempts = ctx
        .manager
        .note_poll_attempt(id)
        .unwrap_or(task.polling_attempts + 1);

    match result {
        Ok(status) => {
            ctx.manager.clear_poll_failures(id);
            apply_remote_status(ctx, &task, status, attempts, now).await;
        }
        Err(RemoteClientError::JobNotFound(remote_job_id)) => {
            // Not transient: the job expired upstream and will never
            // report completion.
            tracing::warn!(task_id = id, %remote_job_id, "Remote job vanished upstream");
            fail_task(
                ctx,
                &task,
                "Remote job no longer exists upstream".to_string(),
                attempts,
                now,
            )
            .await;
        }
        Err(e) => {
            let failures = ctx.manager.record_poll_failure(id).unwrap_or(0);
            tracing::warn!(
                task_id = id,
                error = %e,
                consecutive_failures = failures,
                "Remote status query failed",
            );
            if failures > ctx.polling.max_consecutive_poll_failures {
                fail_task(
                    ctx,
                    &task,
                    format!("Remote status checks failed {failures} times in a row: {e}"),
                    attempts,
                    now,
                )
                .await;
            }
        }
    }
}

/// Map a successful remote status onto the task.
async fn apply_remote_status(
    ctx: &SchedulerContext,
    task: &ActiveTask,
    status: RemoteJobStatus,
    attempts: i32,
    now: Timestamp,
) {
    match status {
        RemoteJobStatus::Done { result_url } => {
            complete_task(ctx, task, result_url, attempts, now).await;
        }
        RemoteJobStatus::Failed { reason } => {
            fail_task(ctx, task, reason, attempts, now).await;
        }
        RemoteJobStatus::Queued | RemoteJobStatus::Running { .. } => {
            let hint = match &status {
                RemoteJobStatus::Running { progress_hint } => *progress_hint,
                _ => None,
            };

            // `running` means processing; a late `queued` after we have
            // seen the task run never regresses it back to pending.
            let mapped = if matches!(status, RemoteJobStatus::Running { .. })
                || task.status == TaskStatus::Processing
            {
                TaskStatus::Processing
            } else {
                TaskStatus::Pending
            };
            let processing_started_at = match mapped {
                TaskStatus::Processing => Some(task.processing_started_at.unwrap_or(now)),
                _ => task.processing_started_at,
            };

            let mut inputs = task.progress_inputs();
            inputs.status = mapped;
            inputs.processing_started_at = processing_started_at;
            let est = progress::estimate(&inputs, ctx.freshness_window, now);
            let percent = est.percent.max(hint.unwrap_or(0)).max(task.percent);
            let label = est.label;

            ctx.manager
                .apply_progress(task.id, mapped, percent, &label, processing_started_at, now);

            let newly_started =
                task.processing_started_at.is_none() && mapped == TaskStatus::Processing;
            let patch = TaskPatch {
                status_id: (mapped != task.status).then(|| mapped.id()),
                progress_percent: Some(percent),
                progress_message: Some(label.clone()),
                progress_updated_at: Some(now),
                polling_attempts: Some(attempts),
                processing_started_at: newly_started.then_some(now),
                ..Default::default()
            };
            persist(ctx, task.id, patch).await;

            ctx.broadcaster.publish(&ProgressUpdate {
                task_id: task.id,
                status: mapped,
                percent,
                status_text: label,
            });
        }
    }
}

/// Terminal transition: completed. Writes the result URL, publishes the
/// final update, and removes the task from the active set.
async fn complete_task(
    ctx: &SchedulerContext,
    task: &ActiveTask,
    result_url: String,
    attempts: i32,
    now: Timestamp,
) {
    let patch = TaskPatch {
        status_id: Some(TaskStatus::Completed.id()),
        progress_percent: Some(100),
        progress_message: Some(LABEL_COMPLETED.to_string()),
        progress_updated_at: Some(now),
        video_url: Some(result_url),
        completed_at: Some(now),
        polling_attempts: Some(attempts),
        ..Default::default()
    };
    persist(ctx, task.id, patch).await;

    ctx.broadcaster.publish(&ProgressUpdate {
        task_id: task.id,
        status: TaskStatus::Completed,
        percent: 100,
        status_text: LABEL_COMPLETED.to_string(),
    });

    ctx.manager.deregister(task.id);
    tracing::info!(task_id = task.id, polling_attempts = attempts, "Task completed");
}

/// Terminal transition: failed. Progress is frozen at its last value and
/// is not retried; the UI offers regeneration as a brand-new submission.
async fn fail_task(
    ctx: &SchedulerContext,
    task: &ActiveTask,
    reason: String,
    attempts: i32,
    now: Timestamp,
) {
    let patch = TaskPatch {
        status_id: Some(TaskStatus::Failed.id()),
        progress_message: Some(LABEL_FAILED.to_string()),
        progress_updated_at: Some(now),
        error_message: Some(reason.clone()),
        completed_at: Some(now),
        polling_attempts: Some(attempts),
        ..Default::default()
    };
    persist(ctx, task.id, patch).await;

    ctx.broadcaster.publish(&ProgressUpdate {
        task_id: task.id,
        status: TaskStatus::Failed,
        percent: task.percent,
        status_text: LABEL_FAILED.to_string(),
    });

    ctx.manager.deregister(task.id);
    tracing::warn!(task_id = task.id, %reason, "Task failed");
}

/// Persist a patch, logging instead of propagating: one store failure
/// must not halt the loop, the update is retried on the next tick.
async fn persist(ctx: &SchedulerContext, id: DbId, patch: TaskPatch) {
    if let Err(e) = ctx.store.update(id, patch).await {
        tracing::error!(task_id = id, error = %e, "Failed to persist task update");
    }
}
