//! The owned orchestrator facade.
//!
//! [`TaskEngine`] wires the task store, remote client, task manager,
//! broadcaster, submission gate, scheduler, and recovery together behind
//! one handle with an explicit lifecycle: created once per session via
//! [`TaskEngine::new`], shut down via [`TaskEngine::shutdown`]. The
//! returned `Arc` can be cheaply cloned into whatever surface embeds it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use reelgen_core::config::{EngineConfig, PollProfile};
use reelgen_core::error::CoreError;
use reelgen_core::task::JobSpec;
use reelgen_core::types::DbId;
use reelgen_db::models::task::TaskPatch;
use reelgen_db::store::{StoreError, TaskStore};
use reelgen_remote::client::RemoteJobClient;

use crate::broadcaster::{ProgressBroadcaster, ProgressSubscription};
use crate::gate::{SubmissionGate, SubmitDenial, TaskHandle, TierResolver};
use crate::manager::{ActiveTask, TaskManager};
use crate::recovery::{RecoveryReport, RecoveryService};
use crate::scheduler::{self, LoopSlot, SchedulerContext};

/// Upper bound on waiting for the polling loop during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide task orchestration engine for one client session.
pub struct TaskEngine {
    store: Arc<dyn TaskStore>,
    client: Arc<dyn RemoteJobClient>,
    manager: Arc<TaskManager>,
    broadcaster: Arc<ProgressBroadcaster>,
    gate: SubmissionGate,
    recovery: RecoveryService,
    config: EngineConfig,
    profile: Arc<RwLock<PollProfile>>,
    poll_loop: LoopSlot,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl TaskEngine {
    /// Assemble an engine from its collaborators.
    ///
    /// Fails when the injected configuration is unusable (e.g. a quota
    /// ceiling of zero).
    pub fn new(
        store: Arc<dyn TaskStore>,
        client: Arc<dyn RemoteJobClient>,
        tiers: Arc<dyn TierResolver>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, CoreError> {
        config.quotas.validate()?;

        let manager = Arc::new(TaskManager::new());
        let broadcaster = Arc::new(ProgressBroadcaster::new());

        let gate = SubmissionGate::new(
            Arc::clone(&store),
            Arc::clone(&client),
            Arc::clone(&manager),
            tiers,
            config.quotas.clone(),
        );
        let recovery = RecoveryService::new(
            Arc::clone(&store),
            Arc::clone(&client),
            Arc::clone(&manager),
            config.recovery.clone(),
        );

        Ok(Arc::new(Self {
            store,
            client,
            manager,
            broadcaster,
            gate,
            recovery,
            config,
            profile: Arc::new(RwLock::new(PollProfile::Foreground)),
            poll_loop: Arc::new(tokio::sync::Mutex::new(None)),
            cancel: CancellationToken::new(),
        }))
    }

    /// Submit a new generation job through the gate, then make sure the
    /// polling loop is running.
    pub async fn submit(&self, owner_id: DbId, spec: JobSpec) -> Result<TaskHandle, SubmitDenial> {
        let handle = self.gate.try_submit(owner_id, spec).await?;
        self.ensure_polling().await;
        Ok(handle)
    }

    /// Run restart recovery for an owner and resume polling if anything
    /// came back. Re-entrant calls return an empty report.
    pub async fn recover(&self, owner_id: DbId) -> RecoveryReport {
        let report = self.recovery.recover(owner_id).await;
        if report.resumed_polling_count > 0 {
            self.ensure_polling().await;
        }
        report
    }

    /// Cancel a task: deregister it (the scheduler stops polling it) and
    /// soft-remove the row. The persisted record remains as history.
    pub async fn cancel_task(&self, id: DbId) -> Result<(), StoreError> {
        let was_active = self.manager.deregister(id);
        self.store
            .update(
                id,
                TaskPatch {
                    removed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(task_id = id, was_active, "Task cancelled");
        Ok(())
    }

    /// Subscribe to one task's progress updates.
    pub fn subscribe(&self, task_id: DbId) -> ProgressSubscription {
        self.broadcaster.subscribe(task_id)
    }

    /// Remove a progress subscription. Idempotent.
    pub fn unsubscribe(&self, task_id: DbId, token: u64) {
        self.broadcaster.unsubscribe(task_id, token)
    }

    /// Snapshot of the currently active tasks, for list rendering.
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.manager.list()
    }

    /// One active task's current state, if it is being tracked.
    pub fn get_task(&self, id: DbId) -> Option<ActiveTask> {
        self.manager.get(id)
    }

    /// Report the client's visibility/device class. Takes effect on the
    /// scheduler's next wait; `Hidden` suspends polling entirely.
    pub fn set_poll_profile(&self, profile: PollProfile) {
        *self.profile.write().unwrap_or_else(|e| e.into_inner()) = profile;
        tracing::debug!(?profile, "Poll profile updated");
    }

    pub fn poll_profile(&self) -> PollProfile {
        *self.profile.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a polling loop is currently alive.
    pub async fn is_polling(&self) -> bool {
        self.poll_loop.lock().await.is_some()
    }

    /// Start the polling loop if none is running.
    ///
    /// The loop clears its own slot (under the slot lock) when it goes
    /// idle, so checking the slot here is race-free against a loop that
    /// is about to exit.
    pub async fn ensure_polling(&self) {
        let mut guard = self.poll_loop.lock().await;
        if guard.is_some() {
            return;
        }

        let ctx = SchedulerContext {
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            manager: Arc::clone(&self.manager),
            broadcaster: Arc::clone(&self.broadcaster),
            polling: self.config.polling.clone(),
            freshness_window: self.config.recovery.freshness_window,
            profile: Arc::clone(&self.profile),
        };
        let cancel = self.cancel.child_token();
        let slot = Arc::clone(&self.poll_loop);

        *guard = Some(tokio::spawn(scheduler::run(ctx, cancel, slot)));
    }

    /// Gracefully stop the engine: cancel the polling loop and wait up to
    /// [`SHUTDOWN_TIMEOUT`] for it to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down task engine");
        self.cancel.cancel();

        let handle = self.poll_loop.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
        }

        tracing::info!("Task engine shut down complete");
    }
}
