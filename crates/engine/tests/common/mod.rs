//! Shared test doubles and builders for the engine integration tests.
//!
//! Provides an in-memory [`TaskStore`], a scriptable [`RemoteJobClient`],
//! and an engine builder with fast polling intervals so scenarios complete
//! in milliseconds.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use reelgen_core::config::{EngineConfig, PollingConfig};
use reelgen_core::task::{JobSpec, TaskStatus};
use reelgen_core::tier::QuotaTier;
use reelgen_core::types::{DbId, Timestamp};
use reelgen_db::models::task::{NewTask, TaskFilter, TaskPatch, TaskRecord};
use reelgen_db::store::{StoreError, TaskStore};
use reelgen_engine::{StaticTierResolver, TaskEngine, TierResolver};
use reelgen_remote::client::{
    RemoteClientError, RemoteJobClient, RemoteJobHandle, RemoteJobStatus,
};

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install a tracing subscriber honoring `RUST_LOG`. Safe to call from
/// every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelgen_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

pub fn secs_ago(secs: i64) -> Timestamp {
    Utc::now() - chrono::Duration::seconds(secs)
}

/// Poll `condition` every few milliseconds until it holds, panicking with
/// `what` after `timeout`.
pub async fn wait_until(what: &str, timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait for the engine's polling loop to go idle.
pub async fn wait_polling_stopped(engine: &TaskEngine, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while engine.is_polling().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for the polling loop to stop");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// In-memory task store
// ---------------------------------------------------------------------------

/// [`TaskStore`] backed by a `HashMap`, mirroring the partial-update
/// semantics of the Postgres implementation.
#[derive(Default)]
pub struct MemoryTaskStore {
    rows: Mutex<HashMap<DbId, TaskRecord>>,
    next_id: AtomicI64,
}

impl MemoryTaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        })
    }

    /// Insert a pre-built row, keeping the id counter ahead of it.
    pub fn seed(&self, record: TaskRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(record.id, record);
    }

    /// Fetch a row, panicking when absent.
    pub fn row(&self, id: DbId) -> TaskRecord {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("no task row with id {id}"))
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

fn apply_patch(record: &mut TaskRecord, patch: TaskPatch) {
    if let Some(v) = patch.status_id {
        record.status_id = v;
    }
    if let Some(v) = patch.remote_job_id {
        record.remote_job_id = Some(v);
    }
    if let Some(v) = patch.progress_percent {
        record.progress_percent = v;
    }
    if let Some(v) = patch.progress_message {
        record.progress_message = Some(v);
    }
    if let Some(v) = patch.progress_updated_at {
        record.progress_updated_at = Some(v);
    }
    if let Some(v) = patch.video_url {
        record.video_url = Some(v);
    }
    if let Some(v) = patch.error_message {
        record.error_message = Some(v);
    }
    if let Some(v) = patch.polling_attempts {
        record.polling_attempts = v;
    }
    if let Some(v) = patch.processing_started_at {
        record.processing_started_at = Some(v);
    }
    if let Some(v) = patch.completed_at {
        record.completed_at = Some(v);
    }
    if let Some(v) = patch.removed_at {
        record.removed_at = Some(v);
    }
    record.updated_at = Utc::now();
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = TaskRecord {
            id,
            owner_id: task.owner_id,
            job_type: task.job_type,
            parameters: task.parameters,
            remote_job_id: task.remote_job_id,
            status_id: TaskStatus::Pending.id(),
            progress_percent: 0,
            progress_message: None,
            progress_updated_at: None,
            video_url: None,
            error_message: None,
            polling_attempts: 0,
            submitted_at: now,
            processing_started_at: None,
            completed_at: None,
            removed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let record = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_patch(record, patch);
        Ok(())
    }

    async fn get_by_id(&self, id: DbId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn query(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let status_ids: Vec<i16> = filter.statuses.iter().map(|s| s.id()).collect();
        let mut rows: Vec<TaskRecord> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.include_removed || r.removed_at.is_none())
            .filter(|r| filter.owner_id.map(|o| r.owner_id == o).unwrap_or(true))
            .filter(|r| status_ids.is_empty() || status_ids.contains(&r.status_id))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.submitted_at);
        Ok(rows)
    }
}

/// Build a task row with sensible defaults for seeding recovery tests.
pub fn make_record(
    id: DbId,
    owner_id: DbId,
    status: TaskStatus,
    remote_job_id: Option<&str>,
) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        id,
        owner_id,
        job_type: "text_to_video".to_string(),
        parameters: serde_json::json!({"prompt": "a lighthouse at dusk"}),
        remote_job_id: remote_job_id.map(|s| s.to_string()),
        status_id: status.id(),
        progress_percent: 0,
        progress_message: None,
        progress_updated_at: None,
        video_url: None,
        error_message: None,
        polling_attempts: 0,
        submitted_at: now,
        processing_started_at: None,
        completed_at: None,
        removed_at: None,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Scriptable remote client
// ---------------------------------------------------------------------------

/// One scripted poll outcome.
#[derive(Debug, Clone)]
pub enum PollResult {
    Status(RemoteJobStatus),
    /// Transient failure (network error).
    Error,
    /// The job is unknown/expired upstream.
    NotFound,
}

/// [`RemoteJobClient`] fake driven by per-job scripts.
///
/// `create` hands out deterministic ids (`rj-1`, `rj-2`, ...). Poll
/// results are consumed front-to-back; the last step is sticky and
/// repeats forever. Jobs without a script report `Queued`.
#[derive(Default)]
pub struct FakeRemoteClient {
    scripts: Mutex<HashMap<String, VecDeque<PollResult>>>,
    created: AtomicU64,
    fail_create: AtomicBool,
    unknown_on_resume: Mutex<HashSet<String>>,
    resume_calls: Mutex<Vec<(String, DbId)>>,
    poll_delay: Mutex<Option<Duration>>,
}

impl FakeRemoteClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, remote_job_id: &str, steps: Vec<PollResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(remote_job_id.to_string(), steps.into());
    }

    /// Make every subsequent `create` call fail.
    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Make `resume` report the job as unknown/expired.
    pub fn mark_unknown_on_resume(&self, remote_job_id: &str) {
        self.unknown_on_resume
            .lock()
            .unwrap()
            .insert(remote_job_id.to_string());
    }

    /// Delay every poll, to widen race windows deterministically.
    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = Some(delay);
    }

    pub fn resume_calls(&self) -> Vec<(String, DbId)> {
        self.resume_calls.lock().unwrap().clone()
    }

    fn next_step(&self, remote_job_id: &str) -> PollResult {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(remote_job_id) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
            Some(steps) => steps
                .front()
                .cloned()
                .unwrap_or(PollResult::Status(RemoteJobStatus::Queued)),
            None => PollResult::Status(RemoteJobStatus::Queued),
        }
    }
}

#[async_trait]
impl RemoteJobClient for FakeRemoteClient {
    async fn create(&self, _spec: &JobSpec) -> Result<RemoteJobHandle, RemoteClientError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RemoteClientError::Api("simulated rejection".to_string()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteJobHandle {
            remote_job_id: format!("rj-{n}"),
        })
    }

    async fn poll(&self, remote_job_id: &str) -> Result<RemoteJobStatus, RemoteClientError> {
        let delay = *self.poll_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_step(remote_job_id) {
            PollResult::Status(status) => Ok(status),
            PollResult::Error => Err(RemoteClientError::Api(
                "simulated network error".to_string(),
            )),
            PollResult::NotFound => Err(RemoteClientError::JobNotFound(
                remote_job_id.to_string(),
            )),
        }
    }

    async fn resume(&self, remote_job_id: &str, local_id: DbId) -> Result<bool, RemoteClientError> {
        self.resume_calls
            .lock()
            .unwrap()
            .push((remote_job_id.to_string(), local_id));
        Ok(!self
            .unknown_on_resume
            .lock()
            .unwrap()
            .contains(remote_job_id))
    }
}

// ---------------------------------------------------------------------------
// Engine builders
// ---------------------------------------------------------------------------

/// Engine configuration with millisecond polling so tests run fast.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        polling: PollingConfig {
            foreground_interval: Duration::from_millis(20),
            low_power_interval: Duration::from_millis(40),
            background_interval: Duration::from_millis(50),
            max_concurrent_polls: 4,
            max_consecutive_poll_failures: 4,
        },
        ..Default::default()
    }
}

/// Resolver mapping a single owner to a tier.
pub fn single_tier(owner_id: DbId, tier: QuotaTier) -> Arc<dyn TierResolver> {
    Arc::new(StaticTierResolver::new(HashMap::from([(owner_id, tier)])))
}

pub fn build_engine(
    store: Arc<MemoryTaskStore>,
    client: Arc<FakeRemoteClient>,
    tiers: Arc<dyn TierResolver>,
    config: EngineConfig,
) -> Arc<TaskEngine> {
    init_tracing();
    TaskEngine::new(store, client, tiers, config).expect("engine config is valid")
}

pub fn spec() -> JobSpec {
    JobSpec {
        job_type: "text_to_video".to_string(),
        parameters: serde_json::json!({"prompt": "a lighthouse at dusk"}),
    }
}
