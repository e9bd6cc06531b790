//! Submission gate: tier-based concurrency quotas in front of the remote
//! create call.
//!
//! The gate admits a job only when the owner's count of non-terminal
//! tasks is below their tier ceiling. Persisting happens after the remote
//! API accepts the job, so a rejected submission never leaves an orphan
//! row behind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use reelgen_core::config::QuotaConfig;
use reelgen_core::error::CoreError;
use reelgen_core::task::JobSpec;
use reelgen_core::tier::QuotaTier;
use reelgen_core::types::DbId;
use reelgen_db::models::task::{NewTask, TaskFilter};
use reelgen_db::store::{StoreError, TaskStore};
use reelgen_remote::client::RemoteJobClient;

use crate::manager::{ActiveTask, TaskManager};

/// Resolves a user to their quota tier.
///
/// Tier assignment lives outside the orchestrator (billing); this trait is
/// the seam it is injected through.
#[async_trait]
pub trait TierResolver: Send + Sync {
    async fn resolve(&self, owner_id: DbId) -> Option<QuotaTier>;
}

/// Fixed owner -> tier mapping with an optional fallback tier.
pub struct StaticTierResolver {
    tiers: HashMap<DbId, QuotaTier>,
    default: Option<QuotaTier>,
}

impl StaticTierResolver {
    pub fn new(tiers: HashMap<DbId, QuotaTier>) -> Self {
        Self {
            tiers,
            default: None,
        }
    }

    /// Fall back to `tier` for owners missing from the map.
    pub fn with_default(mut self, tier: QuotaTier) -> Self {
        self.default = Some(tier);
        self
    }
}

#[async_trait]
impl TierResolver for StaticTierResolver {
    async fn resolve(&self, owner_id: DbId) -> Option<QuotaTier> {
        self.tiers.get(&owner_id).copied().or(self.default)
    }
}

/// Why a submission was not admitted.
#[derive(Debug, thiserror::Error)]
pub enum SubmitDenial {
    /// The owner is at their tier's active-task ceiling. Recoverable: the
    /// user waits for a task to finish or upgrades.
    #[error("Active task quota reached for tier \"{}\" ({limit} concurrent tasks)", .tier.as_str())]
    QuotaExceeded { tier: QuotaTier, limit: u32 },

    /// The owner does not resolve to any known tier.
    #[error("No quota tier configured for owner {0}")]
    UnknownTier(DbId),

    /// A domain-level error (spec validation, corrupt row).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The generation API rejected the submission. No task was persisted;
    /// an immediate retry is safe.
    #[error("Generation API rejected the submission: {0}")]
    UpstreamRejected(String),

    /// The task store failed while counting or persisting.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle returned to the caller once a submission is admitted.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub task_id: DbId,
    pub remote_job_id: String,
}

/// Admission control in front of the remote job client.
pub struct SubmissionGate {
    store: Arc<dyn TaskStore>,
    client: Arc<dyn RemoteJobClient>,
    manager: Arc<TaskManager>,
    tiers: Arc<dyn TierResolver>,
    quotas: QuotaConfig,
}

impl SubmissionGate {
    pub fn new(
        store: Arc<dyn TaskStore>,
        client: Arc<dyn RemoteJobClient>,
        manager: Arc<TaskManager>,
        tiers: Arc<dyn TierResolver>,
        quotas: QuotaConfig,
    ) -> Self {
        Self {
            store,
            client,
            manager,
            tiers,
            quotas,
        }
    }

    /// Admit and submit a job, or explain why not.
    ///
    /// On success the task row is persisted in `Pending` with its remote
    /// job id, and the task is registered with the manager. The caller is
    /// responsible for ensuring the polling loop runs afterwards.
    pub async fn try_submit(
        &self,
        owner_id: DbId,
        spec: JobSpec,
    ) -> Result<TaskHandle, SubmitDenial> {
        spec.validate()?;

        let tier = self
            .tiers
            .resolve(owner_id)
            .await
            .ok_or(SubmitDenial::UnknownTier(owner_id))?;

        let limit = self.quotas.ceiling_for(tier);
        let active = self
            .store
            .query(TaskFilter::active_for_owner(owner_id))
            .await?
            .len() as u32;

        if active >= limit {
            tracing::warn!(
                owner_id,
                tier = tier.as_str(),
                active,
                limit,
                "Submission denied: quota exceeded",
            );
            return Err(SubmitDenial::QuotaExceeded { tier, limit });
        }

        let handle = self
            .client
            .create(&spec)
            .await
            .map_err(|e| SubmitDenial::UpstreamRejected(e.to_string()))?;

        let record = self
            .store
            .insert(NewTask {
                owner_id,
                job_type: spec.job_type.clone(),
                parameters: spec.parameters.clone(),
                remote_job_id: Some(handle.remote_job_id.clone()),
            })
            .await?;

        let mut task = ActiveTask::from_record(&record).ok_or_else(|| {
            CoreError::Internal(format!("persisted task {} has an invalid status", record.id))
        })?;
        // Fresh rows persist at 0%; the in-memory view starts at the
        // queue-ramp floor.
        task.percent = task
            .percent
            .max(reelgen_core::progress::PENDING_FLOOR_PERCENT);
        task.status_text = reelgen_core::progress::LABEL_PREPARING.to_string();
        task.progress_updated_at = Some(Utc::now());
        self.manager.register(task);

        tracing::info!(
            task_id = record.id,
            owner_id,
            tier = tier.as_str(),
            remote_job_id = %handle.remote_job_id,
            "Task admitted and submitted",
        );

        Ok(TaskHandle {
            task_id: record.id,
            remote_job_id: handle.remote_job_id,
        })
    }
}
