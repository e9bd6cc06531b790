//! Task status enum and job spec validation.
//!
//! `TaskStatus` discriminants match the seed data order (1-based) in the
//! `task_statuses` database table. Lives in `core` to maintain the
//! zero-internal-dependency constraint.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Maximum length of a job type name.
const MAX_JOB_TYPE_LEN: usize = 64;

/// Lifecycle status of an orchestrated task.
///
/// Transitions only flow forward: `Pending -> Processing -> {Completed |
/// Failed}`. A task never re-enters `Pending` from `Processing`.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

/// The non-terminal statuses, in seed order.
pub const ACTIVE_STATUSES: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::Processing];

impl TaskStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to the enum.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(TaskStatus::Pending),
            2 => Some(TaskStatus::Processing),
            3 => Some(TaskStatus::Completed),
            4 => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// String representation for logs and wire payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` are terminal; no further transitions occur.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl From<TaskStatus> for StatusId {
    fn from(value: TaskStatus) -> Self {
        value as StatusId
    }
}

/// Everything the remote generation API needs to create a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Kind of generation to run, e.g. `"text_to_video"`.
    pub job_type: String,
    /// Free-form parameters forwarded to the generation API unchanged.
    pub parameters: serde_json::Value,
}

impl JobSpec {
    /// Validate a job spec before quota accounting and submission.
    ///
    /// Rules:
    /// - `job_type` must not be empty and must not exceed `MAX_JOB_TYPE_LEN`.
    /// - `job_type` may only contain alphanumeric, hyphen, underscore, or
    ///   dot characters.
    /// - `parameters` must be a JSON object.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.job_type.is_empty() {
            return Err(CoreError::Validation(
                "Job type must not be empty".to_string(),
            ));
        }
        if self.job_type.len() > MAX_JOB_TYPE_LEN {
            return Err(CoreError::Validation(format!(
                "Job type must not exceed {MAX_JOB_TYPE_LEN} characters"
            )));
        }
        if !self
            .job_type
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(CoreError::Validation(
                "Job type may only contain alphanumeric, hyphen, underscore, or dot characters"
                    .to_string(),
            ));
        }
        if !self.parameters.is_object() {
            return Err(CoreError::Validation(
                "Job parameters must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}
