//! Progress events published to UI subscribers.

use reelgen_core::task::TaskStatus;
use reelgen_core::types::DbId;
use serde::Serialize;

/// A progress reading for one task, fanned out via the
/// [`ProgressBroadcaster`](crate::broadcaster::ProgressBroadcaster).
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub task_id: DbId,
    pub status: TaskStatus,
    /// Completion percentage (0-100).
    pub percent: i16,
    /// Human-readable phase label, e.g. `"generating"`.
    pub status_text: String,
}
