//! Time-based progress estimation for in-flight generation tasks.
//!
//! The remote generation API does not stream fine-grained progress, so the
//! UI needs a continuously advancing percentage synthesized from elapsed
//! time and the last known status. Everything here is pure: given the same
//! inputs and `now`, [`estimate`] always returns the same result, so tests
//! supply `now` instead of mocking the clock.

use std::time::Duration;

use crate::task::TaskStatus;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Ramp constants
// ---------------------------------------------------------------------------

/// Progress floor while a task is still queued upstream.
pub const PENDING_FLOOR_PERCENT: i16 = 5;

/// Progress cap while a task is still queued upstream.
pub const PENDING_CAP_PERCENT: i16 = 10;

/// Points gained per minute while queued.
pub const PENDING_RAMP_PER_MINUTE: f64 = 2.0;

/// Progress floor once generation has started.
pub const PROCESSING_FLOOR_PERCENT: i16 = 15;

/// Progress cap while generation is running. The final point is reserved
/// for the remote API actually reporting completion.
pub const PROCESSING_CAP_PERCENT: i16 = 99;

/// Points covered by the processing ramp (floor to cap inclusive).
pub const PROCESSING_SPAN_PERCENT: f64 = 84.0;

/// Elapsed minutes after which the processing ramp reaches its cap.
pub const EXPECTED_PROCESSING_MINUTES: f64 = 1.5;

// ---------------------------------------------------------------------------
// Phase labels
// ---------------------------------------------------------------------------

/// Percentage above which the label switches to "generating".
pub const GENERATING_THRESHOLD_PERCENT: i16 = 50;

/// Percentage above which the label switches to "almost complete".
pub const ALMOST_COMPLETE_THRESHOLD_PERCENT: i16 = 80;

pub const LABEL_PREPARING: &str = "preparing";
pub const LABEL_PROCESSING: &str = "processing";
pub const LABEL_GENERATING: &str = "generating";
pub const LABEL_ALMOST_COMPLETE: &str = "almost complete";
pub const LABEL_COMPLETED: &str = "completed";
pub const LABEL_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// Inputs and output
// ---------------------------------------------------------------------------

/// A previously persisted progress reading.
///
/// When recent enough (see the freshness window) it acts as a floor so a
/// reloaded client never sees progress move backwards.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Persisted percentage (0-100).
    pub percent: i16,
    /// Persisted phase label, if any.
    pub message: Option<String>,
    /// When the snapshot was written.
    pub recorded_at: Timestamp,
}

/// The task fields the estimator reads.
#[derive(Debug, Clone)]
pub struct ProgressInputs {
    pub status: TaskStatus,
    pub submitted_at: Timestamp,
    /// When generation started. Defaults to `submitted_at` if never set.
    pub processing_started_at: Option<Timestamp>,
    /// Last persisted progress reading, if one exists.
    pub snapshot: Option<ProgressSnapshot>,
}

/// Estimator output: a percentage and a human-readable phase label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEstimate {
    pub percent: i16,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Estimate progress for a task at time `now`.
///
/// Non-terminal statuses ramp with elapsed time; a snapshot younger than
/// `freshness_window` is a floor on the result. `Completed` and `Failed`
/// bypass the ramp: completed is always `(100, "completed")`, failed
/// freezes the last persisted percentage.
pub fn estimate(
    inputs: &ProgressInputs,
    freshness_window: Duration,
    now: Timestamp,
) -> ProgressEstimate {
    match inputs.status {
        TaskStatus::Completed => ProgressEstimate {
            percent: 100,
            label: LABEL_COMPLETED.to_string(),
        },
        TaskStatus::Failed => ProgressEstimate {
            percent: inputs.snapshot.as_ref().map(|s| s.percent).unwrap_or(0),
            label: LABEL_FAILED.to_string(),
        },
        TaskStatus::Pending => {
            let computed = pending_ramp(inputs.submitted_at, now);
            let percent = apply_snapshot_floor(computed, inputs, freshness_window, now);
            ProgressEstimate {
                percent,
                label: LABEL_PREPARING.to_string(),
            }
        }
        TaskStatus::Processing => {
            let started = inputs.processing_started_at.unwrap_or(inputs.submitted_at);
            let computed = processing_ramp(started, now);
            let percent = apply_snapshot_floor(computed, inputs, freshness_window, now);
            ProgressEstimate {
                percent,
                label: processing_label(percent).to_string(),
            }
        }
    }
}

/// Linear queue ramp: `PENDING_FLOOR + 2/min`, capped at `PENDING_CAP`.
fn pending_ramp(submitted_at: Timestamp, now: Timestamp) -> i16 {
    let percent = PENDING_FLOOR_PERCENT as f64
        + elapsed_minutes(submitted_at, now) * PENDING_RAMP_PER_MINUTE;
    clamp_percent(percent, PENDING_FLOOR_PERCENT, PENDING_CAP_PERCENT)
}

/// Generation ramp: floor to cap over [`EXPECTED_PROCESSING_MINUTES`].
fn processing_ramp(started_at: Timestamp, now: Timestamp) -> i16 {
    let percent = PROCESSING_FLOOR_PERCENT as f64
        + (elapsed_minutes(started_at, now) / EXPECTED_PROCESSING_MINUTES) * PROCESSING_SPAN_PERCENT;
    clamp_percent(percent, PROCESSING_FLOOR_PERCENT, PROCESSING_CAP_PERCENT)
}

/// Phase label for a processing task at the given percentage.
fn processing_label(percent: i16) -> &'static str {
    if percent > ALMOST_COMPLETE_THRESHOLD_PERCENT {
        LABEL_ALMOST_COMPLETE
    } else if percent > GENERATING_THRESHOLD_PERCENT {
        LABEL_GENERATING
    } else {
        LABEL_PROCESSING
    }
}

/// Raise `computed` to the snapshot percentage when the snapshot is still
/// inside the freshness window. Stale snapshots are ignored entirely.
fn apply_snapshot_floor(
    computed: i16,
    inputs: &ProgressInputs,
    freshness_window: Duration,
    now: Timestamp,
) -> i16 {
    match &inputs.snapshot {
        Some(snap) if snapshot_is_fresh(snap, freshness_window, now) => {
            computed.max(snap.percent)
        }
        _ => computed,
    }
}

/// A snapshot is fresh when its age does not exceed the freshness window.
fn snapshot_is_fresh(snap: &ProgressSnapshot, freshness_window: Duration, now: Timestamp) -> bool {
    let age_secs = now.signed_duration_since(snap.recorded_at).num_seconds();
    age_secs <= freshness_window.as_secs() as i64
}

/// Elapsed minutes between two timestamps, never negative.
fn elapsed_minutes(from: Timestamp, to: Timestamp) -> f64 {
    let secs = to.signed_duration_since(from).num_seconds().max(0);
    secs as f64 / 60.0
}

fn clamp_percent(value: f64, floor: i16, cap: i16) -> i16 {
    (value.floor() as i64).clamp(floor as i64, cap as i64) as i16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
