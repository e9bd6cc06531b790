//! Task orchestration and recovery engine.
//!
//! Tracks video-generation requests from submission through completion or
//! failure, and reconstructs in-flight state from the task store after a
//! restart. The building blocks:
//!
//! - [`TaskManager`] — authoritative in-memory set of active tasks.
//! - [`ProgressBroadcaster`] — per-task publish/subscribe fan-out.
//! - [`SubmissionGate`] — tier-based concurrency quotas in front of the
//!   remote create call.
//! - [`scheduler`] — the polling loop reconciling local state against the
//!   remote job API.
//! - [`RecoveryService`] — restart recovery with a re-entrancy guard.
//! - [`TaskEngine`] — the owned facade wiring it all together, with an
//!   explicit lifecycle (`new` -> `Arc<Self>`, `shutdown`).

pub mod broadcaster;
pub mod engine;
pub mod events;
pub mod gate;
pub mod manager;
pub mod recovery;
pub mod scheduler;

pub use broadcaster::{ProgressBroadcaster, ProgressSubscription};
pub use engine::TaskEngine;
pub use events::ProgressUpdate;
pub use gate::{StaticTierResolver, SubmissionGate, SubmitDenial, TaskHandle, TierResolver};
pub use manager::{ActiveTask, TaskManager};
pub use recovery::{RecoveryReport, RecoveryService};
