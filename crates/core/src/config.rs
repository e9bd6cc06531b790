//! Engine configuration loaded from environment variables.
//!
//! Every tunable the orchestrator consumes (quota ceilings, polling
//! intervals, grace and freshness windows) is injected through
//! [`EngineConfig`] rather than hard-coded in components. All fields have
//! defaults suitable for local development; in production, override via
//! environment variables.

use std::time::Duration;

use crate::error::CoreError;
use crate::tier::QuotaTier;

// ---------------------------------------------------------------------------
// Poll profile
// ---------------------------------------------------------------------------

/// Device/visibility class the client reports, selecting the polling
/// cadence. `Hidden` means the client is not visible and the scheduler
/// must not poll at all, to bound remote API load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollProfile {
    /// Client visible on a regular device.
    Foreground,
    /// Client visible on a low-core-count or otherwise constrained device.
    LowPower,
    /// Client backgrounded but still running.
    Background,
    /// Client not visible; polling is suspended entirely.
    Hidden,
}

// ---------------------------------------------------------------------------
// Quotas
// ---------------------------------------------------------------------------

/// Per-tier ceilings on concurrently active (non-terminal) tasks.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub free: u32,
    pub basic: u32,
    pub pro: u32,
    pub enterprise: u32,
}

impl QuotaConfig {
    /// Ceiling for a given tier.
    pub fn ceiling_for(&self, tier: QuotaTier) -> u32 {
        match tier {
            QuotaTier::Free => self.free,
            QuotaTier::Basic => self.basic,
            QuotaTier::Pro => self.pro,
            QuotaTier::Enterprise => self.enterprise,
        }
    }

    /// Every ceiling must admit at least one task, otherwise the gate
    /// could never accept a submission for that tier.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (tier, ceiling) in [
            (QuotaTier::Free, self.free),
            (QuotaTier::Basic, self.basic),
            (QuotaTier::Pro, self.pro),
            (QuotaTier::Enterprise, self.enterprise),
        ] {
            if ceiling == 0 {
                return Err(CoreError::Validation(format!(
                    "Quota ceiling for tier \"{}\" must be at least 1",
                    tier.as_str()
                )));
            }
        }
        Ok(())
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: 2,
            basic: 5,
            pro: 10,
            enterprise: 25,
        }
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Scheduler cadence and failure bounds.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval while the client is visible on a regular device.
    pub foreground_interval: Duration,
    /// Interval on constrained devices.
    pub low_power_interval: Duration,
    /// Interval while the client is backgrounded.
    pub background_interval: Duration,
    /// Upper bound on remote status queries in flight within one tick.
    pub max_concurrent_polls: usize,
    /// Consecutive poll failures after which a task is marked failed.
    pub max_consecutive_poll_failures: u32,
}

impl PollingConfig {
    /// Interval for a profile, or `None` when polling is suspended.
    pub fn interval_for(&self, profile: PollProfile) -> Option<Duration> {
        match profile {
            PollProfile::Foreground => Some(self.foreground_interval),
            PollProfile::LowPower => Some(self.low_power_interval),
            PollProfile::Background => Some(self.background_interval),
            PollProfile::Hidden => None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            foreground_interval: Duration::from_secs(5),
            low_power_interval: Duration::from_secs(8),
            background_interval: Duration::from_secs(10),
            max_concurrent_polls: 4,
            max_consecutive_poll_failures: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Windows governing restart recovery and snapshot trust.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum time a task may lack a remote job id before recovery
    /// resolves it to failed.
    pub grace_window: Duration,
    /// Maximum age of a persisted progress snapshot before the estimator
    /// ignores it and recomputes from elapsed time.
    pub freshness_window: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(10 * 60),
            freshness_window: Duration::from_secs(30 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub quotas: QuotaConfig,
    pub polling: PollingConfig,
    pub recovery: RecoveryConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Reads `.env` first when present.
    ///
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `QUOTA_FREE_MAX_ACTIVE`           | `2`     |
    /// | `QUOTA_BASIC_MAX_ACTIVE`          | `5`     |
    /// | `QUOTA_PRO_MAX_ACTIVE`            | `10`    |
    /// | `QUOTA_ENTERPRISE_MAX_ACTIVE`     | `25`    |
    /// | `POLL_INTERVAL_SECS`              | `5`     |
    /// | `POLL_INTERVAL_LOW_POWER_SECS`    | `8`     |
    /// | `POLL_INTERVAL_BACKGROUND_SECS`   | `10`    |
    /// | `POLL_MAX_CONCURRENT`             | `4`     |
    /// | `POLL_MAX_CONSECUTIVE_FAILURES`   | `4`     |
    /// | `RECOVERY_GRACE_WINDOW_SECS`      | `600`   |
    /// | `PROGRESS_FRESHNESS_WINDOW_SECS`  | `1800`  |
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let quotas = QuotaConfig {
            free: env_u32("QUOTA_FREE_MAX_ACTIVE", 2),
            basic: env_u32("QUOTA_BASIC_MAX_ACTIVE", 5),
            pro: env_u32("QUOTA_PRO_MAX_ACTIVE", 10),
            enterprise: env_u32("QUOTA_ENTERPRISE_MAX_ACTIVE", 25),
        };

        let polling = PollingConfig {
            foreground_interval: Duration::from_secs(env_u64("POLL_INTERVAL_SECS", 5)),
            low_power_interval: Duration::from_secs(env_u64("POLL_INTERVAL_LOW_POWER_SECS", 8)),
            background_interval: Duration::from_secs(env_u64("POLL_INTERVAL_BACKGROUND_SECS", 10)),
            max_concurrent_polls: env_u64("POLL_MAX_CONCURRENT", 4) as usize,
            max_consecutive_poll_failures: env_u32("POLL_MAX_CONSECUTIVE_FAILURES", 4),
        };

        let recovery = RecoveryConfig {
            grace_window: Duration::from_secs(env_u64("RECOVERY_GRACE_WINDOW_SECS", 600)),
            freshness_window: Duration::from_secs(env_u64("PROGRESS_FRESHNESS_WINDOW_SECS", 1800)),
        };

        Self {
            quotas,
            polling,
            recovery,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid u64")),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid u32")),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
