//! Subscription tiers used to size per-user concurrency quotas.

use serde::{Deserialize, Serialize};

/// A user's subscription level.
///
/// The tier itself carries no numbers; quota ceilings come from
/// [`QuotaConfig`](crate::config::QuotaConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaTier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl QuotaTier {
    /// String representation for logs and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaTier::Free => "free",
            QuotaTier::Basic => "basic",
            QuotaTier::Pro => "pro",
            QuotaTier::Enterprise => "enterprise",
        }
    }

    /// Parse from a string. Unknown values are `None`, never defaulted —
    /// quota accounting must not silently use the wrong ceiling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(QuotaTier::Free),
            "basic" => Some(QuotaTier::Basic),
            "pro" => Some(QuotaTier::Pro),
            "enterprise" => Some(QuotaTier::Enterprise),
            _ => None,
        }
    }
}
