//! Engine configuration surface.

use serde::{Deserialize, Serialize};

/// Settings consumed by the convergence engine. Produced by the CLI (or any
/// other host) from flags and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Delete managed remote users absent from the directory instead of
    /// merely reporting them. Off by default: silent deletion of access is
    /// a higher-risk default than reporting.
    #[serde(default)]
    pub prune_absent: bool,

    /// Maximum number of in-flight remote writes within one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum retry attempts per operation on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in seconds for exponential backoff.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Delay cap in seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Run-level deadline for the convergence phase, in seconds.
    /// `None` means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            prune_absent: false,
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            deadline_secs: None,
        }
    }
}

fn default_concurrency() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_max_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let settings = SyncSettings::default();
        assert!(!settings.prune_absent);
        assert_eq!(settings.concurrency, 10);
        assert_eq!(settings.max_retries, 5);
        assert!(settings.deadline_secs.is_none());
    }

    #[test]
    fn deserializes_with_defaults() {
        let settings: SyncSettings = serde_json::from_str("{}").unwrap();
        assert!(!settings.prune_absent);
        assert_eq!(settings.backoff_base_secs, 1);
        assert_eq!(settings.backoff_max_secs, 60);
    }
}
