//! Run report aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{Anomaly, ChangeOp, SkipReason};

/// A failed operation with its triggering error classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOp {
    pub op: ChangeOp,
    /// Error classification code (e.g. `VALIDATION_FAILED`).
    pub error_kind: String,
    /// Human-readable error detail.
    pub message: String,
}

/// A skipped operation retained for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedOp {
    pub op: ChangeOp,
    pub reason: SkipReason,
}

/// Aggregated outcome of a convergence run.
///
/// Plan ordering is preserved for `applied` and `skipped`; `failed` entries
/// carry the triggering error kind. The report is handed to the renderer
/// and discarded; nothing is persisted locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub applied: Vec<ChangeOp>,
    pub failed: Vec<FailedOp>,
    pub skipped: Vec<SkippedOp>,
    pub anomalies: Vec<Anomaly>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the run was cancelled, hit its deadline, or escalated
    /// before all ops were dispatched.
    pub incomplete: bool,
}

impl SyncReport {
    /// Whether the run converged cleanly.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.incomplete
    }

    /// Total number of op outcomes recorded.
    #[must_use]
    pub fn total_ops(&self) -> usize {
        self.applied.len() + self.failed.len() + self.skipped.len()
    }
}
