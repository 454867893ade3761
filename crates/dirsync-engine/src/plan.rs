//! Change plan representation.
//!
//! A [`ChangePlan`] is an ordered sequence of [`PlannedOp`]s with a strict
//! ordering invariant: all creates precede any membership op referencing
//! them, and all deletes come last. The executor enforces this by running
//! the plan in dependency-ordered batches.

use serde::{Deserialize, Serialize};

use dirsync_core::{NewUser, RemoteId, UserChanges};

/// One convergence operation against the remote system.
///
/// Closed sum type, exhaustively matched by the executor: adding a new op
/// kind is a compile-time-checked match update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeOp {
    CreateUser {
        user: NewUser,
    },
    UpdateUser {
        id: RemoteId,
        external_id: String,
        changes: UserChanges,
    },
    DeleteUser {
        id: RemoteId,
        external_id: String,
    },
    CreateGroup {
        name: String,
    },
    AddMember {
        group_name: String,
        /// Remote group id when the group already exists; `None` when the
        /// group is created earlier in this plan and the id is resolved
        /// from the create result at execution time.
        group_id: Option<RemoteId>,
        user_external_id: String,
        /// Remote user id when the user already exists (same convention).
        user_id: Option<RemoteId>,
    },
    RemoveMember {
        group_name: String,
        group_id: RemoteId,
        user_external_id: String,
        user_id: RemoteId,
    },
}

impl ChangeOp {
    /// Deterministic idempotency key: op kind plus target identifiers.
    ///
    /// Stable across retries and across runs, so a retried create cannot
    /// duplicate on remotes that honor idempotency keys.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            ChangeOp::CreateUser { user } => format!("create-user:{}", user.external_id),
            ChangeOp::UpdateUser { external_id, .. } => format!("update-user:{external_id}"),
            ChangeOp::DeleteUser { external_id, .. } => format!("delete-user:{external_id}"),
            ChangeOp::CreateGroup { name } => format!("create-group:{name}"),
            ChangeOp::AddMember {
                group_name,
                user_external_id,
                ..
            } => format!("add-member:{group_name}:{user_external_id}"),
            ChangeOp::RemoveMember {
                group_name,
                user_external_id,
                ..
            } => format!("remove-member:{group_name}:{user_external_id}"),
        }
    }

    /// Dependency class driving batch ordering.
    #[must_use]
    pub fn class(&self) -> OpClass {
        match self {
            ChangeOp::CreateUser { .. }
            | ChangeOp::UpdateUser { .. }
            | ChangeOp::CreateGroup { .. } => OpClass::Create,
            ChangeOp::AddMember { .. } | ChangeOp::RemoveMember { .. } => OpClass::Membership,
            ChangeOp::DeleteUser { .. } => OpClass::Delete,
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Dependency class of an operation. Batch *n+1* is never dispatched until
/// every op in batch *n* reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpClass {
    Create,
    Membership,
    Delete,
}

/// Why a planned op is not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The principal left the directory but prune mode is disabled; the op
    /// is retained for reporting only.
    PruneDisabled,
    /// The run was cancelled or hit its deadline before dispatch.
    Cancelled,
    /// A previous batch escalated to a run-level failure.
    RunAborted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PruneDisabled => f.write_str("prune disabled"),
            SkipReason::Cancelled => f.write_str("cancelled"),
            SkipReason::RunAborted => f.write_str("run aborted"),
        }
    }
}

/// Execution disposition of a planned op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Apply,
    Skip(SkipReason),
}

/// An op together with its disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOp {
    pub op: ChangeOp,
    pub disposition: Disposition,
}

impl PlannedOp {
    #[must_use]
    pub fn apply(op: ChangeOp) -> Self {
        Self {
            op,
            disposition: Disposition::Apply,
        }
    }

    #[must_use]
    pub fn skip(op: ChangeOp, reason: SkipReason) -> Self {
        Self {
            op,
            disposition: Disposition::Skip(reason),
        }
    }
}

/// A reportable correlation anomaly. Anomalous entities are excluded from
/// the plan, never silently merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Two directory principals share one external id.
    DuplicateDirectoryId { external_id: String },
    /// Two managed remote users share one external id.
    DuplicateRemoteCorrelation { external_id: String },
    /// A directory group name collides with an unmanaged remote group.
    /// Membership ops for that group are suppressed to keep the invariant
    /// that unmanaged entities are never touched.
    UnmanagedGroupCollision { group_name: String },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::DuplicateDirectoryId { external_id } => {
                write!(f, "duplicate external id in directory: {external_id}")
            }
            Anomaly::DuplicateRemoteCorrelation { external_id } => {
                write!(f, "duplicate remote correlation for external id: {external_id}")
            }
            Anomaly::UnmanagedGroupCollision { group_name } => {
                write!(f, "directory group collides with unmanaged remote group: {group_name}")
            }
        }
    }
}

/// Ordered sequence of planned operations plus detected anomalies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangePlan {
    pub ops: Vec<PlannedOp>,
    pub anomalies: Vec<Anomaly>,
}

impl ChangePlan {
    /// Whether the plan contains no op to execute (skips and anomalies are
    /// reporting artifacts, not work).
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self
            .ops
            .iter()
            .any(|p| p.disposition == Disposition::Apply)
    }

    /// Number of ops that will actually execute.
    #[must_use]
    pub fn pending_ops(&self) -> usize {
        self.ops
            .iter()
            .filter(|p| p.disposition == Disposition::Apply)
            .count()
    }
}
