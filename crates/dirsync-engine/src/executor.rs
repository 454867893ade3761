//! Convergence executor.
//!
//! Applies a [`ChangePlan`] against a [`TestOpsGateway`] in dependency-
//! ordered batches (creates, then memberships, then deletes) with bounded
//! concurrency, per-op retry and partial-failure isolation: one failing op
//! never aborts the plan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use dirsync_core::{GatewayError, NewUser, RemoteId, SyncSettings, TestOpsGateway};

use crate::plan::{ChangeOp, ChangePlan, Disposition, OpClass, SkipReason};
use crate::report::{FailedOp, SkippedOp, SyncReport};
use crate::retry::{OpFailure, RetryPolicy};

/// External cancellation handle. Cancelling stops new dispatches; in-flight
/// ops finish and their outcome is recorded.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Remote ids learned from the snapshot and from create results, used to
/// resolve membership ops referencing entities created earlier in the run.
#[derive(Debug, Default)]
struct IdMap {
    users: HashMap<String, RemoteId>,
    groups: HashMap<String, RemoteId>,
}

/// Entity created during a batch; merged into the [`IdMap`] once the batch
/// is fully terminal, before the next batch dispatches.
enum Created {
    User { external_id: String, id: RemoteId },
    Group { name: String, id: RemoteId },
}

enum Outcome {
    Applied(Option<Created>),
    Failed(OpFailure),
    NotDispatched,
}

/// Executes change plans against the remote system.
pub struct ConvergenceExecutor<G> {
    gateway: Arc<G>,
    settings: SyncSettings,
    retry: RetryPolicy,
    cancel: CancellationFlag,
}

impl<G: TestOpsGateway> ConvergenceExecutor<G> {
    #[must_use]
    pub fn new(gateway: Arc<G>, settings: SyncSettings) -> Self {
        let retry = RetryPolicy::from_settings(&settings);
        Self {
            gateway,
            settings,
            retry,
            cancel: CancellationFlag::new(),
        }
    }

    /// Use an externally shared cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling this executor's run.
    #[must_use]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Apply the plan and aggregate a [`SyncReport`].
    ///
    /// Ops are consumed exactly once. Batch *n+1* is not dispatched until
    /// every op in batch *n* reached a terminal state; no result is
    /// committed to the report before it is terminal.
    pub async fn apply(&self, plan: ChangePlan) -> SyncReport {
        let started_at = Utc::now();
        let deadline = self
            .settings
            .deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        info!(
            ops = plan.pending_ops(),
            skips = plan.ops.len() - plan.pending_ops(),
            concurrency = self.settings.concurrency,
            "starting convergence"
        );

        // Partition into plan-skips and dependency-ordered batches, keeping
        // original plan indices so report ordering can be restored.
        let ChangePlan { ops, anomalies } = plan;
        let mut skipped: Vec<(usize, SkippedOp)> = Vec::new();
        let mut batches: [Vec<(usize, ChangeOp)>; 3] = Default::default();
        for (idx, planned) in ops.into_iter().enumerate() {
            match planned.disposition {
                Disposition::Skip(reason) => skipped.push((
                    idx,
                    SkippedOp {
                        op: planned.op,
                        reason,
                    },
                )),
                Disposition::Apply => {
                    let slot = match planned.op.class() {
                        OpClass::Create => 0,
                        OpClass::Membership => 1,
                        OpClass::Delete => 2,
                    };
                    batches[slot].push((idx, planned.op));
                }
            }
        }

        let mut ids = IdMap::default();
        let mut applied: Vec<(usize, ChangeOp)> = Vec::new();
        let mut failed: Vec<(usize, FailedOp)> = Vec::new();
        let mut incomplete = false;
        let mut aborted = false;

        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            if aborted || self.stop_requested(deadline) {
                incomplete = true;
                let reason = if aborted {
                    SkipReason::RunAborted
                } else {
                    SkipReason::Cancelled
                };
                for (idx, op) in batch {
                    skipped.push((idx, SkippedOp { op, reason }));
                }
                continue;
            }

            let outcomes = self.run_batch(batch, &ids, deadline).await;

            let mut executed = 0usize;
            let mut exhausted = 0usize;
            for (idx, op, outcome) in outcomes {
                match outcome {
                    Outcome::Applied(created) => {
                        executed += 1;
                        if let Some(created) = created {
                            match created {
                                Created::User { external_id, id } => {
                                    ids.users.insert(external_id, id);
                                }
                                Created::Group { name, id } => {
                                    ids.groups.insert(name, id);
                                }
                            }
                        }
                        applied.push((idx, op));
                    }
                    Outcome::Failed(failure) => {
                        executed += 1;
                        if failure.retries_exhausted {
                            exhausted += 1;
                        }
                        warn!(op = %op, error = %failure.error, "operation failed");
                        failed.push((
                            idx,
                            FailedOp {
                                op,
                                error_kind: failure.error.kind().to_string(),
                                message: failure.error.to_string(),
                            },
                        ));
                    }
                    Outcome::NotDispatched => {
                        incomplete = true;
                        skipped.push((
                            idx,
                            SkippedOp {
                                op,
                                reason: SkipReason::Cancelled,
                            },
                        ));
                    }
                }
            }

            // A strict majority of exhausted transient failures in one
            // batch escalates to a run-level failure: the remote is in no
            // state to accept the remaining batches.
            if executed > 0 && exhausted * 2 > executed {
                warn!(executed, exhausted, "batch majority exhausted retries, aborting run");
                aborted = true;
                incomplete = true;
            }
        }

        // Restore plan ordering for the report.
        applied.sort_by_key(|(idx, _)| *idx);
        failed.sort_by_key(|(idx, _)| *idx);
        skipped.sort_by_key(|(idx, _)| *idx);

        let report = SyncReport {
            applied: applied.into_iter().map(|(_, op)| op).collect(),
            failed: failed.into_iter().map(|(_, op)| op).collect(),
            skipped: skipped.into_iter().map(|(_, op)| op).collect(),
            anomalies,
            started_at,
            finished_at: Utc::now(),
            incomplete,
        };

        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            incomplete = report.incomplete,
            "convergence finished"
        );

        report
    }

    fn stop_requested(&self, deadline: Option<Instant>) -> bool {
        self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run one batch to full termination with bounded concurrency.
    /// Completion order within the batch is unspecified.
    async fn run_batch(
        &self,
        batch: Vec<(usize, ChangeOp)>,
        ids: &IdMap,
        deadline: Option<Instant>,
    ) -> Vec<(usize, ChangeOp, Outcome)> {
        stream::iter(batch)
            .map(|(idx, op)| async move {
                if self.stop_requested(deadline) {
                    return (idx, op, Outcome::NotDispatched);
                }
                let outcome = match self.execute_op(&op, ids).await {
                    Ok(created) => Outcome::Applied(created),
                    Err(failure) => Outcome::Failed(failure),
                };
                (idx, op, outcome)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn execute_op(&self, op: &ChangeOp, ids: &IdMap) -> Result<Option<Created>, OpFailure> {
        debug!(op = %op, "executing");
        match op {
            ChangeOp::CreateUser { user } => {
                let created = self.create_user_idempotent(user, &op.key()).await?;
                Ok(Some(Created::User {
                    external_id: user.external_id.clone(),
                    id: created,
                }))
            }
            ChangeOp::UpdateUser { id, changes, .. } => {
                self.retry
                    .execute("update-user", || self.gateway.update_user(id, changes))
                    .await?;
                Ok(None)
            }
            ChangeOp::DeleteUser { id, .. } => {
                match self
                    .retry
                    .execute("delete-user", || self.gateway.delete_user(id))
                    .await
                {
                    Ok(()) => Ok(None),
                    // Already gone remotely: the desired state holds.
                    Err(OpFailure {
                        error: GatewayError::NotFound(_),
                        ..
                    }) => Ok(None),
                    Err(failure) => Err(failure),
                }
            }
            ChangeOp::CreateGroup { name } => {
                let created = self.create_group_idempotent(name, &op.key()).await?;
                Ok(Some(Created::Group {
                    name: name.clone(),
                    id: created,
                }))
            }
            ChangeOp::AddMember {
                group_name,
                group_id,
                user_external_id,
                user_id,
            } => {
                let group = self.resolve_group(group_name, group_id.as_ref(), ids)?;
                let user = self.resolve_user(user_external_id, user_id.as_ref(), ids)?;
                match self
                    .retry
                    .execute("add-member", || self.gateway.add_member(&group, &user))
                    .await
                {
                    Ok(()) => Ok(None),
                    // Already a member: converged.
                    Err(OpFailure {
                        error: GatewayError::Conflict(_),
                        ..
                    }) => Ok(None),
                    Err(failure) => Err(failure),
                }
            }
            ChangeOp::RemoveMember {
                group_id, user_id, ..
            } => {
                match self
                    .retry
                    .execute("remove-member", || {
                        self.gateway.remove_member(group_id, user_id)
                    })
                    .await
                {
                    Ok(()) => Ok(None),
                    // Membership already absent: converged.
                    Err(OpFailure {
                        error: GatewayError::NotFound(_),
                        ..
                    }) => Ok(None),
                    Err(failure) => Err(failure),
                }
            }
        }
    }

    fn resolve_group(
        &self,
        name: &str,
        known: Option<&RemoteId>,
        ids: &IdMap,
    ) -> Result<RemoteId, OpFailure> {
        known
            .cloned()
            .or_else(|| ids.groups.get(name).cloned())
            .ok_or_else(|| {
                OpFailure::permanent(GatewayError::NotFound(format!(
                    "group '{name}' was not created in this run"
                )))
            })
    }

    fn resolve_user(
        &self,
        external_id: &str,
        known: Option<&RemoteId>,
        ids: &IdMap,
    ) -> Result<RemoteId, OpFailure> {
        known
            .cloned()
            .or_else(|| ids.users.get(external_id).cloned())
            .ok_or_else(|| {
                OpFailure::permanent(GatewayError::NotFound(format!(
                    "user '{external_id}' was not created in this run"
                )))
            })
    }

    /// Create a user without risking a duplicate on retry.
    ///
    /// When the deployment honors idempotency keys the same key is replayed
    /// on every attempt. Otherwise, whenever the outcome of a previous
    /// attempt is unknown (network error, 5xx), the remote state is
    /// re-checked for an existing match before the create is re-issued.
    async fn create_user_idempotent(
        &self,
        user: &NewUser,
        key: &str,
    ) -> Result<RemoteId, OpFailure> {
        let mut attempt: u32 = 0;
        let mut outcome_unknown = false;
        loop {
            if attempt > 0 && outcome_unknown && !self.gateway.supports_idempotency_keys() {
                if let Ok(Some(existing)) = self
                    .gateway
                    .find_user_by_external_id(&user.external_id)
                    .await
                {
                    debug!(external_id = %user.external_id, "create landed on a previous attempt");
                    return Ok(existing.id);
                }
            }
            match self.gateway.create_user(user, key).await {
                Ok(created) => return Ok(created.id),
                Err(error) => {
                    // A conflict after an unknown-outcome attempt means the
                    // original create landed; resolve to the existing user.
                    if outcome_unknown && matches!(error, GatewayError::Conflict(_)) {
                        if let Ok(Some(existing)) = self
                            .gateway
                            .find_user_by_external_id(&user.external_id)
                            .await
                        {
                            return Ok(existing.id);
                        }
                    }
                    if !self.retry.should_retry(attempt, &error) {
                        return Err(if error.is_transient() {
                            OpFailure::exhausted(error)
                        } else {
                            OpFailure::permanent(error)
                        });
                    }
                    outcome_unknown = error.outcome_unknown();
                    let delay = self.retry.delay_for(attempt, &error);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Group counterpart of [`Self::create_user_idempotent`], keyed by the
    /// globally unique group name.
    async fn create_group_idempotent(&self, name: &str, key: &str) -> Result<RemoteId, OpFailure> {
        let mut attempt: u32 = 0;
        let mut outcome_unknown = false;
        loop {
            if attempt > 0 && outcome_unknown && !self.gateway.supports_idempotency_keys() {
                if let Ok(Some(existing)) = self.gateway.find_group_by_name(name).await {
                    debug!(group = %name, "create landed on a previous attempt");
                    return Ok(existing.id);
                }
            }
            match self.gateway.create_group(name, key).await {
                Ok(created) => return Ok(created.id),
                Err(error) => {
                    if outcome_unknown && matches!(error, GatewayError::Conflict(_)) {
                        if let Ok(Some(existing)) = self.gateway.find_group_by_name(name).await {
                            return Ok(existing.id);
                        }
                    }
                    if !self.retry.should_retry(attempt, &error) {
                        return Err(if error.is_transient() {
                            OpFailure::exhausted(error)
                        } else {
                            OpFailure::permanent(error)
                        });
                    }
                    outcome_unknown = error.outcome_unknown();
                    let delay = self.retry.delay_for(attempt, &error);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
