//! Convergence engine: plan computation and plan execution.
//!
//! The engine re-derives all state from the two live systems on every run.
//! [`diff::compute_plan`] is a pure function over the directory and remote
//! snapshots; [`executor::ConvergenceExecutor`] applies the resulting
//! [`plan::ChangePlan`] with retry, rate-limit backoff and partial-failure
//! isolation, producing a [`report::SyncReport`].

pub mod diff;
pub mod executor;
pub mod plan;
pub mod report;
pub mod retry;
pub mod snapshot;

pub use diff::{compute_plan, PlanOptions};
pub use executor::{CancellationFlag, ConvergenceExecutor};
pub use plan::{Anomaly, ChangeOp, ChangePlan, Disposition, PlannedOp, SkipReason};
pub use report::{FailedOp, SkippedOp, SyncReport};
pub use retry::RetryPolicy;
pub use snapshot::fetch_remote_snapshot;
