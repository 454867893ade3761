//! `sync` subcommand: compute and apply the change plan.

use std::sync::Arc;

use clap::Args;
use tracing::{info, warn};

use dirsync_core::SyncSettings;
use dirsync_engine::{compute_plan, ConvergenceExecutor, PlanOptions};
use dirsync_report::render_report;

use crate::commands::common::{LdapArgs, TestOpsArgs};
use crate::error::{CliError, CliResult};

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub ldap: LdapArgs,

    #[command(flatten)]
    pub testops: TestOpsArgs,

    /// Delete managed users absent from the directory
    #[arg(long, env = "SYNC_PRUNE")]
    pub prune: bool,

    /// Maximum in-flight remote writes
    #[arg(long, env = "SYNC_CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    /// Maximum retry attempts per operation
    #[arg(long, env = "SYNC_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,

    /// Base delay in seconds for exponential backoff
    #[arg(long, env = "SYNC_BACKOFF_BASE_SECS", default_value_t = 1)]
    pub backoff_base_secs: u64,

    /// Cap in seconds on any backoff delay
    #[arg(long, env = "SYNC_BACKOFF_MAX_SECS", default_value_t = 60)]
    pub backoff_max_secs: u64,

    /// Abort the convergence phase after this many seconds
    #[arg(long, env = "SYNC_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Write the HTML run report to this path
    #[arg(long, env = "SYNC_REPORT_PATH")]
    pub report: Option<String>,
}

impl SyncArgs {
    fn settings(&self) -> SyncSettings {
        SyncSettings {
            prune_absent: self.prune,
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            backoff_base_secs: self.backoff_base_secs,
            backoff_max_secs: self.backoff_max_secs,
            deadline_secs: self.deadline_secs,
        }
    }
}

pub async fn execute(args: SyncArgs) -> CliResult<()> {
    let principals = args.ldap.read_directory().await?;
    let client = Arc::new(args.testops.to_client()?);
    let remote = crate::commands::common::read_remote(client.as_ref()).await?;

    let plan = compute_plan(
        &principals,
        &remote,
        &PlanOptions {
            prune_absent: args.prune,
        },
    );
    info!(
        pending = plan.pending_ops(),
        anomalies = plan.anomalies.len(),
        "change plan computed"
    );

    let executor = ConvergenceExecutor::new(client, args.settings());

    // Ctrl-C stops new dispatches; in-flight ops finish and get reported.
    let cancel = executor.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping dispatch");
            cancel.cancel();
        }
    });

    let report = executor.apply(plan).await;

    for anomaly in &report.anomalies {
        warn!(%anomaly, "correlation anomaly");
    }
    info!(
        applied = report.applied.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        incomplete = report.incomplete,
        "sync finished"
    );

    if let Some(path) = &args.report {
        let html = render_report(&report, None)?;
        std::fs::write(path, html).map_err(|source| CliError::ReportWrite {
            path: path.clone(),
            source,
        })?;
        info!(path = %path, "report written");
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::SyncFailed {
            failed: report.failed.len(),
            incomplete: report.incomplete,
        })
    }
}
