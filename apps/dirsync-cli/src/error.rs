//! CLI error type and exit codes.

use thiserror::Error;

use dirsync_core::{DirectoryError, GatewayError};
use dirsync_report::ReportError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("invalid group filter: {0}")]
    InvalidGroupFilter(#[from] regex::Error),

    #[error("failed to encode plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write report to {path}: {source}")]
    ReportWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The run finished but did not converge cleanly.
    #[error("sync did not converge: {failed} failed, incomplete={incomplete}")]
    SyncFailed { failed: usize, incomplete: bool },
}

impl CliError {
    /// Process exit code.
    ///
    /// Infrastructure errors exit 1; a run that executed but did not
    /// converge exits 2 so wrappers can tell the two apart.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::SyncFailed { .. } => 2,
            _ => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
