//! HTML rendering of a [`SyncReport`].
//!
//! The default template is embedded; deployments can supply their own
//! Handlebars template with the same view fields.

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;

use dirsync_engine::SyncReport;

/// Default report template.
const DEFAULT_TEMPLATE: &str = include_str!("../templates/report.hbs");

/// Report rendering failure.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("template rendering failed: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Flattened view handed to the template. Operations are pre-rendered to
/// their key strings so templates never deal with the op sum type.
#[derive(Debug, Serialize)]
struct ReportView {
    status: String,
    success: bool,
    started_at: String,
    finished_at: String,
    applied_count: usize,
    failed_count: usize,
    skipped_count: usize,
    anomaly_count: usize,
    applied: Vec<String>,
    failed: Vec<FailedView>,
    skipped: Vec<SkippedView>,
    anomalies: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FailedView {
    op: String,
    kind: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct SkippedView {
    op: String,
    reason: String,
}

impl From<&SyncReport> for ReportView {
    fn from(report: &SyncReport) -> Self {
        let status = if report.is_success() {
            "converged".to_string()
        } else if report.incomplete {
            "incomplete".to_string()
        } else {
            "completed with failures".to_string()
        };
        Self {
            status,
            success: report.is_success(),
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
            applied_count: report.applied.len(),
            failed_count: report.failed.len(),
            skipped_count: report.skipped.len(),
            anomaly_count: report.anomalies.len(),
            applied: report.applied.iter().map(ToString::to_string).collect(),
            failed: report
                .failed
                .iter()
                .map(|f| FailedView {
                    op: f.op.to_string(),
                    kind: f.error_kind.clone(),
                    message: f.message.clone(),
                })
                .collect(),
            skipped: report
                .skipped
                .iter()
                .map(|s| SkippedView {
                    op: s.op.to_string(),
                    reason: s.reason.to_string(),
                })
                .collect(),
            anomalies: report.anomalies.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Render the report as HTML. `template` overrides the embedded default.
pub fn render_report(report: &SyncReport, template: Option<&str>) -> Result<String, ReportError> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    let view = ReportView::from(report);
    let html = handlebars.render_template(template.unwrap_or(DEFAULT_TEMPLATE), &view)?;
    Ok(html)
}
