//! Human-readable output for progress and the final report.

use annotator::input::ScannedInput;
use annotator::{BulkReport, OutcomeStatus, ProgressEvent, Stage, SubmissionOutcome};
use std::fmt::Write;

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Pending => "pending",
        OutcomeStatus::Validated => "valid",
        OutcomeStatus::Skipped => "skipped",
        OutcomeStatus::Submitted => "submitted",
        OutcomeStatus::Failed => "FAILED",
    }
}

fn detail(outcome: &SubmissionOutcome) -> String {
    match (outcome.http_status(), outcome.error_detail()) {
        (Some(status), Some(detail)) => format!("{detail} (HTTP {status})"),
        (None, Some(detail)) => detail.to_string(),
        (Some(status), None) => format!("HTTP {status}"),
        (None, None) => String::new(),
    }
}

pub fn progress_line(event: &ProgressEvent) -> String {
    let stage = match event.stage {
        Stage::Validating => "validate",
        Stage::Submitting => "annotate",
    };
    let status = event
        .outcome
        .as_ref()
        .map(|o| status_label(o.status()))
        .unwrap_or("-");
    let mut line = format!(
        "[{stage} {}/{}] {} {status}",
        event.completed, event.total, event.chart_id
    );
    if let Some(outcome) = &event.outcome {
        let detail = detail(outcome);
        if !detail.is_empty() && outcome.status() != OutcomeStatus::Submitted {
            let _ = write!(line, ": {detail}");
        }
    }
    line
}

pub fn summary(report: &BulkReport) -> String {
    let width = report
        .outcomes()
        .iter()
        .map(|o| o.chart_id().len())
        .max()
        .unwrap_or(0)
        .max("CHART".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<9}  {:>8}  DETAIL", "CHART", "STATUS", "ATTEMPTS");
    for outcome in report.outcomes() {
        let detail = match outcome.annotation_id() {
            Some(id) => format!("annotation {id}"),
            None => detail(outcome),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<9}  {:>8}  {}",
            outcome.chart_id(),
            status_label(outcome.status()),
            outcome.attempt_count(),
            detail
        );
    }

    let counts = report.counts();
    let _ = write!(
        out,
        "\n{} submitted, {} failed, {} skipped",
        counts.succeeded, counts.failed, counts.skipped
    );
    if report.aborted() {
        out.push_str(" (aborted: the vendor rejected the credentials)");
    } else if report.cancelled() {
        out.push_str(" (cancelled)");
    }
    out
}

pub fn scanned_input(scanned: &ScannedInput) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} valid chart id(s):", scanned.ids.len());
    for id in &scanned.ids {
        let _ = writeln!(out, "  {id}");
    }
    if !scanned.rejected.is_empty() {
        let _ = writeln!(out, "{} invalid token(s):", scanned.rejected.len());
        for token in &scanned.rejected {
            let _ = writeln!(out, "  {token}");
        }
    }
    out
}
