use serde::Serialize;

pub const ABORTED_AUTH: &str = "aborted: authentication failure";
pub const CANCELLED: &str = "cancelled";
/// A creation call was already sent when the run was cancelled.
pub const CANCELLED_IN_FLIGHT: &str = "cancelled: outcome unknown";

/// Per-chart state. `Skipped`, `Submitted` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Validated,
    Skipped,
    Submitted,
    Failed,
}

impl OutcomeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::Skipped | OutcomeStatus::Submitted | OutcomeStatus::Failed
        )
    }

    fn can_become(&self, next: OutcomeStatus) -> bool {
        use OutcomeStatus::*;
        matches!(
            (*self, next),
            (Pending, Validated)
                | (Pending, Skipped)
                | (Validated, Submitted)
                | (Validated, Failed)
                | (Validated, Skipped)
        )
    }
}

/// What happened to one chart during a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    chart_id: String,
    status: OutcomeStatus,
    http_status: Option<u16>,
    error_detail: Option<String>,
    attempt_count: u32,
    annotation_id: Option<String>,
}

impl SubmissionOutcome {
    pub fn pending(chart_id: impl Into<String>) -> Self {
        SubmissionOutcome {
            chart_id: chart_id.into(),
            status: OutcomeStatus::Pending,
            http_status: None,
            error_detail: None,
            attempt_count: 0,
            annotation_id: None,
        }
    }

    pub fn chart_id(&self) -> &str {
        &self.chart_id
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn annotation_id(&self) -> Option<&str> {
        self.annotation_id.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_validated(&mut self, attempts: u32) {
        if self.transition(OutcomeStatus::Validated) {
            self.attempt_count = attempts;
        }
    }

    pub fn mark_skipped(
        &mut self,
        reason: impl Into<String>,
        http_status: Option<u16>,
        attempts: u32,
    ) {
        if self.transition(OutcomeStatus::Skipped) {
            self.error_detail = Some(reason.into());
            self.http_status = http_status;
            self.attempt_count = attempts;
        }
    }

    pub fn mark_submitted(
        &mut self,
        http_status: u16,
        attempts: u32,
        annotation_id: Option<String>,
    ) {
        if self.transition(OutcomeStatus::Submitted) {
            self.http_status = Some(http_status);
            self.attempt_count = attempts;
            self.annotation_id = annotation_id;
            self.error_detail = None;
        }
    }

    pub fn mark_failed(
        &mut self,
        detail: impl Into<String>,
        http_status: Option<u16>,
        attempts: u32,
    ) {
        if self.transition(OutcomeStatus::Failed) {
            self.error_detail = Some(detail.into());
            self.http_status = http_status;
            self.attempt_count = attempts;
        }
    }

    fn transition(&mut self, next: OutcomeStatus) -> bool {
        if self.status.can_become(next) {
            self.status = next;
            true
        } else {
            debug_assert!(
                false,
                "illegal outcome transition {:?} -> {next:?} for {}",
                self.status, self.chart_id
            );
            tracing::error!(
                chart_id = %self.chart_id,
                from = ?self.status,
                to = ?next,
                "ignoring illegal outcome transition"
            );
            false
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Final result of a bulk run, outcomes in input order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BulkReport {
    outcomes: Vec<SubmissionOutcome>,
    counts: ReportCounts,
    aborted: bool,
    cancelled: bool,
}

impl BulkReport {
    pub fn new(outcomes: Vec<SubmissionOutcome>, aborted: bool, cancelled: bool) -> Self {
        let mut counts = ReportCounts::default();
        for outcome in &outcomes {
            match outcome.status() {
                OutcomeStatus::Submitted => counts.succeeded += 1,
                OutcomeStatus::Failed => counts.failed += 1,
                OutcomeStatus::Skipped => counts.skipped += 1,
                OutcomeStatus::Pending | OutcomeStatus::Validated => {}
            }
        }

        BulkReport {
            outcomes,
            counts,
            aborted,
            cancelled,
        }
    }

    pub fn outcomes(&self) -> &[SubmissionOutcome] {
        &self.outcomes
    }

    pub fn counts(&self) -> ReportCounts {
        self.counts
    }

    /// The run stopped early because the vendor rejected the credentials.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.counts.succeeded == self.outcomes.len()
    }

    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &SubmissionOutcome> {
        self.outcomes.iter().filter(move |o| o.status() == status)
    }
}
