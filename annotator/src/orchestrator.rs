//! Runs one annotation across many charts.
//!
//! A run has two phases. Every identifier is first validated against the
//! vendor; only once validation is complete are the surviving charts
//! annotated. Each phase keeps at most `concurrency` calls in flight and
//! writes results into a slot per input position, so the report is always in
//! input order no matter which call finishes first.

use crate::config::MAX_CONCURRENCY;
use crate::input::dedupe_identifiers;
use crate::metrics_defs::{CHARTS_FAILED, CHARTS_SKIPPED, CHARTS_SUBMITTED, RUN_DURATION};
use crate::report::{
    ABORTED_AUTH, BulkReport, CANCELLED, CANCELLED_IN_FLIGHT, OutcomeStatus, SubmissionOutcome,
};
use crate::submitter::AnnotationSubmitter;
use crate::transport::Transport;
use crate::types::AnnotationRequest;
use crate::validator::{ChartValidator, ValidatedChart};
use serde::Serialize;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::{self, JoinSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Submitting,
}

/// Emitted after every validation and every submission.
///
/// `completed` and `total` count the items of the current stage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub chart_id: String,
    pub stage: Stage,
    pub outcome: Option<SubmissionOutcome>,
    pub completed: usize,
    pub total: usize,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(event);
    }
}

/// Discards all progress events.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

#[derive(Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation shared between a run and whoever may stop it.
#[derive(Clone, Default)]
pub struct CancellationHandle {
    state: Arc<CancelState>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.flag.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// How a phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PhaseEnd {
    Completed,
    Aborted,
    Cancelled,
}

/// Completed and total items of one stage, as reported in progress events.
struct StageTally {
    stage: Stage,
    completed: usize,
    total: usize,
}

impl StageTally {
    fn new(stage: Stage, total: usize) -> Self {
        StageTally {
            stage,
            completed: 0,
            total,
        }
    }

    fn emit(&mut self, progress: &dyn ProgressSink, outcome: &SubmissionOutcome) {
        self.completed += 1;
        progress.emit(ProgressEvent {
            chart_id: outcome.chart_id().to_string(),
            stage: self.stage,
            outcome: Some(outcome.clone()),
            completed: self.completed,
            total: self.total,
        });
    }
}

pub struct BulkOrchestrator {
    validator: ChartValidator,
    submitter: AnnotationSubmitter,
    concurrency: usize,
}

impl BulkOrchestrator {
    /// `concurrency` is clamped to `1..=MAX_CONCURRENCY`.
    pub fn new(transport: Arc<Transport>, concurrency: usize) -> Self {
        BulkOrchestrator {
            validator: ChartValidator::new(transport.clone()),
            submitter: AnnotationSubmitter::new(transport),
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<I, S>(
        &self,
        identifiers: I,
        request: &AnnotationRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationHandle,
    ) -> BulkReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started = Instant::now();
        let identifiers = dedupe_identifiers(identifiers);
        let mut slots: Vec<SubmissionOutcome> = identifiers
            .iter()
            .map(|id| SubmissionOutcome::pending(id.as_str()))
            .collect();

        tracing::info!(
            charts = slots.len(),
            concurrency = self.concurrency,
            date = %request.date(),
            "starting bulk annotation run"
        );

        let mut validation = StageTally::new(Stage::Validating, identifiers.len());
        let (validated, mut end) = self
            .validate_all(&identifiers, &mut slots, progress, cancel, &mut validation)
            .await;

        let mut submission = StageTally::new(Stage::Submitting, validated.len());
        if end == PhaseEnd::Completed {
            end = self
                .submit_all(validated, request, &mut slots, progress, cancel, &mut submission)
                .await;
        }

        let reason = match end {
            PhaseEnd::Completed => None,
            PhaseEnd::Aborted => Some(ABORTED_AUTH),
            PhaseEnd::Cancelled => Some(CANCELLED),
        };
        if let Some(reason) = reason {
            // Only charts whose creation call was never sent are left here.
            for slot in slots.iter_mut().filter(|s| !s.is_terminal()) {
                let tally = match slot.status() {
                    OutcomeStatus::Validated => &mut submission,
                    _ => &mut validation,
                };
                let attempts = slot.attempt_count();
                slot.mark_skipped(reason, None, attempts);
                tally.emit(progress, slot);
            }
        }

        let report = BulkReport::new(
            slots,
            end == PhaseEnd::Aborted,
            end == PhaseEnd::Cancelled,
        );
        let counts = report.counts();
        counter!(CHARTS_SUBMITTED).increment(counts.succeeded as u64);
        counter!(CHARTS_FAILED).increment(counts.failed as u64);
        counter!(CHARTS_SKIPPED).increment(counts.skipped as u64);
        histogram!(RUN_DURATION).record(started.elapsed().as_secs_f64());

        tracing::info!(
            succeeded = counts.succeeded,
            failed = counts.failed,
            skipped = counts.skipped,
            aborted = report.aborted(),
            cancelled = report.cancelled(),
            "bulk annotation run finished"
        );
        report
    }

    async fn validate_all(
        &self,
        identifiers: &[String],
        slots: &mut [SubmissionOutcome],
        progress: &dyn ProgressSink,
        cancel: &CancellationHandle,
        tally: &mut StageTally,
    ) -> (Vec<(usize, ValidatedChart)>, PhaseEnd) {
        let mut queue = identifiers.iter().cloned().enumerate();
        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<task::Id, usize> = HashMap::new();
        let mut validated = Vec::new();

        loop {
            while !cancel.is_cancelled() && join_set.len() < self.concurrency {
                let Some((index, identifier)) = queue.next() else {
                    break;
                };
                let validator = self.validator.clone();
                let handle =
                    join_set.spawn(async move { validator.validate(&identifier).await });
                in_flight.insert(handle.id(), index);
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = join_set.join_next_with_id() => Some(joined),
            };
            let Some(joined) = joined else {
                // Lookups still running may finish; their results are dropped.
                join_set.detach_all();
                return (validated, PhaseEnd::Cancelled);
            };

            let (index, result) = match joined {
                Some(Ok((id, result))) => match in_flight.remove(&id) {
                    Some(index) => (index, Ok(result)),
                    None => continue,
                },
                Some(Err(e)) => match in_flight.remove(&e.id()) {
                    Some(index) => (index, Err(e)),
                    None => continue,
                },
                None => break,
            };

            let slot = &mut slots[index];
            match result {
                Ok(Ok(chart)) => {
                    slot.mark_validated(chart.attempts);
                    validated.push((index, chart));
                }
                Ok(Err(err)) => {
                    slot.mark_skipped(
                        err.skip_reason(),
                        err.status().map(|s| s.as_u16()),
                        err.attempts(),
                    );
                    if err.is_fatal() {
                        tracing::error!(
                            chart_id = slot.chart_id(),
                            error = %err,
                            "vendor rejected credentials, aborting run"
                        );
                        tally.emit(progress, slot);
                        join_set.shutdown().await;
                        return (validated, PhaseEnd::Aborted);
                    }
                }
                Err(e) => {
                    tracing::error!(chart_id = slot.chart_id(), "validation task failed: {}", e);
                    slot.mark_skipped("lookup failed: internal error", None, 0);
                }
            }
            tally.emit(progress, slot);
        }

        validated.sort_by_key(|(index, _)| *index);
        (validated, PhaseEnd::Completed)
    }

    async fn submit_all(
        &self,
        charts: Vec<(usize, ValidatedChart)>,
        request: &AnnotationRequest,
        slots: &mut [SubmissionOutcome],
        progress: &dyn ProgressSink,
        cancel: &CancellationHandle,
        tally: &mut StageTally,
    ) -> PhaseEnd {
        let request = Arc::new(request.clone());
        let mut queue = charts.into_iter();
        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<task::Id, usize> = HashMap::new();

        loop {
            while !cancel.is_cancelled() && join_set.len() < self.concurrency {
                let Some((index, chart)) = queue.next() else {
                    break;
                };
                let submitter = self.submitter.clone();
                let request = request.clone();
                let handle =
                    join_set.spawn(async move { submitter.submit(&chart, &request).await });
                in_flight.insert(handle.id(), index);
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = join_set.join_next_with_id() => Some(joined),
            };
            let Some(joined) = joined else {
                // Sent requests run to completion in the background, but
                // whether they created an annotation is no longer observed.
                join_set.detach_all();
                let mut dispatched: Vec<usize> = in_flight.into_values().collect();
                dispatched.sort_unstable();
                for index in dispatched {
                    let slot = &mut slots[index];
                    tracing::warn!(
                        chart_id = slot.chart_id(),
                        "run cancelled while annotation was in flight"
                    );
                    slot.mark_failed(CANCELLED_IN_FLIGHT, None, 0);
                    tally.emit(progress, slot);
                }
                return PhaseEnd::Cancelled;
            };

            let (index, result) = match joined {
                Some(Ok((id, outcome))) => match in_flight.remove(&id) {
                    Some(index) => (index, Ok(outcome)),
                    None => continue,
                },
                Some(Err(e)) => match in_flight.remove(&e.id()) {
                    Some(index) => (index, Err(e)),
                    None => continue,
                },
                None => break,
            };

            match result {
                Ok(outcome) => slots[index] = outcome,
                Err(e) => {
                    tracing::error!(
                        chart_id = slots[index].chart_id(),
                        "submission task failed: {}",
                        e
                    );
                    slots[index].mark_failed("internal error", None, 0);
                }
            }
            tally.emit(progress, &slots[index]);
        }

        PhaseEnd::Completed
    }
}
