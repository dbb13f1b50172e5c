//! Applies one dated annotation to many Amplitude charts.
//!
//! Charts are validated before anything is written, each chart gets exactly
//! one creation call (with retries on transient failures), and the run ends
//! with a per-chart report in input order.

pub mod config;
pub mod credentials;
pub mod input;
pub mod metrics_defs;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod submitter;
pub mod transport;
pub mod types;
pub mod validator;
pub mod vendor;

#[cfg(test)]
mod testutils;

pub use config::ConfigurationError;
pub use credentials::CredentialBundle;
pub use orchestrator::{
    BulkOrchestrator, CancellationHandle, NoProgress, ProgressEvent, ProgressSink, Stage,
};
pub use report::{BulkReport, OutcomeStatus, ReportCounts, SubmissionOutcome};
pub use transport::Transport;
pub use types::{AnnotationRequest, ChartId, Region};
