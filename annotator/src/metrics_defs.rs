//! Metrics definitions for the annotator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const TRANSPORT_ATTEMPTS: MetricDef = MetricDef {
    name: "transport.attempts",
    metric_type: MetricType::Counter,
    description: "Number of HTTP attempts sent to the vendor API",
};

pub const TRANSPORT_RETRIES: MetricDef = MetricDef {
    name: "transport.retries",
    metric_type: MetricType::Counter,
    description: "Number of attempts that were retried after a retryable failure",
};

pub const TRANSPORT_GIVE_UPS: MetricDef = MetricDef {
    name: "transport.give_ups",
    metric_type: MetricType::Counter,
    description: "Number of calls that ended in an error after all permitted attempts",
};

pub const CHARTS_SUBMITTED: MetricDef = MetricDef {
    name: "run.charts.submitted",
    metric_type: MetricType::Counter,
    description: "Charts that received the annotation",
};

pub const CHARTS_FAILED: MetricDef = MetricDef {
    name: "run.charts.failed",
    metric_type: MetricType::Counter,
    description: "Charts whose annotation call failed",
};

pub const CHARTS_SKIPPED: MetricDef = MetricDef {
    name: "run.charts.skipped",
    metric_type: MetricType::Counter,
    description: "Charts never submitted (invalid, missing, aborted or cancelled)",
};

pub const RUN_DURATION: MetricDef = MetricDef {
    name: "run.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a bulk run in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    TRANSPORT_ATTEMPTS,
    TRANSPORT_RETRIES,
    TRANSPORT_GIVE_UPS,
    CHARTS_SUBMITTED,
    CHARTS_FAILED,
    CHARTS_SKIPPED,
    RUN_DURATION,
];
