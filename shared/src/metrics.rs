use crate::metrics_defs::{MetricDef, describe_all};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Installs a StatsD recorder as the global `metrics` recorder.
///
/// Without a call to this function every metric is a no-op.
pub fn install_statsd(
    host: &str,
    port: u16,
    prefix: &str,
    defs: &[MetricDef],
) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(host, port).build(Some(prefix))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    describe_all(defs);

    tracing::info!(host, port, prefix, "statsd metrics enabled");
    Ok(())
}
