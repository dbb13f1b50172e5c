use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),
    #[error("could not install subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Keeps the Sentry client alive; events are flushed when dropped.
pub struct LoggingGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When a Sentry DSN is given, error
/// events are forwarded to Sentry as well.
pub fn init(level: &str, sentry_dsn: Option<&str>) -> Result<LoggingGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let sentry_guard = sentry_dsn.map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_layer)
        .try_init()?;

    Ok(LoggingGuard {
        _sentry: sentry_guard,
    })
}
