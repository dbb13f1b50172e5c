mod config;
mod render;

use annotator::input::{chart_tokens, scan_chart_input};
use annotator::metrics_defs::ALL_METRICS;
use annotator::vendor::check_connection;
use annotator::{
    AnnotationRequest, BulkOrchestrator, CancellationHandle, ConfigurationError, CredentialBundle,
    ProgressEvent, Transport,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError};
use shared::logging::LoggingError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

const EXIT_PARTIAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "bulk-annotate", version, about = "Add one annotation to many Amplitude charts")]
struct Cli {
    /// YAML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Dotenv file with AMPLITUDE_* credentials. Defaults to `.env` if present.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Validate the charts, then annotate every one that exists.
    Annotate(AnnotateArgs),
    /// Check that the credentials are accepted.
    Check,
    /// Show which chart ids would be used, without calling the vendor.
    Parse(ChartArgs),
}

#[derive(Args)]
struct ChartArgs {
    /// Chart ids or chart URLs, separated by commas, spaces or newlines.
    #[arg(long)]
    charts: Vec<String>,
    /// File with chart ids or URLs.
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct AnnotateArgs {
    /// Annotation date, YYYY-MM-DD.
    #[arg(long)]
    date: NaiveDate,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[command(flatten)]
    charts: ChartArgs,
    /// Overrides `run.concurrency`.
    #[arg(long)]
    concurrency: Option<usize>,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("could not read {path}: {source}")]
    Input {
        path: String,
        source: std::io::Error,
    },
    #[error("no chart ids given")]
    NoCharts,
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("could not encode report: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Real environment variables win over the dotenv file.
    let dotenv = match &cli.env_file {
        Some(path) => dotenvy::from_path(path).map(|_| ()),
        None => dotenvy::dotenv().map(|_| ()),
    };

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let _logging = match shared::logging::init(
        &config.logging.level,
        config.logging.sentry_dsn.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {}", CliError::from(e));
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let (Some(path), Err(e)) = (&cli.env_file, &dotenv) {
        tracing::warn!(path = %path.display(), error = %e, "could not load env file");
    }

    if let Some(metrics) = &config.metrics {
        if let Err(e) = shared::metrics::install_statsd(
            &metrics.statsd_host,
            metrics.statsd_port,
            &metrics.prefix,
            ALL_METRICS,
        ) {
            tracing::warn!(error = %e, "metrics disabled");
        }
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
        .and_then(|rt| rt.block_on(run(cli.command, config)));

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "bulk-annotate failed");
            eprintln!("error: {e}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

async fn run(command: CliCommand, config: Config) -> Result<ExitCode, CliError> {
    match command {
        CliCommand::Annotate(args) => annotate(args, &config).await,
        CliCommand::Check => check(&config).await,
        CliCommand::Parse(args) => {
            let scanned = scan_chart_input(&read_chart_text(&args)?);
            print!("{}", render::scanned_input(&scanned));
            Ok(if scanned.ids.is_empty() {
                ExitCode::from(EXIT_PARTIAL)
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

async fn annotate(args: AnnotateArgs, config: &Config) -> Result<ExitCode, CliError> {
    // Everything that can be rejected locally is checked before the first call.
    let request = AnnotationRequest::new(args.date, &args.name, args.description.as_deref())?;
    let identifiers = chart_tokens(&read_chart_text(&args.charts)?);
    if identifiers.is_empty() {
        return Err(CliError::NoCharts);
    }
    let concurrency = match args.concurrency {
        Some(0) => return Err(ConfigurationError::InvalidConcurrency.into()),
        Some(n) => n,
        None => config.run.concurrency()?,
    };

    let transport = Arc::new(build_transport(config)?);
    let orchestrator = BulkOrchestrator::new(transport, concurrency);

    let cancel = CancellationHandle::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("{}", render::progress_line(&event));
        }
    });

    let report = orchestrator
        .run(identifiers, &request, &tx, &cancel)
        .await;
    drop(tx);
    let _ = printer.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render::summary(&report));
    }

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    })
}

async fn check(config: &Config) -> Result<ExitCode, CliError> {
    let transport = build_transport(config)?;
    match check_connection(&transport).await {
        Ok(()) => {
            let credentials = transport.credentials();
            println!(
                "Connection successful (project {}, region {})",
                credentials.project_id(),
                credentials.region()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Connection failed: {e}");
            Ok(ExitCode::from(EXIT_PARTIAL))
        }
    }
}

fn build_transport(config: &Config) -> Result<Transport, CliError> {
    let credentials = CredentialBundle::resolve(|name| std::env::var(name).ok(), &config.vendor)?;
    tracing::debug!(?credentials, "resolved credentials");

    let transport = Transport::new(
        Arc::new(credentials),
        config.retry.policy()?,
        config.vendor.base_url.clone(),
    )?;
    Ok(transport)
}

fn read_chart_text(args: &ChartArgs) -> Result<String, CliError> {
    let mut text = args.charts.join("\n");
    if let Some(path) = &args.input {
        let contents = std::fs::read_to_string(path).map_err(|source| CliError::Input {
            path: path.display().to_string(),
            source,
        })?;
        text.push('\n');
        text.push_str(&contents);
    }
    Ok(text)
}
