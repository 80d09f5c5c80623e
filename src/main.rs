//! Defect Sentinel entrypoint: replay inspection records through the prediction service,
//! check the artifact bundle, tune the threshold, and manage alerts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use defect_sentinel::{
    artifacts::{write_threshold, ArtifactStore},
    config::ServiceConfig,
    logging::StructuredLogger,
    replay::ReplayRunner,
    service::PredictionService,
    storage::AlertStore,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "defect-sentinel")]
#[command(about = "Manufacturing defect early-warning service")]
#[command(version)]
struct Cli {
    /// Service configuration (JSON)
    #[arg(long, env = "SENTINEL_CONFIG_PATH", default_value = "config.json")]
    config: PathBuf,

    /// Override the artifact directory from the configuration
    #[arg(long)]
    artifacts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score NDJSON inspection records from a file or stdin
    Run {
        /// Input file; overrides the configured replay input
        #[arg(long)]
        input: Option<PathBuf>,
        /// Pause between records in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Do not record alerts for positive predictions
        #[arg(long)]
        no_alerts: bool,
    },
    /// Load the artifact bundle and print its summary
    Check,
    /// Write a new decision threshold, applied at the next start
    SetThreshold { value: f64 },
    /// Inspect and manage recorded alerts
    Alerts {
        #[command(subcommand)]
        action: AlertsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AlertsCommand {
    /// Newest alerts first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Mark an alert resolved
    Resolve { id: i64 },
    /// Totals and resolution rate
    Summary,
    /// Delete alerts raised before an RFC 3339 timestamp
    Prune {
        #[arg(long)]
        before: String,
    },
}

fn emit(value: &impl serde::Serialize) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    StructuredLogger::emit_json(value, &mut out)?;
    out.flush()?;
    Ok(())
}

async fn replay<R: AsyncBufRead + Unpin>(runner: &ReplayRunner, input: R) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let stats = runner.run(input, &mut out).await?;
    info!(scored = stats.scored, alerts = stats.alerts, "replay complete");
    Ok(())
}

fn run(config: &ServiceConfig, input: Option<PathBuf>, interval_ms: Option<u64>, no_alerts: bool) -> Result<()> {
    let store = ArtifactStore::new(config.artifacts.clone());
    let bundle = store.load().context("failed to load artifacts")?;
    let service = Arc::new(PredictionService::new(bundle).with_top_sensors(config.alerts.top_sensor_count));

    let mut replay_config = config.replay.clone();
    if let Some(ms) = interval_ms {
        replay_config.interval_ms = ms;
    }
    let mut runner = ReplayRunner::new(service, &replay_config);
    if config.alerts.enabled && !no_alerts {
        let alerts = AlertStore::open(&config.alerts.db_path)
            .with_context(|| format!("failed to open alert store {}", config.alerts.db_path.display()))?;
        runner = runner.with_alerts(Arc::new(alerts));
    }

    let stop = runner.stop_signal();
    if let Err(e) = ctrlc::set_handler(move || stop.stop()) {
        warn!(error = %e, "could not install Ctrl+C handler");
    }

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let input = input.or(replay_config.input);
    let result = rt.block_on(async {
        match input {
            Some(path) => {
                info!(input = %path.display(), "replaying records from file");
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                replay(&runner, BufReader::new(file)).await
            }
            None => {
                info!("replaying records from stdin");
                replay(&runner, BufReader::new(tokio::io::stdin())).await
            }
        }
    });
    // A stdin read parked on the blocking pool must not hold the exit.
    rt.shutdown_background();
    result
}

fn open_alerts(config: &ServiceConfig) -> Result<AlertStore> {
    let path: &Path = &config.alerts.db_path;
    AlertStore::open(path).with_context(|| format!("failed to open alert store {}", path.display()))
}

fn alerts(config: &ServiceConfig, action: AlertsCommand) -> Result<()> {
    let store = open_alerts(config)?;
    match action {
        AlertsCommand::List { limit } => {
            for alert in store.list_alerts(limit)? {
                emit(&alert)?;
            }
        }
        AlertsCommand::Resolve { id } => match store.resolve_alert(id)? {
            Some(alert) => emit(&alert)?,
            None => anyhow::bail!("no alert with id {id}"),
        },
        AlertsCommand::Summary => emit(&store.summary()?)?,
        AlertsCommand::Prune { before } => {
            let before: DateTime<Utc> = DateTime::parse_from_rfc3339(&before)
                .with_context(|| format!("invalid timestamp {before:?}"))?
                .with_timezone(&Utc);
            let removed = store.prune_before(before)?;
            info!(removed, before = %before, "alerts pruned");
            emit(&serde_json::json!({ "removed": removed }))?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServiceConfig::load(&cli.config)?;
    if let Some(dir) = cli.artifacts {
        config.artifacts.dir = dir;
    }

    StructuredLogger::init(config.log.json, &config.log.level)
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;
    info!(config = %cli.config.display(), artifacts = %config.artifacts.dir.display(), "defect sentinel starting");

    match cli.command {
        Command::Run {
            input,
            interval_ms,
            no_alerts,
        } => run(&config, input, interval_ms, no_alerts),
        Command::Check => {
            let bundle = ArtifactStore::new(config.artifacts.clone())
                .load()
                .context("artifact bundle failed validation")?;
            emit(&bundle.summary())
        }
        Command::SetThreshold { value } => {
            let path = config.artifacts.threshold_path();
            write_threshold(&path, value).with_context(|| format!("failed to write {}", path.display()))?;
            if config.alerts.enabled {
                open_alerts(&config)?.put_setting("threshold", &value.to_string())?;
            }
            emit(&serde_json::json!({ "threshold": value, "path": path }))
        }
        Command::Alerts { action } => alerts(&config, action),
    }
}
