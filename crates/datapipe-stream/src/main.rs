//! Datapipe Stream - MQTT consumer command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datapipe_common::logging::{init_logging, LogConfig, LogLevel};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use datapipe_stream::{
    BatchSink, DiscardSink, FieldTestMeasurement, HeartbeatMonitor, PgFieldTestSink, PgSensorSink, Role,
    SensorReading, StreamConfig, StreamRecord, StreamingConsumer,
};

#[derive(Parser, Debug)]
#[command(name = "datapipe-stream")]
#[command(author, version, about = "MQTT streaming ingestion")]
struct Cli {
    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume until terminated
    Run {
        #[arg(short, long, value_enum)]
        role: Role,
    },
    /// Exit non-zero when the liveness file is missing or too old
    CheckHeartbeat {
        /// Liveness file (defaults to MQTT_HEARTBEAT_FILE_PATH)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Maximum age in seconds (defaults to twice the heartbeat interval)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let prefix = match &cli.command {
        Command::Run { role } => format!("datapipe-stream-{role}"),
        Command::CheckHeartbeat { .. } => "datapipe-stream-check".to_string(),
    };
    let log_config = LogConfig::builder()
        .level(LogLevel::from_verbosity(cli.verbose))
        .log_file_prefix(prefix)
        .filter_directives("sqlx=warn,rumqttc=info")
        .build();
    init_logging(&log_config.merge_env()?)?;

    match cli.command {
        Command::Run { role } => run(role).await,
        Command::CheckHeartbeat { file, max_age_secs } => check_heartbeat(file, max_age_secs).await,
    }
}

async fn run(role: Role) -> Result<()> {
    let config = StreamConfig::from_env(role)?;
    info!(
        role = %role,
        selector = %config.topic_selector,
        table = %config.table(),
        max_buffer_size = config.max_buffer_size,
        "Configuration loaded"
    );

    let pool = match &config.database_url {
        Some(url) => Some(
            PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .context("Failed to connect to database")?,
        ),
        None => {
            warn!("DATABASE_URL not set, flushed records are discarded");
            None
        },
    };

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    match role {
        Role::Fieldtester => {
            let sink: Arc<dyn BatchSink<FieldTestMeasurement>> = match pool {
                Some(pool) => Arc::new(PgFieldTestSink::new(pool, config.fieldtest_table.clone())?),
                None => Arc::new(DiscardSink),
            };
            consume(config, sink, shutdown).await
        },
        Role::Sensors => {
            let sink: Arc<dyn BatchSink<SensorReading>> = match pool {
                Some(pool) => Arc::new(PgSensorSink::new(pool, config.sensor_table.clone())?),
                None => Arc::new(DiscardSink),
            };
            consume(config, sink, shutdown).await
        },
    }
}

async fn consume<R: StreamRecord>(
    config: StreamConfig,
    sink: Arc<dyn BatchSink<R>>,
    shutdown: CancellationToken,
) -> Result<()> {
    StreamingConsumer::new(config, sink)?
        .run(shutdown)
        .await
        .context("Streaming consumer failed")
}

async fn check_heartbeat(file: Option<PathBuf>, max_age_secs: Option<u64>) -> Result<()> {
    let config = StreamConfig::for_role(Role::Fieldtester);
    let file = file.unwrap_or_else(|| {
        PathBuf::from(datapipe_common::env::var_or(
            "MQTT_HEARTBEAT_FILE_PATH",
            &config.heartbeat_file.to_string_lossy(),
        ))
    });
    let max_age = match max_age_secs {
        Some(secs) => Duration::from_secs(secs),
        None => HeartbeatMonitor::default_max_age(datapipe_common::env::parse_or(
            "MQTT_HEARTBEAT_INTERVAL",
            config.heartbeat_interval_secs,
        )?),
    };

    let status = HeartbeatMonitor::new(&file, max_age)
        .check()
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    println!("{}: {status}", file.display());

    if !status.is_alive() {
        anyhow::bail!("Consumer heartbeat is down (threshold {}s)", max_age.as_secs());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
