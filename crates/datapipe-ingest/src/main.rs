//! Datapipe Ingest - batch ETL command line

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use datapipe_common::logging::{init_logging, LogConfig, LogLevel};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use datapipe_ingest::{
    DistrictLocator, FailurePolicy, IngestConfig, LocalRunLock, MemoryRowStore, MemoryRunTracker, NoopLocator,
    PgRunLock, PipelineConfig, PipelineManager, PipelineRegistry, PipelineType, PolygonDistrictLocator,
    PostgresRowStore, PostgresRunTracker, RowStore, RunLock, RunOrigin, RunSummary, RunTracker, StepDeps,
};

/// Property names tried for the district name in the districts file
const DISTRICT_NAME_PROPERTIES: &[&str] = &["name", "stadtteil", "NAME"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    Osm,
    Wiki,
    Wfs,
    Sensors,
    Emergency,
    Ev,
    Miadi,
    Ris,
    #[value(alias = "georesouces")]
    Georesources,
    Freifunk,
    Wifilocal,
    Wga,
    Ttn,
    Vrn,
    /// Every pipeline in the fixed run order
    All,
}

impl Source {
    fn pipeline(self) -> Option<PipelineType> {
        Some(match self {
            Source::Osm => PipelineType::Osm,
            Source::Wiki => PipelineType::Wikipedia,
            Source::Wfs => PipelineType::KlGeoWfs,
            Source::Sensors => PipelineType::KlSensorResources,
            Source::Emergency => PipelineType::EmergencyPoints,
            Source::Ev => PipelineType::EvStations,
            Source::Miadi => PipelineType::KlEvents,
            Source::Ris => PipelineType::KlEventsRis,
            Source::Georesources => PipelineType::KlGeoResources,
            Source::Freifunk => PipelineType::WifiFreifunk,
            Source::Wifilocal => PipelineType::WifiLocal,
            Source::Wga => PipelineType::WgaEvents,
            Source::Ttn => PipelineType::TtnGateway,
            Source::Vrn => PipelineType::Vrn,
            Source::All => return None,
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "datapipe-ingest")]
#[command(author, version, about = "Resource-driven batch ingestion")]
struct Cli {
    /// Pipeline to run
    #[arg(short, long, value_enum)]
    source: Source,

    /// Resource catalog (defaults to $APP_DATA_DIR/initial/config/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory (defaults to <out_dir>/<YYYY_MM_DD>)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// What triggered this run
    #[arg(long, value_enum, default_value_t = RunOrigin::Manual)]
    origin: RunOrigin,

    /// Keep run records in memory instead of the database
    #[arg(long)]
    no_tracking: bool,

    /// Continue with the next resource when one fails
    #[arg(long)]
    continue_on_error: bool,

    /// Apply database migrations before running
    #[arg(long)]
    migrate: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(LogLevel::from_verbosity(cli.verbose))
        .log_file_prefix("datapipe-ingest")
        .filter_directives("sqlx=warn,reqwest=info,hyper=info")
        .build();
    // Environment variables take precedence
    init_logging(&log_config.merge_env()?)?;

    let mut config = IngestConfig::from_env()?;
    if let Some(path) = cli.config.clone() {
        config.config_path = path;
    }
    let catalog = PipelineConfig::load(&config.config_path)
        .with_context(|| format!("Failed to load {}", config.config_path.display()))?;

    let out_dir = cli.out_dir.clone().unwrap_or_else(|| {
        catalog
            .out_dir
            .join(chrono::Local::now().format("%Y_%m_%d").to_string())
    });
    info!(config = %config.config_path.display(), out_dir = %out_dir.display(), "Configuration loaded");

    let pool = connect(&config).await?;
    if cli.migrate {
        let pool = pool.as_ref().context("--migrate requires DATABASE_URL")?;
        sqlx::migrate!("../../migrations")
            .run(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        info!("Database migrations completed");
    }

    let manager = build_manager(&cli, &config, pool)?;
    let summaries = match cli.source.pipeline() {
        Some(pipeline) => {
            let resources = catalog.resources(pipeline).to_vec();
            vec![manager.run_pipeline(pipeline, resources, &out_dir, cli.origin).await]
        },
        None => manager.run_all(&catalog, &out_dir, cli.origin).await,
    };

    report(summaries)
}

async fn connect(config: &IngestConfig) -> Result<Option<PgPool>> {
    let Some(url) = &config.database_url else {
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection pool established");
    Ok(Some(pool))
}

fn build_manager(cli: &Cli, config: &IngestConfig, pool: Option<PgPool>) -> Result<PipelineManager> {
    let (store, tracker, lock): (Arc<dyn RowStore>, Arc<dyn RunTracker>, Arc<dyn RunLock>) = match pool {
        Some(pool) => {
            let tracker: Arc<dyn RunTracker> = if cli.no_tracking {
                Arc::new(MemoryRunTracker::new())
            } else {
                Arc::new(PostgresRunTracker::new(pool.clone()))
            };
            (
                Arc::new(PostgresRowStore::new(pool.clone()).with_batch_size(config.import_batch_size)),
                tracker,
                Arc::new(PgRunLock::new(pool)),
            )
        },
        None => {
            warn!("DATABASE_URL not set, imported rows are kept in memory only");
            (
                Arc::new(MemoryRowStore::new()),
                Arc::new(MemoryRunTracker::new()),
                Arc::new(LocalRunLock::new()),
            )
        },
    };

    let locator: Arc<dyn DistrictLocator> = match &config.districts_file {
        Some(path) => Arc::new(PolygonDistrictLocator::from_geojson_file(path, DISTRICT_NAME_PROPERTIES)?),
        None => Arc::new(NoopLocator),
    };

    let policy = if cli.continue_on_error {
        FailurePolicy::ContinueWithNextResource
    } else {
        FailurePolicy::AbortRun
    };
    let registry = PipelineRegistry::new(StepDeps::from_config(config, store, locator)?).with_policy(policy);
    Ok(PipelineManager::new(registry, tracker, lock))
}

fn report(summaries: Vec<datapipe_ingest::Result<RunSummary>>) -> Result<()> {
    let mut failed = 0;
    for summary in summaries {
        match summary {
            Ok(summary) => {
                println!("{}: {}", summary.pipeline.key(), summary.status);
                if let Some(message) = &summary.message {
                    println!("  {message}");
                }
                if summary.is_failure() {
                    failed += 1;
                }
            },
            Err(e) => {
                println!("error: {e}");
                failed += 1;
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} pipeline run(s) did not succeed");
    }
    info!("Ingestion complete");
    Ok(())
}
