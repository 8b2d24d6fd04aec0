//! Ingest configuration
//!
//! Two layers: [`IngestConfig`] holds process settings read from the
//! environment, [`PipelineConfig`] holds the resource catalog loaded from
//! YAML (`out_dir` plus one section per pipeline key).

use anyhow::Context;
use datapipe_common::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::geometry::BoundingBox;
use crate::pipeline_type::PipelineType;
use crate::resource::ResourceDescriptor;

/// Default Overpass endpoint for parametrized queries
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
/// Default article endpoint for paged documents
pub const DEFAULT_WIKI_URL: &str = "https://de.wikipedia.org/wiki";

/// Process settings for the batch ingester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root for seed files (`init/`) and dated import folders
    pub app_data_dir: PathBuf,
    /// Resource catalog location
    pub config_path: PathBuf,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub http_timeout_secs: u64,
    /// Pause before every rate-limited request
    pub politeness_delay_ms: u64,
    /// Waits applied after successive HTTP 429 responses
    pub rate_limit_backoff_secs: Vec<u64>,
    pub import_batch_size: usize,
    pub overpass_url: String,
    pub wiki_base_url: String,
    /// GeoJSON feature collection with district polygons
    pub districts_file: Option<PathBuf>,
    /// Region kept by the filter step; defaults to the district extent
    pub region_bbox: Option<BoundingBox>,
    pub region_buffer_km: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let app_data_dir = PathBuf::from("./data");
        Self {
            config_path: app_data_dir.join("initial/config/config.yaml"),
            app_data_dir,
            database_url: None,
            database_max_connections: 5,
            http_timeout_secs: 300,
            politeness_delay_ms: 1000,
            rate_limit_backoff_secs: vec![10, 60],
            import_batch_size: 5000,
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            wiki_base_url: DEFAULT_WIKI_URL.to_string(),
            districts_file: None,
            region_bbox: None,
            region_buffer_km: 4.0,
        }
    }
}

impl IngestConfig {
    /// Load settings from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let app_data_dir = PathBuf::from(env::var_or("APP_DATA_DIR", "./data"));
        let config_path = env::var_opt("DATAPIPE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| app_data_dir.join("initial/config/config.yaml"));

        let config = Self {
            app_data_dir,
            config_path,
            database_url: env::var_opt("DATABASE_URL"),
            database_max_connections: env::parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            http_timeout_secs: env::parse_or("INGEST_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            politeness_delay_ms: env::parse_or(
                "INGEST_POLITENESS_DELAY_MS",
                defaults.politeness_delay_ms,
            )?,
            rate_limit_backoff_secs: env::list_or(
                "INGEST_RATE_LIMIT_BACKOFF_SECS",
                defaults.rate_limit_backoff_secs,
            )?,
            import_batch_size: env::parse_or("INGEST_IMPORT_BATCH_SIZE", defaults.import_batch_size)?,
            overpass_url: env::var_or("INGEST_OVERPASS_URL", DEFAULT_OVERPASS_URL),
            wiki_base_url: env::var_or("INGEST_WIKI_BASE_URL", DEFAULT_WIKI_URL),
            districts_file: env::var_opt("INGEST_DISTRICTS_FILE").map(PathBuf::from),
            region_bbox: env::var_opt("INGEST_REGION_BBOX")
                .map(|raw| raw.parse::<BoundingBox>())
                .transpose()
                .map_err(|e| anyhow::anyhow!("INGEST_REGION_BBOX: {e}"))?,
            region_buffer_km: env::parse_or("INGEST_REGION_BUFFER_KM", defaults.region_buffer_km)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.import_batch_size == 0 {
            anyhow::bail!("INGEST_IMPORT_BATCH_SIZE must be greater than 0");
        }
        if self.database_max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.region_buffer_km < 0.0 {
            anyhow::bail!("INGEST_REGION_BUFFER_KM must not be negative");
        }
        url::Url::parse(&self.overpass_url).context("INGEST_OVERPASS_URL is not a valid URL")?;
        url::Url::parse(&self.wiki_base_url).context("INGEST_WIKI_BASE_URL is not a valid URL")?;
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Seed files copied by local-file resources
    pub fn init_dir(&self) -> PathBuf {
        self.app_data_dir.join("init")
    }
}

/// Resources configured for one pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSection {
    pub description: String,
    pub resources: Vec<ResourceDescriptor>,
}

/// Parsed resource catalog
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub out_dir: PathBuf,
    pub pipelines: BTreeMap<PipelineType, PipelineSection>,
}

#[derive(Deserialize)]
struct RawSection {
    #[serde(default)]
    description: String,
    #[serde(default)]
    endpoints: Vec<serde_yaml::Value>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse catalog YAML. Sections for unknown keys are ignored, inactive
    /// endpoints are dropped, and every endpoint must fit the pipeline's
    /// resource variant.
    pub fn parse(content: &str) -> Result<Self> {
        let mut doc: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Invalid pipeline config: {e}")))?;

        let out_dir = doc
            .remove("out_dir")
            .and_then(|v| v.as_str().map(PathBuf::from))
            .ok_or_else(|| PipelineError::Config("Missing out_dir".to_string()))?;

        let mut pipelines = BTreeMap::new();
        for pipeline in PipelineType::ALL {
            let Some(section) = doc.remove(pipeline.key()) else {
                continue;
            };
            if section.is_null() {
                continue;
            }
            let raw: RawSection = serde_yaml::from_value(section).map_err(|e| {
                PipelineError::Config(format!("Invalid section {}: {e}", pipeline.key()))
            })?;

            let mut resources = Vec::with_capacity(raw.endpoints.len());
            for (idx, endpoint) in raw.endpoints.into_iter().enumerate() {
                let resource = ResourceDescriptor::from_yaml(pipeline.resource_kind(), endpoint)
                    .map_err(|e| {
                        PipelineError::Config(format!(
                            "{} endpoint #{idx} is not a valid {} resource: {e}",
                            pipeline.key(),
                            pipeline.resource_kind()
                        ))
                    })?;
                if resource.meta().active {
                    resources.push(resource);
                } else {
                    tracing::debug!(
                        pipeline = %pipeline,
                        data_source = %resource.data_source(),
                        "Skipping inactive resource"
                    );
                }
            }

            pipelines.insert(
                pipeline,
                PipelineSection {
                    description: raw.description,
                    resources,
                },
            );
        }

        for unknown in doc.keys() {
            tracing::warn!(section = %unknown, "Ignoring unknown pipeline section");
        }

        Ok(Self { out_dir, pipelines })
    }

    pub fn resources(&self, pipeline: PipelineType) -> &[ResourceDescriptor] {
        self.pipelines
            .get(&pipeline)
            .map(|s| s.resources.as_slice())
            .unwrap_or(&[])
    }
}
