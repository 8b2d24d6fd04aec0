//! Datapipe Ingest
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resource-driven batch ETL. Every configured resource runs through a step
//! chain chosen by its pipeline:
//!
//! - **Download**: materialize the resource as local artifact files
//! - **Transform**: turn artifacts into [`NormalizedRow`]s
//! - **Filter**: optionally keep rows inside the city region
//! - **Import**: insert under a fresh epoch, then prune older rows of the source
//!
//! Runs and their steps are recorded through a [`RunTracker`], and a
//! [`RunLock`] keeps two runs of the same pipeline from overlapping.
//!
//! # Example
//!
//! ```no_run
//! use datapipe_ingest::{
//!     IngestConfig, LocalRunLock, MemoryRowStore, MemoryRunTracker, NoopLocator, PipelineConfig,
//!     PipelineManager, PipelineRegistry, PipelineType, RunOrigin, StepDeps,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IngestConfig::from_env()?;
//! let catalog = PipelineConfig::load(&config.config_path)?;
//! let deps = StepDeps::from_config(&config, Arc::new(MemoryRowStore::new()), Arc::new(NoopLocator))?;
//! let manager = PipelineManager::new(
//!     PipelineRegistry::new(deps),
//!     Arc::new(MemoryRunTracker::new()),
//!     Arc::new(LocalRunLock::new()),
//! );
//!
//! let resources = catalog.resources(PipelineType::Vrn).to_vec();
//! let summary = manager
//!     .run_pipeline(PipelineType::Vrn, resources, &catalog.out_dir, RunOrigin::Manual)
//!     .await?;
//! println!("{}", summary.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod district;
pub mod download;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod geometry;
pub mod import;
pub mod lock;
pub mod manager;
pub mod pipeline;
pub mod pipeline_type;
pub mod registry;
pub mod resource;
pub mod row;
pub mod sources;
pub mod step;
pub mod tracker;
pub mod transform;

pub use config::{IngestConfig, PipelineConfig};
pub use context::PipelineContext;
pub use district::{DistrictLocator, NoopLocator, PolygonDistrictLocator};
pub use error::{FetchError, ImportError, PipelineError, Result, TrackerError, TransformError};
pub use import::{MemoryRowStore, PostgresRowStore, RowStore};
pub use lock::{LocalRunLock, PgRunLock, RunLock};
pub use manager::{PipelineManager, RunSummary};
pub use pipeline::{FailurePolicy, Pipeline, RunReport};
pub use pipeline_type::PipelineType;
pub use registry::{PipelineRegistry, StepDeps};
pub use resource::{ResourceDescriptor, ResourceKind, ResourceMeta};
pub use row::{FieldValue, NormalizedRow};
pub use step::PipelineStep;
pub use tracker::{MemoryRunTracker, PostgresRunTracker, RunOrigin, RunStatus, RunTracker};
