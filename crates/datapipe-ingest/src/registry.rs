//! Pipeline key to step chain resolution
//!
//! The registration table is static: each [`PipelineType`] is bound to the
//! resource variant it accepts and a constructor for its step chain. Chains
//! are built eagerly from shared [`StepDeps`] when a pipeline is created.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::IngestConfig;
use crate::district::DistrictLocator;
use crate::download::{
    DownloadStep, HttpFileFetcher, LocalCopyFetcher, OverpassQueryFetcher, PagedDocumentFetcher,
    ResourceFetcher, SpatialServiceFetcher,
};
use crate::error::{PipelineError, Result};
use crate::fetch::{RetryPolicy, RetryingFetcher};
use crate::filter::RegionFilterStep;
use crate::geometry::BoundingBox;
use crate::import::{ImportStep, RowStore};
use crate::pipeline::{FailurePolicy, Pipeline};
use crate::pipeline_type::PipelineType;
use crate::resource::{ResourceDescriptor, ResourceKind};
use crate::sources;
use crate::step::PipelineStep;
use crate::tracker::RunTracker;
use crate::transform::TransformStep;

/// Collaborators shared by all step chains
#[derive(Clone)]
pub struct StepDeps {
    /// Rate-limited client for scraping and query endpoints
    pub http: RetryingFetcher,
    /// Client for plain file downloads; no politeness delay
    pub download_http: RetryingFetcher,
    pub store: Arc<dyn RowStore>,
    pub locator: Arc<dyn DistrictLocator>,
    /// Seed directory of local-file resources
    pub init_dir: PathBuf,
    pub overpass_url: String,
    pub wiki_base_url: String,
    pub region: Option<BoundingBox>,
    pub region_buffer_km: f64,
}

impl StepDeps {
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn RowStore>,
        locator: Arc<dyn DistrictLocator>,
    ) -> anyhow::Result<Self> {
        let client = RetryingFetcher::build_client(config.http_timeout())?;
        let policy = RetryPolicy::from_config(config);
        let http = RetryingFetcher::new(client, policy.clone());
        let download_http = http.with_policy(policy.without_delay());
        let region = config.region_bbox.or_else(|| locator.extent());

        Ok(Self {
            http,
            download_http,
            store,
            region,
            locator,
            init_dir: config.init_dir(),
            overpass_url: config.overpass_url.clone(),
            wiki_base_url: config.wiki_base_url.clone(),
            region_buffer_km: config.region_buffer_km,
        })
    }
}

type ChainFn = fn(PipelineType, &StepDeps) -> Vec<Arc<dyn PipelineStep>>;

/// One row of the registration table
#[derive(Clone, Copy)]
pub struct Registration {
    pub pipeline: PipelineType,
    pub resource: ResourceKind,
    chain: ChainFn,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("pipeline", &self.pipeline)
            .field("resource", &self.resource)
            .finish()
    }
}

const fn register(pipeline: PipelineType, resource: ResourceKind, chain: ChainFn) -> Registration {
    Registration {
        pipeline,
        resource,
        chain,
    }
}

static REGISTRATIONS: [Registration; 14] = [
    register(PipelineType::Osm, ResourceKind::ParametrizedQuery, query_chain),
    register(PipelineType::Wikipedia, ResourceKind::PagedDocument, paged_chain),
    register(PipelineType::KlGeoWfs, ResourceKind::SpatialService, spatial_chain),
    register(PipelineType::KlSensorResources, ResourceKind::LocalFile, local_chain),
    register(PipelineType::EmergencyPoints, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::EvStations, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::KlEvents, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::KlEventsRis, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::KlGeoResources, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::WifiFreifunk, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::WifiLocal, ResourceKind::LocalFile, filtered_local_chain),
    register(PipelineType::WgaEvents, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::TtnGateway, ResourceKind::RemoteFile, remote_chain),
    register(PipelineType::Vrn, ResourceKind::RemoteFile, remote_chain),
];

fn standard_chain(
    pipeline: PipelineType,
    fetcher: Arc<dyn ResourceFetcher>,
    deps: &StepDeps,
) -> Vec<Arc<dyn PipelineStep>> {
    vec![
        Arc::new(DownloadStep::new(fetcher)),
        Arc::new(TransformStep::new(sources::transformer(pipeline), deps.locator.clone())),
        Arc::new(ImportStep::new(deps.store.clone())),
    ]
}

fn remote_chain(pipeline: PipelineType, deps: &StepDeps) -> Vec<Arc<dyn PipelineStep>> {
    standard_chain(pipeline, Arc::new(HttpFileFetcher::new(deps.download_http.clone())), deps)
}

fn local_chain(pipeline: PipelineType, deps: &StepDeps) -> Vec<Arc<dyn PipelineStep>> {
    standard_chain(pipeline, Arc::new(LocalCopyFetcher::new(&deps.init_dir)), deps)
}

fn filtered_local_chain(pipeline: PipelineType, deps: &StepDeps) -> Vec<Arc<dyn PipelineStep>> {
    let filter = match deps.region {
        Some(region) => RegionFilterStep::new(region, deps.region_buffer_km),
        None => RegionFilterStep::disabled(),
    };
    let mut chain = local_chain(pipeline, deps);
    chain.insert(2, Arc::new(filter));
    chain
}

fn query_chain(pipeline: PipelineType, deps: &StepDeps) -> Vec<Arc<dyn PipelineStep>> {
    let fetcher = OverpassQueryFetcher::new(deps.http.clone(), deps.overpass_url.clone());
    standard_chain(pipeline, Arc::new(fetcher), deps)
}

fn spatial_chain(pipeline: PipelineType, deps: &StepDeps) -> Vec<Arc<dyn PipelineStep>> {
    standard_chain(pipeline, Arc::new(SpatialServiceFetcher::new(deps.download_http.clone())), deps)
}

fn paged_chain(pipeline: PipelineType, deps: &StepDeps) -> Vec<Arc<dyn PipelineStep>> {
    let fetcher = PagedDocumentFetcher::new(deps.http.clone(), deps.wiki_base_url.clone());
    standard_chain(pipeline, Arc::new(fetcher), deps)
}

/// Resolves pipeline keys to ready-to-run [`Pipeline`]s
pub struct PipelineRegistry {
    deps: StepDeps,
    policy: FailurePolicy,
}

impl PipelineRegistry {
    pub fn new(deps: StepDeps) -> Self {
        Self {
            deps,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registrations() -> &'static [Registration] {
        &REGISTRATIONS
    }

    pub fn registration(pipeline: PipelineType) -> Option<&'static Registration> {
        REGISTRATIONS.iter().find(|r| r.pipeline == pipeline)
    }

    /// Build the pipeline registered under `key` (full key or CLI name).
    ///
    /// Fails for unknown keys and for resources of another variant than the
    /// one the pipeline is registered with.
    pub fn create(
        &self,
        key: &str,
        resources: Vec<ResourceDescriptor>,
        out_dir: impl Into<PathBuf>,
        tracker: Option<Arc<dyn RunTracker>>,
    ) -> Result<Pipeline> {
        let registration = PipelineType::from_cli_name(key)
            .and_then(Self::registration)
            .ok_or_else(|| PipelineError::UnknownPipeline(key.to_string()))?;

        if let Some(wrong) = resources.iter().find(|r| r.kind() != registration.resource) {
            return Err(PipelineError::ResourceMismatch {
                pipeline: registration.pipeline.key().to_string(),
                expected: registration.resource,
                found: wrong.kind(),
            });
        }

        let steps = (registration.chain)(registration.pipeline, &self.deps);
        Ok(Pipeline::new(registration.pipeline, resources, out_dir, steps)
            .with_tracker(tracker)
            .with_policy(self.policy))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::district::NoopLocator;
    use crate::import::MemoryRowStore;
    use crate::resource::{LocalFile, RemoteFile, ResourceMeta};

    fn registry() -> PipelineRegistry {
        let config = IngestConfig::default();
        let deps = StepDeps::from_config(&config, Arc::new(MemoryRowStore::new()), Arc::new(NoopLocator)).unwrap();
        PipelineRegistry::new(deps)
    }

    fn remote(ds: &str) -> ResourceDescriptor {
        ResourceDescriptor::RemoteFile(RemoteFile {
            meta: ResourceMeta::new(ds, "vrn_bus_stops"),
            url: "https://example.org/stops.csv".into(),
            filename: "stops.csv".into(),
        })
    }

    #[test]
    fn test_every_pipeline_is_registered_once() {
        for pipeline in PipelineType::ALL {
            let matches = REGISTRATIONS.iter().filter(|r| r.pipeline == pipeline).count();
            assert_eq!(matches, 1, "{pipeline}");
            assert_eq!(PipelineRegistry::registration(pipeline).unwrap().resource, pipeline.resource_kind());
        }
    }

    #[test]
    fn test_create_by_key_and_short_name() {
        let registry = registry();
        let pipeline = registry.create("vrn_pipeline", vec![remote("vrn")], "/tmp/out", None).unwrap();
        assert_eq!(pipeline.pipeline_type(), PipelineType::Vrn);
        assert_eq!(pipeline.step_names(), vec!["download", "transform", "import"]);

        let pipeline = registry.create("wifilocal", vec![], "/tmp/out", None).unwrap();
        assert_eq!(pipeline.step_names(), vec!["download", "transform", "filter", "import"]);
    }

    #[test]
    fn test_unknown_key() {
        let err = registry().create("weather_pipeline", vec![], "/tmp/out", None).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownPipeline(key) if key == "weather_pipeline"));
    }

    #[test]
    fn test_resource_variant_mismatch() {
        let local = ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new("vrn", "vrn_bus_stops"),
            filename: "stops.csv".into(),
        });
        let err = registry()
            .create("vrn", vec![remote("vrn"), local], "/tmp/out", None)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResourceMismatch {
                expected: ResourceKind::RemoteFile,
                found: ResourceKind::LocalFile,
                ..
            }
        ));
    }
}
