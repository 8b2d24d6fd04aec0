//! Download step and the fetchers it delegates to
//!
//! A [`ResourceFetcher`] knows how to materialize one resource variant into
//! files under the run's output directory. [`DownloadStep`] wraps a fetcher
//! and turns fetch failures into a `false` step result.

mod local;
mod paged;
mod remote;

pub use local::LocalCopyFetcher;
pub use paged::PagedDocumentFetcher;
pub use remote::{HttpFileFetcher, OverpassQueryFetcher, SpatialServiceFetcher};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::{FetchError, Result};
use crate::resource::ResourceDescriptor;
use crate::step::PipelineStep;

/// Materializes a resource into local files
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Write the artifact(s) for `resource` below `out_dir` and return their paths.
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        out_dir: &Path,
    ) -> std::result::Result<Vec<PathBuf>, FetchError>;
}

pub struct DownloadStep {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl DownloadStep {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PipelineStep for DownloadStep {
    fn name(&self) -> &str {
        "download"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<bool> {
        tokio::fs::create_dir_all(&ctx.out_dir).await?;

        match self.fetcher.fetch(&ctx.resource, &ctx.out_dir).await {
            Ok(paths) if paths.is_empty() => Ok(ctx.fail("Fetcher produced no artifact")),
            Ok(paths) => {
                tracing::info!(
                    data_source = %ctx.resource.data_source(),
                    artifacts = paths.len(),
                    "Resource downloaded"
                );
                for path in paths {
                    ctx.add_artifact(path);
                }
                Ok(true)
            },
            Err(e) => Ok(ctx.fail(format!("Download failed: {e}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{LocalFile, ResourceMeta};

    struct FailingFetcher;

    #[async_trait]
    impl ResourceFetcher for FailingFetcher {
        async fn fetch(
            &self,
            _resource: &ResourceDescriptor,
            _out_dir: &Path,
        ) -> std::result::Result<Vec<PathBuf>, FetchError> {
            Err(FetchError::Status {
                url: "https://example.org/x".into(),
                status: 503,
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_error_becomes_false_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let resource = ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new("src", "table"),
            filename: "x.csv".into(),
        });
        let mut ctx = PipelineContext::new(resource, dir.path().join("out"));

        let step = DownloadStep::new(Arc::new(FailingFetcher));
        assert!(!step.execute(&mut ctx).await.unwrap());
        assert!(ctx.failure.unwrap().contains("503"));
        assert!(dir.path().join("out").is_dir());
    }
}
