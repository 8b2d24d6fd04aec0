use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::ResourceFetcher;
use crate::error::FetchError;
use crate::resource::ResourceDescriptor;

/// Copies seed files from a local directory (`<APP_DATA_DIR>/init`)
#[derive(Debug, Clone)]
pub struct LocalCopyFetcher {
    source_dir: PathBuf,
}

impl LocalCopyFetcher {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }
}

#[async_trait]
impl ResourceFetcher for LocalCopyFetcher {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let ResourceDescriptor::LocalFile(local) = resource else {
            return Err(FetchError::UnsupportedResource(resource.kind()));
        };

        let src = self.source_dir.join(&local.filename);
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            return Err(FetchError::MissingSource(src));
        }
        let dst = out_dir.join(&local.filename);
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| FetchError::io(&dst, e))?;

        tracing::info!(src = %src.display(), dst = %dst.display(), "Copied local resource");
        Ok(vec![dst])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{LocalFile, RemoteFile, ResourceMeta};

    fn local(filename: &str) -> ResourceDescriptor {
        ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new("wifi-local", "wifi_hotspots"),
            filename: filename.into(),
        })
    }

    #[tokio::test]
    async fn test_copies_seed_file() {
        let init = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(init.path().join("hotspots.csv"), "name;lat;lon\n").unwrap();

        let paths = LocalCopyFetcher::new(init.path())
            .fetch(&local("hotspots.csv"), out.path())
            .await
            .unwrap();
        assert_eq!(paths, vec![out.path().join("hotspots.csv")]);
        assert!(paths[0].exists());
    }

    #[tokio::test]
    async fn test_missing_seed_file() {
        let init = tempfile::tempdir().unwrap();
        let err = LocalCopyFetcher::new(init.path())
            .fetch(&local("absent.csv"), init.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MissingSource(_)));
    }

    #[tokio::test]
    async fn test_rejects_other_variants() {
        let remote = ResourceDescriptor::RemoteFile(RemoteFile {
            meta: ResourceMeta::new("a", "b"),
            url: "https://example.org".into(),
            filename: "f".into(),
        });
        let dir = tempfile::tempdir().unwrap();
        let err = LocalCopyFetcher::new(dir.path())
            .fetch(&remote, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedResource(_)));
    }
}
