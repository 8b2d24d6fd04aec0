use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::ResourceFetcher;
use crate::error::FetchError;
use crate::fetch::RetryingFetcher;
use crate::resource::{ParametrizedQuery, ResourceDescriptor};

/// Streams a remote file to disk with a plain GET
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    http: RetryingFetcher,
}

impl HttpFileFetcher {
    pub fn new(http: RetryingFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFileFetcher {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let ResourceDescriptor::RemoteFile(remote) = resource else {
            return Err(FetchError::UnsupportedResource(resource.kind()));
        };
        tracing::info!(url = %remote.url, "Start resource download");
        let target = out_dir.join(&remote.filename);
        self.http
            .download_to(&remote.url, |c| c.get(&remote.url), &target)
            .await?;
        Ok(vec![target])
    }
}

/// Issues a WFS `GetFeature` request for one layer
#[derive(Debug, Clone)]
pub struct SpatialServiceFetcher {
    http: RetryingFetcher,
}

impl SpatialServiceFetcher {
    pub fn new(http: RetryingFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ResourceFetcher for SpatialServiceFetcher {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let ResourceDescriptor::SpatialService(wfs) = resource else {
            return Err(FetchError::UnsupportedResource(resource.kind()));
        };
        tracing::info!(url = %wfs.url, layer = %wfs.layer_name, "Requesting WFS layer");

        let params = [
            ("service", "WFS"),
            ("version", "1.1.0"),
            ("request", "GetFeature"),
            ("typeName", wfs.layer_name.as_str()),
            ("srsName", wfs.srs_name.as_str()),
            ("outputFormat", wfs.out_format.as_str()),
        ];
        let target = out_dir.join(&wfs.filename);
        self.http
            .download_to(&wfs.url, |c| c.get(&wfs.url).query(&params), &target)
            .await?;
        Ok(vec![target])
    }
}

/// Runs an Overpass query built from a tag filter and a named area
#[derive(Debug, Clone)]
pub struct OverpassQueryFetcher {
    http: RetryingFetcher,
    endpoint: String,
}

impl OverpassQueryFetcher {
    pub fn new(http: RetryingFetcher, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    /// Overpass QL selecting every element matching any of the tags inside
    /// the area named `place_filter`.
    pub fn build_query(query: &ParametrizedQuery) -> String {
        let area = format!("area[\"name\"=\"{}\"]->.searchArea;", escape(&query.place_filter));
        let selectors: String = query
            .tags
            .iter()
            .map(|(key, value)| {
                if value == "*" || value.eq_ignore_ascii_case("true") {
                    format!("  nwr[\"{}\"](area.searchArea);\n", escape(key))
                } else {
                    format!(
                        "  nwr[\"{}\"=\"{}\"](area.searchArea);\n",
                        escape(key),
                        escape(value)
                    )
                }
            })
            .collect();
        format!("[out:json][timeout:180];\n{area}\n(\n{selectors});\nout geom;\n")
    }
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl ResourceFetcher for OverpassQueryFetcher {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let ResourceDescriptor::ParametrizedQuery(query) = resource else {
            return Err(FetchError::UnsupportedResource(resource.kind()));
        };
        tracing::info!(tags = ?query.tags, place = %query.place_filter, "Querying Overpass");

        let body = Self::build_query(query);
        let target = out_dir.join(&query.filename);
        self.http
            .download_to(
                &self.endpoint,
                |c| c.post(&self.endpoint).form(&[("data", body.as_str())]),
                &target,
            )
            .await?;
        Ok(vec![target])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use crate::resource::{RemoteFile, ResourceMeta, SpatialService};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http() -> RetryingFetcher {
        RetryingFetcher::new(reqwest::Client::new(), RetryPolicy::default().without_delay())
    }

    #[test]
    fn test_build_query() {
        let mut tags = BTreeMap::new();
        tags.insert("amenity".to_string(), "bench".to_string());
        tags.insert("leisure".to_string(), "*".to_string());
        let query = ParametrizedQuery {
            meta: ResourceMeta::new("osm-benches", "osm_benches"),
            tags,
            place_filter: "Kaiserslautern, \"RP\"".into(),
            filename: "benches.json".into(),
        };
        let ql = OverpassQueryFetcher::build_query(&query);
        assert!(ql.starts_with("[out:json]"));
        assert!(ql.contains(r#"area["name"="Kaiserslautern, \"RP\""]"#));
        assert!(ql.contains(r#"nwr["amenity"="bench"](area.searchArea);"#));
        assert!(ql.contains(r#"nwr["leisure"](area.searchArea);"#));
        assert!(ql.trim_end().ends_with("out geom;"));
    }

    #[tokio::test]
    async fn test_http_file_fetcher_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resource = ResourceDescriptor::RemoteFile(RemoteFile {
            meta: ResourceMeta::new("ev-stations", "ev_charging_stations"),
            url: format!("{}/ev.csv", server.uri()),
            filename: "ev.csv".into(),
        });
        let dir = tempfile::tempdir().unwrap();
        let err = HttpFileFetcher::new(http())
            .fetch(&resource, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_spatial_service_request_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("request", "GetFeature"))
            .and(query_param("typeName", "skulpturen"))
            .and(query_param("outputFormat", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"features":[]}"#))
            .mount(&server)
            .await;

        let resource = ResourceDescriptor::SpatialService(SpatialService {
            meta: ResourceMeta::new("sculptures", "kl_sculptures"),
            url: format!("{}/wfs", server.uri()),
            layer_name: "skulpturen".into(),
            srs_name: "EPSG:4326".into(),
            out_format: "application/json".into(),
            filename: "sculptures.geojson".into(),
        });
        let dir = tempfile::tempdir().unwrap();
        let paths = SpatialServiceFetcher::new(http())
            .fetch(&resource, dir.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), r#"{"features":[]}"#);
    }

    #[tokio::test]
    async fn test_overpass_posts_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/interpreter"))
            .and(body_string_contains("data="))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"elements":[]}"#))
            .mount(&server)
            .await;

        let mut tags = BTreeMap::new();
        tags.insert("amenity".to_string(), "bench".to_string());
        let resource = ResourceDescriptor::ParametrizedQuery(ParametrizedQuery {
            meta: ResourceMeta::new("osm-benches", "osm_benches"),
            tags,
            place_filter: "Kaiserslautern".into(),
            filename: "benches.json".into(),
        });
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            OverpassQueryFetcher::new(http(), format!("{}/api/interpreter", server.uri()));
        let paths = fetcher.fetch(&resource, dir.path()).await.unwrap();
        assert_eq!(paths, vec![dir.path().join("benches.json")]);
    }
}
