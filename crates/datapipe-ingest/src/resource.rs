//! Resource descriptors: one configured ingest unit each
//!
//! Every descriptor carries the shared [`ResourceMeta`] (source tag, target
//! table, optional type discriminator) plus variant-specific fetch
//! parameters. The variant is chosen by the pipeline the resource is
//! configured under, not by a tag in the YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource variant discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    LocalFile,
    RemoteFile,
    ParametrizedQuery,
    SpatialService,
    PagedDocument,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::LocalFile => "local_file",
            ResourceKind::RemoteFile => "remote_file",
            ResourceKind::ParametrizedQuery => "parametrized_query",
            ResourceKind::SpatialService => "spatial_service",
            ResourceKind::PagedDocument => "paged_document",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_active() -> bool {
    true
}

/// Fields shared by every resource variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Provenance tag; scopes replace-on-import deletion
    pub data_source: String,
    /// Table the rows are persisted into
    #[serde(alias = "db_model_class")]
    pub target_model: String,
    /// Row type within a table shared by heterogeneous sources
    #[serde(default, alias = "db_model_class_type")]
    pub type_discriminator: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Free-form transform options such as region or city filters
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ResourceMeta {
    pub fn new(data_source: impl Into<String>, target_model: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            target_model: target_model.into(),
            type_discriminator: None,
            active: true,
            options: BTreeMap::new(),
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFile {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametrizedQuery {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    /// Tag filter, e.g. `amenity: bench`. A value of `"*"` matches any value.
    pub tags: BTreeMap<String, String>,
    /// Named area the query is restricted to
    pub place_filter: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialService {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub url: String,
    pub layer_name: String,
    pub srs_name: String,
    pub out_format: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedDocument {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub page_name: String,
    pub table_indices: Vec<usize>,
    pub table_filenames: Vec<String>,
    #[serde(default, alias = "table_extractor_classes")]
    pub extractor_ids: Vec<String>,
}

/// One configured ingest unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDescriptor {
    LocalFile(LocalFile),
    RemoteFile(RemoteFile),
    ParametrizedQuery(ParametrizedQuery),
    SpatialService(SpatialService),
    PagedDocument(PagedDocument),
}

impl ResourceDescriptor {
    /// Deserialize an untagged YAML endpoint entry as the given variant.
    pub fn from_yaml(kind: ResourceKind, value: serde_yaml::Value) -> serde_yaml::Result<Self> {
        Ok(match kind {
            ResourceKind::LocalFile => Self::LocalFile(serde_yaml::from_value(value)?),
            ResourceKind::RemoteFile => Self::RemoteFile(serde_yaml::from_value(value)?),
            ResourceKind::ParametrizedQuery => {
                Self::ParametrizedQuery(serde_yaml::from_value(value)?)
            },
            ResourceKind::SpatialService => Self::SpatialService(serde_yaml::from_value(value)?),
            ResourceKind::PagedDocument => Self::PagedDocument(serde_yaml::from_value(value)?),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::LocalFile(_) => ResourceKind::LocalFile,
            Self::RemoteFile(_) => ResourceKind::RemoteFile,
            Self::ParametrizedQuery(_) => ResourceKind::ParametrizedQuery,
            Self::SpatialService(_) => ResourceKind::SpatialService,
            Self::PagedDocument(_) => ResourceKind::PagedDocument,
        }
    }

    pub fn meta(&self) -> &ResourceMeta {
        match self {
            Self::LocalFile(r) => &r.meta,
            Self::RemoteFile(r) => &r.meta,
            Self::ParametrizedQuery(r) => &r.meta,
            Self::SpatialService(r) => &r.meta,
            Self::PagedDocument(r) => &r.meta,
        }
    }

    pub fn data_source(&self) -> &str {
        &self.meta().data_source
    }

    pub fn target_model(&self) -> &str {
        &self.meta().target_model
    }

    pub fn type_discriminator(&self) -> Option<&str> {
        self.meta().type_discriminator.as_deref()
    }

    /// Primary artifact file name, if the variant produces exactly one.
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::LocalFile(r) => Some(&r.filename),
            Self::RemoteFile(r) => Some(&r.filename),
            Self::ParametrizedQuery(r) => Some(&r.filename),
            Self::SpatialService(r) => Some(&r.filename),
            Self::PagedDocument(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_file_from_yaml() {
        let value: serde_yaml::Value = serde_yaml::from_str(
            r#"
data_source: ev-stations
db_model_class: ev_charging_stations
url: https://example.org/ladesaeulen.csv
filename: ladesaeulen.csv
options:
  city_filter: Kaiserslautern
"#,
        )
        .unwrap();
        let resource = ResourceDescriptor::from_yaml(ResourceKind::RemoteFile, value).unwrap();
        assert_eq!(resource.kind(), ResourceKind::RemoteFile);
        assert_eq!(resource.data_source(), "ev-stations");
        assert_eq!(resource.target_model(), "ev_charging_stations");
        assert_eq!(resource.filename(), Some("ladesaeulen.csv"));
        assert_eq!(resource.meta().option("city_filter"), Some("Kaiserslautern"));
        assert!(resource.meta().active);
    }

    #[test]
    fn test_wrong_variant_fields_rejected() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("data_source: a\ntarget_model: t\nfilename: f.csv\n").unwrap();
        assert!(ResourceDescriptor::from_yaml(ResourceKind::SpatialService, value).is_err());
    }

    #[test]
    fn test_paged_document_has_no_single_filename() {
        let value: serde_yaml::Value = serde_yaml::from_str(
            r#"
data_source: wiki-monuments
target_model: wiki_monuments
page_name: Liste_der_Kulturdenkmäler
table_indices: [0, 2]
table_filenames: [a.csv, b.csv]
"#,
        )
        .unwrap();
        let resource = ResourceDescriptor::from_yaml(ResourceKind::PagedDocument, value).unwrap();
        assert_eq!(resource.filename(), None);
    }
}
