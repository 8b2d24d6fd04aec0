//! Per-resource state handed from step to step

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::resource::ResourceDescriptor;
use crate::row::NormalizedRow;

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub resource: ResourceDescriptor,
    pub out_dir: PathBuf,
    /// Date stamped onto rows unless the transform derives one from the source
    pub acquisition_date: NaiveDate,
    /// Files materialized by the download step, in the order written
    pub artifacts: Vec<PathBuf>,
    pub rows: Vec<NormalizedRow>,
    /// Set by a step that returns `false`
    pub failure: Option<String>,
}

impl PipelineContext {
    pub fn new(resource: ResourceDescriptor, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource,
            out_dir: out_dir.into(),
            acquisition_date: chrono::Local::now().date_naive(),
            artifacts: Vec::new(),
            rows: Vec::new(),
            failure: None,
        }
    }

    pub fn with_acquisition_date(mut self, date: NaiveDate) -> Self {
        self.acquisition_date = date;
        self
    }

    /// Path inside the output directory
    pub fn out_path(&self, filename: &str) -> PathBuf {
        self.out_dir.join(filename)
    }

    pub fn add_artifact(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    pub fn primary_artifact(&self) -> Option<&Path> {
        self.artifacts.first().map(PathBuf::as_path)
    }

    /// Record a domain failure and return `false` for the step result.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        tracing::warn!(data_source = %self.resource.data_source(), %message, "Step failed");
        self.failure = Some(message);
        false
    }
}
