//! Transform step and the row transformers it delegates to
//!
//! A [`RowTransformer`] reads the downloaded artifact(s) and produces
//! [`NormalizedRow`]s for one target model. [`TransformStep`] then stamps the
//! provenance columns every row carries: data source, acquisition date,
//! district and, for shared tables, the type discriminator.

mod catalog;
mod geojson;
mod mapping;
mod overpass;
mod records;
mod tabular;

pub use catalog::SensorCatalogTransformer;
pub use geojson::GeoJsonTransformer;
pub use mapping::{DateColumn, DateKind, OptionFilter, RecordMapping};
pub use overpass::OverpassTransformer;
pub use records::JsonRecordsTransformer;
pub use tabular::DelimitedTableTransformer;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::district::DistrictLocator;
use crate::error::{Result, TransformError};
use crate::row::{FieldValue, NormalizedRow, ACQUISITION_DATE_FIELD, DATA_SOURCE_FIELD, DISTRICT_FIELD, TYPE_FIELD};
use crate::step::PipelineStep;

/// Turns downloaded artifacts into rows for one target model
pub trait RowTransformer: Send + Sync {
    /// `acquisition_date` is the run date; transforms that find a more
    /// precise date in the source set [`ACQUISITION_DATE_FIELD`] themselves.
    fn transform(
        &self,
        ctx: &PipelineContext,
        target_model: &str,
        acquisition_date: NaiveDate,
    ) -> std::result::Result<Vec<NormalizedRow>, TransformError>;
}

pub struct TransformStep {
    transformer: Arc<dyn RowTransformer>,
    locator: Arc<dyn DistrictLocator>,
}

impl TransformStep {
    pub fn new(transformer: Arc<dyn RowTransformer>, locator: Arc<dyn DistrictLocator>) -> Self {
        Self {
            transformer,
            locator,
        }
    }

    fn enrich(&self, row: &mut NormalizedRow, ctx: &PipelineContext) {
        if let Some(geometry) = &row.geometry {
            row.set(DISTRICT_FIELD, self.locator.locate(geometry));
        }
        row.set(DATA_SOURCE_FIELD, ctx.resource.data_source());
        if row.get(ACQUISITION_DATE_FIELD).map_or(true, FieldValue::is_null) {
            row.set(ACQUISITION_DATE_FIELD, ctx.acquisition_date);
        }
        if let Some(discriminator) = ctx.resource.type_discriminator() {
            row.set(TYPE_FIELD, discriminator);
        }
    }
}

#[async_trait]
impl PipelineStep for TransformStep {
    fn name(&self) -> &str {
        "transform"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<bool> {
        let target_model = ctx.resource.target_model().to_string();
        tracing::info!(
            data_source = %ctx.resource.data_source(),
            target_model = %target_model,
            "Transforming resource"
        );

        let mut rows = self
            .transformer
            .transform(ctx, &target_model, ctx.acquisition_date)?;
        for row in &mut rows {
            self.enrich(row, ctx);
        }

        tracing::info!(data_source = %ctx.resource.data_source(), records = rows.len(), "Transform complete");
        ctx.rows = rows;
        Ok(true)
    }
}

/// Artifact a transformer reads: the one named like the resource's file, or
/// the first downloaded one.
pub(crate) fn artifact<'a>(ctx: &'a PipelineContext) -> std::result::Result<&'a Path, TransformError> {
    if let Some(name) = ctx.resource.filename() {
        if let Some(path) = ctx.artifacts.iter().find(|p| p.ends_with(name)) {
            return Ok(path);
        }
    }
    ctx.primary_artifact().ok_or(TransformError::MissingArtifact)
}

pub(crate) fn read_artifact(path: &Path) -> std::result::Result<String, TransformError> {
    std::fs::read_to_string(path).map_err(|e| TransformError::io(path, e))
}
