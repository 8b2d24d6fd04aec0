//! Region filter between transform and import

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::geometry::BoundingBox;
use crate::step::PipelineStep;

/// Buffer around the region used when none is configured, in km
pub const DEFAULT_BUFFER_KM: f64 = 4.0;

/// Keeps rows whose geometry lies inside the buffered region. Rows without
/// geometry pass through.
pub struct RegionFilterStep {
    region: Option<BoundingBox>,
}

impl RegionFilterStep {
    pub fn new(region: BoundingBox, buffer_km: f64) -> Self {
        Self {
            region: Some(region.buffered(buffer_km)),
        }
    }

    /// Filter that keeps everything; used when no region is known.
    pub fn disabled() -> Self {
        Self { region: None }
    }

    pub fn region(&self) -> Option<&BoundingBox> {
        self.region.as_ref()
    }
}

#[async_trait]
impl PipelineStep for RegionFilterStep {
    fn name(&self) -> &str {
        "filter"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<bool> {
        if ctx.rows.is_empty() {
            return Ok(ctx.fail("No rows to filter"));
        }
        let Some(region) = &self.region else {
            tracing::warn!(data_source = %ctx.resource.data_source(), "No filter region configured, keeping all rows");
            return Ok(true);
        };

        let before = ctx.rows.len();
        ctx.rows.retain(|row| match &row.geometry {
            Some(geometry) => geometry
                .bounds()
                .is_some_and(|bounds| region.intersects(&bounds)),
            None => true,
        });
        tracing::info!(
            data_source = %ctx.resource.data_source(),
            kept = ctx.rows.len(),
            removed = before - ctx.rows.len(),
            "Filtered rows by region"
        );
        Ok(true)
    }
}
