//! Step interface of the pipeline chain

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::Result;

/// One stage of a pipeline
///
/// `Ok(true)` hands the context to the next step. `Ok(false)` is an expected
/// domain failure; the step records its reason via
/// [`PipelineContext::fail`]. `Err` is reserved for unexpected failures.
/// Either non-success outcome stops the chain.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Name recorded on the run step, e.g. `download`
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<bool>;
}
