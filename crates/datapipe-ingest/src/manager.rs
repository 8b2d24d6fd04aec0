//! Entry point for running one pipeline or all of them
//!
//! A run is always recorded: it is created `pending`, moves to `running` once
//! the pipeline lock is held, and ends in the status the pipeline reports. A
//! run that finds the lock taken is recorded as `cancelled` and touches no
//! data.

use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::lock::RunLock;
use crate::pipeline_type::PipelineType;
use crate::registry::PipelineRegistry;
use crate::resource::ResourceDescriptor;
use crate::tracker::{RunOrigin, RunStatus, RunTracker};

/// Final state of one pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pipeline: PipelineType,
    pub run_id: Uuid,
    pub status: RunStatus,
    pub message: Option<String>,
}

impl RunSummary {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, RunStatus::Failed | RunStatus::PartialSuccess)
    }
}

pub struct PipelineManager {
    registry: PipelineRegistry,
    tracker: Arc<dyn RunTracker>,
    lock: Arc<dyn RunLock>,
}

impl PipelineManager {
    pub fn new(registry: PipelineRegistry, tracker: Arc<dyn RunTracker>, lock: Arc<dyn RunLock>) -> Self {
        Self {
            registry,
            tracker,
            lock,
        }
    }

    pub async fn run_pipeline(
        &self,
        pipeline: PipelineType,
        resources: Vec<ResourceDescriptor>,
        out_dir: &Path,
        origin: RunOrigin,
    ) -> Result<RunSummary> {
        let key = pipeline.key();
        let run_id = self.tracker.create_run(key, origin).await?;
        let summary = |status, message: Option<String>| RunSummary {
            pipeline,
            run_id,
            status,
            message,
        };

        let Some(guard) = self.lock.try_acquire(key).await? else {
            let message = format!("Another run of {key} is in progress");
            tracing::warn!(pipeline = %key, %run_id, "Pipeline already running, cancelling");
            self.tracker
                .update_run(run_id, RunStatus::Cancelled, Some(&message))
                .await?;
            return Ok(summary(RunStatus::Cancelled, Some(message)));
        };

        let result = self.run_locked(pipeline, resources, out_dir, run_id).await;
        // The run is already recorded, keep its outcome
        if let Err(e) = guard.release().await {
            tracing::error!(pipeline = %key, %run_id, error = %e, "Failed to release pipeline lock");
        }

        let (status, message) = result?;
        tracing::info!(pipeline = %key, %run_id, status = %status, "Pipeline run recorded");
        Ok(summary(status, message))
    }

    async fn run_locked(
        &self,
        pipeline: PipelineType,
        resources: Vec<ResourceDescriptor>,
        out_dir: &Path,
        run_id: Uuid,
    ) -> Result<(RunStatus, Option<String>)> {
        let created = self
            .registry
            .create(pipeline.key(), resources, out_dir, Some(self.tracker.clone()));
        let built = match created {
            Ok(built) => built,
            Err(e) => {
                let message = e.to_string();
                self.tracker
                    .update_run(run_id, RunStatus::Failed, Some(&message))
                    .await?;
                return Ok((RunStatus::Failed, Some(message)));
            },
        };

        self.tracker.update_run(run_id, RunStatus::Running, None).await?;
        tracing::info!(
            pipeline = %pipeline,
            label = pipeline.label(),
            %run_id,
            out_dir = %out_dir.display(),
            "Running pipeline"
        );

        match built.run(Some(run_id)).await {
            Ok(report) => {
                self.tracker
                    .update_run(run_id, report.status, report.message.as_deref())
                    .await?;
                Ok((report.status, report.message))
            },
            Err(e) => {
                let message = e.to_string();
                if let Err(tracking) = self
                    .tracker
                    .update_run(run_id, RunStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(%run_id, error = %tracking, "Failed to record run failure");
                }
                Err(e)
            },
        }
    }

    /// Run every pipeline of the fixed run-all order with its configured
    /// resources. A failing pipeline does not stop the following ones.
    pub async fn run_all(&self, config: &PipelineConfig, out_dir: &Path, origin: RunOrigin) -> Vec<Result<RunSummary>> {
        let mut results = Vec::with_capacity(PipelineType::RUN_ALL_ORDER.len());
        for pipeline in PipelineType::RUN_ALL_ORDER {
            let resources = config.resources(pipeline).to_vec();
            let result = self.run_pipeline(pipeline, resources, out_dir, origin).await;
            if let Err(e) = &result {
                tracing::error!(pipeline = %pipeline, error = %e, "Pipeline run errored");
            }
            results.push(result);
        }
        results
    }
}
