//! Step chain executed once per resource
//!
//! Every resource gets a fresh [`PipelineContext`] and runs through the steps
//! in declaration order. Under [`FailurePolicy::AbortRun`] the first step that
//! returns `false` or an error ends the whole run; no further step runs for
//! that resource or any later one.

use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::pipeline_type::PipelineType;
use crate::resource::ResourceDescriptor;
use crate::step::PipelineStep;
use crate::tracker::{RunStatus, RunTracker};

/// What happens after a resource fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failure and fail the run
    #[default]
    AbortRun,
    /// Skip the failed resource and carry on with the next one
    ContinueWithNextResource,
}

/// Outcome of [`Pipeline::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// First failure message, if any
    pub message: Option<String>,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Pipeline {
    pipeline_type: PipelineType,
    resources: Vec<ResourceDescriptor>,
    out_dir: PathBuf,
    steps: Vec<Arc<dyn PipelineStep>>,
    tracker: Option<Arc<dyn RunTracker>>,
    policy: FailurePolicy,
    acquisition_date: Option<NaiveDate>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipeline_type", &self.pipeline_type)
            .field("resources", &self.resources.len())
            .field("out_dir", &self.out_dir)
            .field("steps", &self.step_names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        pipeline_type: PipelineType,
        resources: Vec<ResourceDescriptor>,
        out_dir: impl Into<PathBuf>,
        steps: Vec<Arc<dyn PipelineStep>>,
    ) -> Self {
        Self {
            pipeline_type,
            resources,
            out_dir: out_dir.into(),
            steps,
            tracker: None,
            policy: FailurePolicy::default(),
            acquisition_date: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Option<Arc<dyn RunTracker>>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fix the date stamped onto rows instead of using today's.
    pub fn with_acquisition_date(mut self, date: NaiveDate) -> Self {
        self.acquisition_date = Some(date);
        self
    }

    pub fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every resource through the chain.
    ///
    /// With a `run_id` and an attached tracker, each executed step is recorded
    /// under that run. The run record itself is left to the caller.
    pub async fn run(&self, run_id: Option<Uuid>) -> Result<RunReport> {
        let mut report = RunReport {
            status: RunStatus::Success,
            message: None,
            succeeded: 0,
            failed: 0,
        };

        if self.resources.is_empty() {
            tracing::warn!(pipeline = %self.pipeline_type, "No resources configured");
            return Ok(report);
        }

        tracing::info!(
            pipeline = %self.pipeline_type,
            resources = self.resources.len(),
            steps = ?self.step_names(),
            "Starting pipeline"
        );

        for resource in &self.resources {
            match self.run_resource(resource, run_id).await? {
                None => report.succeeded += 1,
                Some(message) => {
                    report.failed += 1;
                    report.message.get_or_insert(message);
                    if self.policy == FailurePolicy::AbortRun {
                        tracing::error!(
                            pipeline = %self.pipeline_type,
                            data_source = %resource.data_source(),
                            "Aborting run after failed resource"
                        );
                        break;
                    }
                },
            }
        }

        report.status = match (report.succeeded, report.failed) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failed,
            _ if self.policy == FailurePolicy::AbortRun => RunStatus::Failed,
            _ => RunStatus::PartialSuccess,
        };

        tracing::info!(
            pipeline = %self.pipeline_type,
            status = %report.status,
            succeeded = report.succeeded,
            failed = report.failed,
            "Pipeline finished"
        );
        Ok(report)
    }

    /// `Ok(Some(message))` when a step failed for this resource.
    async fn run_resource(&self, resource: &ResourceDescriptor, run_id: Option<Uuid>) -> Result<Option<String>> {
        let data_source = resource.data_source().to_string();
        let mut ctx = PipelineContext::new(resource.clone(), &self.out_dir);
        if let Some(date) = self.acquisition_date {
            ctx = ctx.with_acquisition_date(date);
        }

        for step in &self.steps {
            let step_id = match (&self.tracker, run_id) {
                (Some(tracker), Some(run_id)) => {
                    let id = tracker.create_step(run_id, step.name(), &data_source).await?;
                    tracker.update_step(id, RunStatus::Running, None).await?;
                    Some(id)
                },
                _ => None,
            };

            tracing::debug!(data_source = %data_source, step = step.name(), "Executing step");
            let outcome = match step.execute(&mut ctx).await {
                Ok(true) => None,
                Ok(false) => Some(
                    ctx.failure
                        .clone()
                        .unwrap_or_else(|| "step returned false".to_string()),
                ),
                Err(e) => Some(e.to_string()),
            };

            if let (Some(tracker), Some(id)) = (&self.tracker, step_id) {
                match &outcome {
                    None => tracker.update_step(id, RunStatus::Success, None).await?,
                    Some(message) => tracker.update_step(id, RunStatus::Failed, Some(message)).await?,
                }
            }

            if let Some(message) = outcome {
                let message = format!("[{data_source}] {}: {message}", step.name());
                tracing::error!(pipeline = %self.pipeline_type, %message, "Step failed");
                return Ok(Some(message));
            }
        }

        tracing::info!(pipeline = %self.pipeline_type, data_source = %data_source, "Resource completed");
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{LocalFile, ResourceMeta};
    use crate::tracker::{MemoryRunTracker, RunOrigin};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records `step:data_source` for every call; fails for one data source.
    struct Probe {
        name: &'static str,
        fail_for: Option<&'static str>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PipelineStep for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: &mut PipelineContext) -> Result<bool> {
            let ds = ctx.resource.data_source().to_string();
            self.calls.lock().unwrap().push(format!("{}:{ds}", self.name));
            if self.fail_for == Some(ds.as_str()) {
                return Ok(ctx.fail("boom"));
            }
            Ok(true)
        }
    }

    fn resource(ds: &str) -> ResourceDescriptor {
        ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new(ds, "wifi_hotspots"),
            filename: format!("{ds}.csv"),
        })
    }

    fn pipeline(fail_for: Option<&'static str>, calls: &Arc<Mutex<Vec<String>>>) -> Pipeline {
        let steps: Vec<Arc<dyn PipelineStep>> = vec![
            Arc::new(Probe { name: "download", fail_for: None, calls: calls.clone() }),
            Arc::new(Probe { name: "transform", fail_for, calls: calls.clone() }),
            Arc::new(Probe { name: "import", fail_for: None, calls: calls.clone() }),
        ];
        Pipeline::new(
            PipelineType::WifiLocal,
            vec![resource("a"), resource("b"), resource("c")],
            "/tmp/unused",
            steps,
        )
    }

    #[tokio::test]
    async fn test_steps_run_in_order_per_resource() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let report = pipeline(None, &calls).run(None).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.succeeded, 3);
        assert_eq!(
            calls.lock().unwrap()[..3],
            ["download:a".to_string(), "transform:a".into(), "import:a".into()]
        );
    }

    #[tokio::test]
    async fn test_first_failure_aborts_the_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let report = pipeline(Some("b"), &calls).run(None).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.message.as_deref(), Some("[b] transform: boom"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["download:a", "transform:a", "import:a", "download:b", "transform:b"]
        );
    }

    #[tokio::test]
    async fn test_continue_policy_reports_partial_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let report = pipeline(Some("b"), &calls)
            .with_policy(FailurePolicy::ContinueWithNextResource)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::PartialSuccess);
        assert_eq!((report.succeeded, report.failed), (2, 1));
        assert!(calls.lock().unwrap().contains(&"import:c".to_string()));
    }

    #[tokio::test]
    async fn test_steps_are_tracked() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let tracker = Arc::new(MemoryRunTracker::new());
        let run_id = tracker.create_run("wifi_myspot_empera_pipeline", RunOrigin::Manual).await.unwrap();
        tracker.update_run(run_id, RunStatus::Running, None).await.unwrap();

        pipeline(Some("a"), &calls)
            .with_tracker(Some(tracker.clone()))
            .run(Some(run_id))
            .await
            .unwrap();

        let steps = tracker.steps(run_id);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, RunStatus::Success);
        assert_eq!(steps[1].step_name, "transform");
        assert_eq!(steps[1].status, RunStatus::Failed);
        assert_eq!(steps[1].message.as_deref(), Some("boom"));
        assert!(steps.iter().all(|s| s.finished_at.is_some()));
    }

    #[tokio::test]
    async fn test_no_resources_is_success() {
        let report = Pipeline::new(PipelineType::Vrn, vec![], "/tmp/unused", vec![])
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.succeeded, 0);
    }
}
