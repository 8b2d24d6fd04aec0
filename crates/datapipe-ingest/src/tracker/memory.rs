use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{stamp, PipelineRun, PipelineRunStep, RunOrigin, RunStatus, RunTracker};
use crate::error::TrackerError;

#[derive(Debug, Default)]
struct State {
    runs: HashMap<Uuid, PipelineRun>,
    /// In creation order
    steps: Vec<PipelineRunStep>,
}

/// Tracker kept in memory; used with `--no-tracking` and in tests
#[derive(Debug, Default)]
pub struct MemoryRunTracker {
    state: Mutex<State>,
}

impl MemoryRunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T, TrackerError>) -> Result<T, TrackerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TrackerError::Poisoned)?;
        f(&mut state)
    }

    pub fn run(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.with_state(|s| Ok(s.runs.get(&run_id).cloned())).ok().flatten()
    }

    pub fn runs(&self) -> Vec<PipelineRun> {
        self.with_state(|s| {
            let mut runs: Vec<PipelineRun> = s.runs.values().cloned().collect();
            runs.sort_by_key(|r| r.created_at);
            Ok(runs)
        })
        .unwrap_or_default()
    }

    pub fn steps(&self, run_id: Uuid) -> Vec<PipelineRunStep> {
        self.with_state(|s| Ok(s.steps.iter().filter(|st| st.run_id == run_id).cloned().collect()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl RunTracker for MemoryRunTracker {
    async fn create_run(&self, pipeline_name: &str, origin: RunOrigin) -> Result<Uuid, TrackerError> {
        let run = PipelineRun {
            id: Uuid::new_v4(),
            pipeline_name: pipeline_name.to_string(),
            origin,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            error_message: None,
            created_at: Utc::now(),
        };
        let id = run.id;
        self.with_state(|s| {
            s.runs.insert(id, run);
            Ok(id)
        })
    }

    async fn create_step(&self, run_id: Uuid, step_name: &str, resource: &str) -> Result<Uuid, TrackerError> {
        self.with_state(|s| {
            if !s.runs.contains_key(&run_id) {
                return Err(TrackerError::RunNotFound(run_id));
            }
            let step = PipelineRunStep {
                id: Uuid::new_v4(),
                run_id,
                step_name: step_name.to_string(),
                resource: resource.to_string(),
                status: RunStatus::Pending,
                started_at: None,
                finished_at: None,
                message: None,
            };
            let id = step.id;
            s.steps.push(step);
            Ok(id)
        })
    }

    async fn update_run(&self, run_id: Uuid, status: RunStatus, message: Option<&str>) -> Result<(), TrackerError> {
        self.with_state(|s| {
            let run = s.runs.get_mut(&run_id).ok_or(TrackerError::RunNotFound(run_id))?;
            if !run.status.can_transition_to(status) {
                return Err(TrackerError::InvalidTransition { from: run.status, to: status });
            }
            (run.started_at, run.finished_at) = stamp(status, run.started_at, run.finished_at, Utc::now());
            run.status = status;
            if let Some(message) = message {
                run.error_message = Some(message.to_string());
            }
            Ok(())
        })
    }

    async fn update_step(&self, step_id: Uuid, status: RunStatus, message: Option<&str>) -> Result<(), TrackerError> {
        self.with_state(|s| {
            let step = s
                .steps
                .iter_mut()
                .find(|st| st.id == step_id)
                .ok_or(TrackerError::StepNotFound(step_id))?;
            if !step.status.can_transition_to(status) {
                return Err(TrackerError::InvalidTransition { from: step.status, to: status });
            }
            (step.started_at, step.finished_at) = stamp(status, step.started_at, step.finished_at, Utc::now());
            step.status = status;
            if let Some(message) = message {
                step.message = Some(message.to_string());
            }
            Ok(())
        })
    }
}
