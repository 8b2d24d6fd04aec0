//! Run and step status tracking
//!
//! A [`PipelineRun`] is created when a pipeline is invoked and moves
//! monotonically from `pending` through `running` to one terminal status.
//! Each step executed for a resource gets its own [`PipelineRunStep`].

mod memory;
mod postgres;

pub use memory::MemoryRunTracker;
pub use postgres::PostgresRunTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackerError;

/// Status of a run or of one of its steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    PartialSuccess,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::PartialSuccess => "partial_success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    /// Statuses only move forward; terminal statuses are final.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => next != RunStatus::Pending,
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            "partial_success" => Ok(RunStatus::PartialSuccess),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// What triggered a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    #[default]
    Manual,
    Scheduled,
    Automated,
}

impl RunOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOrigin::Manual => "manual",
            RunOrigin::Scheduled => "scheduled",
            RunOrigin::Automated => "automated",
        }
    }
}

impl std::fmt::Display for RunOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of a pipeline (maps to `pipeline_runs`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_name: String,
    pub origin: RunOrigin,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One step executed for one resource (maps to `pipeline_run_steps`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_name: String,
    /// Data source of the resource the step ran for
    pub resource: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// Records run and step state
#[async_trait]
pub trait RunTracker: Send + Sync {
    async fn create_run(&self, pipeline_name: &str, origin: RunOrigin) -> Result<Uuid, TrackerError>;

    async fn create_step(&self, run_id: Uuid, step_name: &str, resource: &str) -> Result<Uuid, TrackerError>;

    /// Sets `started_at` on `running` and `finished_at` on terminal statuses.
    async fn update_run(&self, run_id: Uuid, status: RunStatus, message: Option<&str>) -> Result<(), TrackerError>;

    async fn update_step(&self, step_id: Uuid, status: RunStatus, message: Option<&str>) -> Result<(), TrackerError>;
}

/// Timestamps after moving to `next`
pub(crate) fn stamp(
    next: RunStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let started_at = if next == RunStatus::Running { Some(now) } else { started_at };
    let finished_at = if next.is_terminal() { Some(now) } else { finished_at };
    (started_at, finished_at)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL: [RunStatus; 6] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Success,
        RunStatus::Failed,
        RunStatus::Cancelled,
        RunStatus::PartialSuccess,
    ];

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Cancelled));
        assert!(RunStatus::Running.can_transition_to(RunStatus::PartialSuccess));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Running));

        for terminal in ALL.iter().filter(|s| s.is_terminal()) {
            for next in ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_stamp() {
        let now = Utc::now();
        assert_eq!(stamp(RunStatus::Running, None, None, now), (Some(now), None));
        let earlier = now - chrono::Duration::seconds(5);
        assert_eq!(
            stamp(RunStatus::Failed, Some(earlier), None, now),
            (Some(earlier), Some(now))
        );
    }
}
