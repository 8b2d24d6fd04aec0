use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RunOrigin, RunStatus, RunTracker};
use crate::error::TrackerError;

/// Tracker persisting to `pipeline_runs` / `pipeline_run_steps`
#[derive(Debug, Clone)]
pub struct PostgresRunTracker {
    pool: PgPool,
}

impl PostgresRunTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, table: &str, id: Uuid) -> Result<Option<RunStatus>, TrackerError> {
        let status: Option<String> = sqlx::query_scalar(&format!("SELECT status FROM {table} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        // Unknown strings count as terminal
        Ok(status.map(|s| s.parse().unwrap_or(RunStatus::Failed)))
    }
}

#[async_trait]
impl RunTracker for PostgresRunTracker {
    async fn create_run(&self, pipeline_name: &str, origin: RunOrigin) -> Result<Uuid, TrackerError> {
        let run_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, pipeline_name, origin, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run_id)
        .bind(pipeline_name)
        .bind(origin.as_str())
        .bind(RunStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(run_id)
    }

    async fn create_step(&self, run_id: Uuid, step_name: &str, resource: &str) -> Result<Uuid, TrackerError> {
        let step_id = Uuid::new_v4();

        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_run_steps (id, run_id, step_name, resource, status)
            SELECT $1, id, $3, $4, $5 FROM pipeline_runs WHERE id = $2
            "#,
        )
        .bind(step_id)
        .bind(run_id)
        .bind(step_name)
        .bind(resource)
        .bind(RunStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::RunNotFound(run_id));
        }
        Ok(step_id)
    }

    async fn update_run(&self, run_id: Uuid, status: RunStatus, message: Option<&str>) -> Result<(), TrackerError> {
        let current = self
            .current_status("pipeline_runs", run_id)
            .await?
            .ok_or(TrackerError::RunNotFound(run_id))?;
        if !current.can_transition_to(status) {
            return Err(TrackerError::InvalidTransition { from: current, to: status });
        }

        // Compare-and-set against the status read above
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2,
                error_message = COALESCE($3, error_message),
                started_at = CASE WHEN $2 = 'running' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(message)
        .bind(status.is_terminal())
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::InvalidTransition { from: current, to: status });
        }
        Ok(())
    }

    async fn update_step(&self, step_id: Uuid, status: RunStatus, message: Option<&str>) -> Result<(), TrackerError> {
        let current = self
            .current_status("pipeline_run_steps", step_id)
            .await?
            .ok_or(TrackerError::StepNotFound(step_id))?;
        if !current.can_transition_to(status) {
            return Err(TrackerError::InvalidTransition { from: current, to: status });
        }

        let result = sqlx::query(
            r#"
            UPDATE pipeline_run_steps
            SET status = $2,
                message = COALESCE($3, message),
                started_at = CASE WHEN $2 = 'running' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(step_id)
        .bind(status.as_str())
        .bind(message)
        .bind(status.is_terminal())
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::InvalidTransition { from: current, to: status });
        }
        Ok(())
    }
}
