//! Liveness file
//!
//! The publisher overwrites a single file with the current Unix epoch
//! timestamp on a fixed interval; the monitor reads it back and judges its
//! age. A consumer whose heartbeat task dies stops refreshing the file and is
//! reported stale once the age passes the threshold.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct HeartbeatPublisher {
    path: PathBuf,
    interval: Duration,
}

impl HeartbeatPublisher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current timestamp through a temp file and rename
    pub async fn beat(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, Utc::now().timestamp().to_string()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Beat immediately, then every interval until `token` is cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.beat().await {
                            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write heartbeat");
                        }
                    }
                }
            }
            tracing::debug!("Heartbeat stopped");
        })
    }
}

/// Outcome of a liveness check
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatStatus {
    Alive { age: Duration },
    Stale { age: Duration },
    Missing,
    Invalid(String),
}

impl HeartbeatStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, HeartbeatStatus::Alive { .. })
    }
}

impl std::fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatStatus::Alive { age } => write!(f, "alive (last beat {}s ago)", age.as_secs()),
            HeartbeatStatus::Stale { age } => write!(f, "stale (last beat {}s ago)", age.as_secs()),
            HeartbeatStatus::Missing => f.write_str("missing"),
            HeartbeatStatus::Invalid(content) => write!(f, "invalid content {content:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    path: PathBuf,
    max_age: Duration,
}

impl HeartbeatMonitor {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    /// Threshold used when none is configured: twice the publish interval
    pub fn default_max_age(interval_secs: u64) -> Duration {
        Duration::from_secs(interval_secs.saturating_mul(2))
    }

    pub async fn check(&self) -> Result<HeartbeatStatus> {
        self.check_at(Utc::now()).await
    }

    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<HeartbeatStatus> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HeartbeatStatus::Missing),
            Err(e) => return Err(e.into()),
        };

        let timestamp = match content.trim().parse::<f64>() {
            Ok(timestamp) if timestamp.is_finite() => timestamp,
            _ => return Ok(HeartbeatStatus::Invalid(content.trim().to_string())),
        };
        let elapsed = now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0 - timestamp;
        // A clock skewed beat from the future counts as fresh
        let Ok(age) = Duration::try_from_secs_f64(elapsed.max(0.0)) else {
            return Ok(HeartbeatStatus::Stale { age: Duration::MAX });
        };

        if age <= self.max_age {
            Ok(HeartbeatStatus::Alive { age })
        } else {
            Ok(HeartbeatStatus::Stale { age })
        }
    }
}
