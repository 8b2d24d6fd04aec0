//! Mutual exclusion between runs of the same pipeline
//!
//! The Postgres lock uses a session-level advisory lock keyed by
//! `hashtext(<pipeline name>)`, held on a dedicated pool connection for the
//! lifetime of the guard. The local lock covers a single process.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait RunLock: Send + Sync {
    /// `Ok(None)` when another run holds the lock.
    async fn try_acquire(&self, key: &str) -> Result<Option<RunLockGuard>>;
}

enum Held {
    Local(Arc<Mutex<HashSet<String>>>),
    Postgres(Option<PoolConnection<Postgres>>),
    #[cfg(test)]
    Unreleasable,
}

/// Held lock; released by [`RunLockGuard::release`] or on drop
pub struct RunLockGuard {
    key: String,
    held: Held,
}

impl std::fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLockGuard").field("key", &self.key).finish()
    }
}

impl RunLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Guard whose release always fails
    #[cfg(test)]
    pub(crate) fn unreleasable(key: &str) -> Self {
        Self {
            key: key.to_string(),
            held: Held::Unreleasable,
        }
    }

    pub async fn release(mut self) -> Result<()> {
        #[cfg(test)]
        if matches!(self.held, Held::Unreleasable) {
            return Err(PipelineError::Lock(format!("cannot release {}", self.key)));
        }
        if let Held::Postgres(conn) = &mut self.held {
            if let Some(mut conn) = conn.take() {
                let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1))")
                    .bind(&self.key)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| PipelineError::Lock(e.to_string()))?;
                if !released {
                    tracing::warn!(key = %self.key, "Advisory lock was not held at release");
                }
            }
        }
        tracing::debug!(key = %self.key, "Run lock released");
        Ok(())
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        match &mut self.held {
            Held::Local(keys) => {
                if let Ok(mut keys) = keys.lock() {
                    keys.remove(&self.key);
                }
            },
            // Closing the session drops its advisory locks
            Held::Postgres(conn) => {
                if let Some(conn) = conn.take() {
                    drop(conn.detach());
                }
            },
            #[cfg(test)]
            Held::Unreleasable => {},
        }
    }
}

/// In-process lock keyed by pipeline name
#[derive(Debug, Clone, Default)]
pub struct LocalRunLock {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(&self, key: &str) -> Result<Option<RunLockGuard>> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| PipelineError::Lock(e.to_string()))?;
        if !keys.insert(key.to_string()) {
            return Ok(None);
        }
        Ok(Some(RunLockGuard {
            key: key.to_string(),
            held: Held::Local(self.keys.clone()),
        }))
    }
}

/// Cross-process lock on a Postgres advisory lock
#[derive(Debug, Clone)]
pub struct PgRunLock {
    pool: PgPool,
}

impl PgRunLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunLock for PgRunLock {
    async fn try_acquire(&self, key: &str) -> Result<Option<RunLockGuard>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| PipelineError::Lock(e.to_string()))?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| PipelineError::Lock(e.to_string()))?;

        if !acquired {
            return Ok(None);
        }
        tracing::debug!(key = %key, "Advisory lock acquired");
        Ok(Some(RunLockGuard {
            key: key.to_string(),
            held: Held::Postgres(Some(conn)),
        }))
    }
}
