//! Buffered bulk writer
//!
//! Records are appended under a single async mutex and written through a
//! [`BatchSink`] when the buffer reaches its maximum, on a fixed interval, and
//! once more on shutdown. A failed flush leaves the buffer as it was, so the
//! records are retried with the next flush.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::record::StreamRecord;
use crate::sink::BatchSink;

pub struct BufferedBatchWriter<R> {
    buffer: Mutex<Vec<R>>,
    sink: Arc<dyn BatchSink<R>>,
    max_buffer_size: usize,
    flush_interval: Duration,
}

impl<R: StreamRecord> BufferedBatchWriter<R> {
    pub fn new(sink: Arc<dyn BatchSink<R>>, max_buffer_size: usize, flush_interval: Duration) -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(max_buffer_size)),
            sink,
            max_buffer_size: max_buffer_size.max(1),
            flush_interval,
        }
    }

    /// Parse one message and buffer the record.
    ///
    /// Malformed payloads are logged and dropped; only a failed size-triggered
    /// flush is returned as an error.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        match R::parse(topic, payload) {
            Ok(Some(record)) => {
                self.append(record).await?;
            },
            Ok(None) => tracing::debug!(%topic, "Message without position ignored"),
            Err(e) => tracing::warn!(%topic, error = %e, "Dropping malformed message"),
        }
        Ok(())
    }

    /// Buffer `record`; flushes when the buffer is full. Returns whether a
    /// flush happened.
    pub async fn append(&self, record: R) -> Result<bool> {
        let mut buffer = self.buffer.lock().await;
        buffer.push(record);
        if buffer.len() < self.max_buffer_size {
            return Ok(false);
        }
        self.flush_locked(&mut buffer).await?;
        Ok(true)
    }

    /// Write everything buffered. Returns the number of records written.
    pub async fn flush(&self) -> Result<usize> {
        let mut buffer = self.buffer.lock().await;
        self.flush_locked(&mut buffer).await
    }

    async fn flush_locked(&self, buffer: &mut MutexGuard<'_, Vec<R>>) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let count = buffer.len();
        match self.sink.write(buffer.as_slice()).await {
            Ok(_) => {
                buffer.clear();
                tracing::info!(records = count, "Flushed buffer");
                Ok(count)
            },
            Err(e) => {
                tracing::error!(records = count, error = %e, "Flush failed, keeping buffer");
                Err(e)
            },
        }
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }

    /// Flush every `flush_interval` until `token` is cancelled
    pub fn spawn_periodic_flush(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.flush_interval;
            let mut ticker = tokio::time::interval_at(start, self.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Errors are logged by the flush itself
                        let _ = self.flush().await;
                    }
                }
            }
            tracing::debug!("Periodic flush stopped");
        })
    }
}
