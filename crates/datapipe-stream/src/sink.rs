//! Bulk write targets of the buffered writer

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StreamError};
use crate::record::{FieldTestMeasurement, SensorReading};

/// Postgres allows at most this many bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Writes a batch of records in one bulk operation
#[async_trait]
pub trait BatchSink<R>: Send + Sync {
    /// Persist all `records` or none of them; returns the affected row count.
    async fn write(&self, records: &[R]) -> Result<u64>;
}

fn validate_table(name: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(StreamError::Config(format!("Invalid table name {name:?}")))
    }
}

/// Appends field tester measurements
#[derive(Debug, Clone)]
pub struct PgFieldTestSink {
    pool: PgPool,
    table: String,
}

impl PgFieldTestSink {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table(&table)?;
        Ok(Self { pool, table })
    }
}

#[async_trait]
impl BatchSink<FieldTestMeasurement> for PgFieldTestSink {
    async fn write(&self, records: &[FieldTestMeasurement]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let header = format!(
            "INSERT INTO {} (time, latitude, longitude, sats, battery, triggered, rssi, snr, uplink, downlink) ",
            self.table
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in records.chunks(MAX_BIND_PARAMS / 10) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&header);
            query_builder.push_values(chunk.iter(), |mut b, m| {
                b.push_bind(m.time)
                    .push_bind(m.latitude)
                    .push_bind(m.longitude)
                    .push_bind(m.sats)
                    .push_bind(m.battery)
                    .push_bind(m.triggered.as_deref())
                    .push_bind(m.rssi)
                    .push_bind(m.snr)
                    .push_bind(m.uplink)
                    .push_bind(m.downlink);
            });
            inserted += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        tracing::debug!(table = %self.table, records = inserted, "Inserted measurements");
        Ok(inserted)
    }
}

/// Keeps the latest reading per topic
#[derive(Debug, Clone)]
pub struct PgSensorSink {
    pool: PgPool,
    table: String,
}

impl PgSensorSink {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table(&table)?;
        Ok(Self { pool, table })
    }
}

/// Last reading per topic, in first-seen order
fn latest_per_topic(records: &[SensorReading]) -> Vec<&SensorReading> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut latest: Vec<&SensorReading> = Vec::new();
    for record in records {
        match index.get(record.topic.as_str()) {
            Some(&i) => latest[i] = record,
            None => {
                index.insert(&record.topic, latest.len());
                latest.push(record);
            },
        }
    }
    latest
}

#[async_trait]
impl BatchSink<SensorReading> for PgSensorSink {
    async fn write(&self, records: &[SensorReading]) -> Result<u64> {
        // ON CONFLICT cannot touch the same key twice in one statement
        let latest = latest_per_topic(records);
        if latest.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (topic, received_at, measured_at, payload) ",
            self.table
        ));
        query_builder.push_values(latest, |mut b, r| {
            b.push_bind(&r.topic)
                .push_bind(r.received_at)
                .push_bind(r.measured_at.as_deref())
                .push_bind(&r.payload);
        });
        query_builder.push(
            " ON CONFLICT (topic) DO UPDATE SET received_at = EXCLUDED.received_at, \
             measured_at = EXCLUDED.measured_at, payload = EXCLUDED.payload, updated_at = now()",
        );

        let upserted = query_builder.build().execute(&self.pool).await?.rows_affected();
        tracing::debug!(table = %self.table, records = upserted, "Upserted sensor readings");
        Ok(upserted)
    }
}

/// Sink for running without a database: counts flushed records and drops them
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl<R: Send + Sync> BatchSink<R> for DiscardSink {
    async fn write(&self, records: &[R]) -> Result<u64> {
        tracing::info!(count = records.len(), "Discarded flushed records, no database configured");
        Ok(records.len() as u64)
    }
}

/// In-process sink for tests, keeps every record written
#[derive(Debug)]
pub struct MemorySink<R> {
    written: Mutex<Vec<R>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl<R> Default for MemorySink<R> {
    fn default() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl<R: Clone> MemorySink<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<R> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of successful bulk writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> BatchSink<R> for MemorySink<R> {
    async fn write(&self, records: &[R]) -> Result<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StreamError::Sink("memory sink is failing".to_string()));
        }
        let mut written = self
            .written
            .lock()
            .map_err(|e| StreamError::Sink(e.to_string()))?;
        written.extend_from_slice(records);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(records.len() as u64)
    }
}
