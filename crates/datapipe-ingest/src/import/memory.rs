use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ImportBatch, ImportSummary, RowStore};
use crate::error::ImportError;
use crate::row::{FieldValue, NormalizedRow, TYPE_FIELD};

#[derive(Debug, Clone)]
struct StoredRow {
    row: NormalizedRow,
    epoch: DateTime<Utc>,
}

/// In-process store with the same replace semantics as the database, used
/// for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: Mutex<HashMap<String, Vec<StoredRow>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `table` tagged with `data_source`
    pub fn count(&self, table: &str, data_source: &str) -> usize {
        self.rows(table)
            .iter()
            .filter(|r| r.data_source() == Some(data_source))
            .count()
    }

    pub fn rows(&self, table: &str) -> Vec<NormalizedRow> {
        self.tables
            .lock()
            .map(|tables| {
                tables
                    .get(table)
                    .map(|rows| rows.iter().map(|s| s.row.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn replace(&self, batch: &ImportBatch<'_>) -> Result<ImportSummary, ImportError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|e| ImportError::Store(e.to_string()))?;
        let stored = tables.entry(batch.table.to_string()).or_default();

        stored.extend(batch.rows.iter().map(|row| StoredRow {
            row: row.clone(),
            epoch: batch.epoch,
        }));

        let before = stored.len();
        stored.retain(|s| {
            let source = s.row.data_source();
            let stale = source == Some(batch.data_source) && s.epoch != batch.epoch;
            if batch.types.is_empty() {
                !(stale || source.map_or(true, str::is_empty))
            } else {
                let row_type = s.row.get(TYPE_FIELD).and_then(FieldValue::as_str);
                !(stale && row_type.is_some_and(|t| batch.types.iter().any(|b| b == t)))
            }
        });

        Ok(ImportSummary {
            inserted: batch.rows.len() as u64,
            pruned: (before - stored.len()) as u64,
        })
    }
}
