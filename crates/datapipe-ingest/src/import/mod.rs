//! Import step: replace-on-import persistence
//!
//! All rows of one step invocation are written with a fresh insertion epoch,
//! then older rows of the same data source (and type discriminator, for
//! shared tables) are pruned in one statement. Readers therefore never see
//! an empty set for a source that had rows before.

mod memory;
mod postgres;

pub use memory::MemoryRowStore;
pub use postgres::PostgresRowStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::{ImportError, Result};
use crate::row::{FieldValue, NormalizedRow, TYPE_FIELD};
use crate::step::PipelineStep;

/// Column stamped with the insertion epoch
pub const EPOCH_FIELD: &str = "insert_timestamp";

/// Rows per insert statement
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Everything a store needs to replace one source's rows
#[derive(Debug, Clone)]
pub struct ImportBatch<'a> {
    pub table: &'a str,
    pub data_source: &'a str,
    /// Type discriminators present in `rows`; when non-empty the prune is
    /// restricted to them
    pub types: Vec<String>,
    pub epoch: DateTime<Utc>,
    pub rows: &'a [NormalizedRow],
}

impl<'a> ImportBatch<'a> {
    pub fn new(table: &'a str, data_source: &'a str, rows: &'a [NormalizedRow]) -> Self {
        let types: BTreeSet<String> = rows
            .iter()
            .filter_map(|row| row.get(TYPE_FIELD).and_then(FieldValue::as_str))
            .map(str::to_string)
            .collect();
        Self {
            table,
            data_source,
            types: types.into_iter().collect(),
            epoch: Utc::now(),
            rows,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: u64,
    pub pruned: u64,
}

/// Persistent target of the import step
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Insert `batch.rows` under `batch.epoch`, then prune older rows in scope.
    async fn replace(&self, batch: &ImportBatch<'_>) -> std::result::Result<ImportSummary, ImportError>;
}

/// Check a (optionally schema qualified) table name before it is spliced
/// into SQL.
pub fn validate_identifier(name: &str) -> std::result::Result<(), ImportError> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && part.len() <= 63
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(ImportError::InvalidIdentifier(name.to_string()))
    }
}

pub struct ImportStep {
    store: Arc<dyn RowStore>,
}

impl ImportStep {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineStep for ImportStep {
    fn name(&self) -> &str {
        "import"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<bool> {
        let data_source = ctx.resource.data_source().to_string();
        let table = ctx.resource.target_model().to_string();

        if ctx.rows.is_empty() {
            tracing::info!(data_source = %data_source, table = %table, "No rows to import, leaving stored rows untouched");
            return Ok(true);
        }
        if let Err(e) = validate_identifier(&table) {
            return Ok(ctx.fail(format!("Import failed: {e}")));
        }

        let batch = ImportBatch::new(&table, &data_source, &ctx.rows);
        match self.store.replace(&batch).await {
            Ok(summary) => {
                tracing::info!(
                    data_source = %data_source,
                    table = %table,
                    inserted = summary.inserted,
                    pruned = summary.pruned,
                    "Import complete"
                );
                Ok(true)
            },
            Err(e) => Ok(ctx.fail(format!("Import failed: {e}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{LocalFile, ResourceDescriptor, ResourceMeta};

    fn context(data_source: &str, table: &str, n: usize) -> PipelineContext {
        let resource = ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new(data_source, table),
            filename: "x.csv".into(),
        });
        let mut ctx = PipelineContext::new(resource, "/tmp/unused");
        ctx.rows = (0..n)
            .map(|i| {
                let mut row = NormalizedRow::new();
                row.set("name", format!("row-{i}"));
                row.set(crate::row::DATA_SOURCE_FIELD, data_source);
                row
            })
            .collect();
        ctx
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("ev_charging_stations").is_ok());
        assert!(validate_identifier("public.ev_charging_stations").is_ok());
        assert!(validate_identifier("_t1").is_ok());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("stations; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_batch_collects_types() {
        let mut a = NormalizedRow::new();
        a.set(TYPE_FIELD, "bicycle");
        let mut b = NormalizedRow::new();
        b.set(TYPE_FIELD, "car");
        let rows = vec![a.clone(), b, a];
        let batch = ImportBatch::new("parking", "kl-parking", &rows);
        assert_eq!(batch.types, vec!["bicycle".to_string(), "car".to_string()]);
    }

    #[tokio::test]
    async fn test_second_import_replaces_first() {
        let store = Arc::new(MemoryRowStore::new());
        let step = ImportStep::new(store.clone());

        assert!(step.execute(&mut context("ev-stations", "ev", 12)).await.unwrap());
        assert_eq!(store.count("ev", "ev-stations"), 12);
        assert!(step.execute(&mut context("ev-stations", "ev", 10)).await.unwrap());
        assert_eq!(store.count("ev", "ev-stations"), 10);
    }

    #[tokio::test]
    async fn test_empty_rows_are_noop() {
        let store = Arc::new(MemoryRowStore::new());
        let step = ImportStep::new(store.clone());
        step.execute(&mut context("ev-stations", "ev", 3)).await.unwrap();

        assert!(step.execute(&mut context("ev-stations", "ev", 0)).await.unwrap());
        assert_eq!(store.count("ev", "ev-stations"), 3);
    }

    #[tokio::test]
    async fn test_invalid_table_fails_step() {
        let step = ImportStep::new(Arc::new(MemoryRowStore::new()));
        let mut ctx = context("ev-stations", "ev stations", 1);
        assert!(!step.execute(&mut ctx).await.unwrap());
        assert!(ctx.failure.unwrap().contains("Invalid SQL identifier"));
    }
}
