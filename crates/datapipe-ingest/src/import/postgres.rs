use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::{BTreeMap, BTreeSet};

use super::{validate_identifier, ImportBatch, ImportSummary, RowStore, DEFAULT_BATCH_SIZE, EPOCH_FIELD};
use crate::error::ImportError;
use crate::row::{FieldValue, DATA_SOURCE_FIELD, GEOMETRY_FIELD, TYPE_FIELD};

/// Postgres allows at most this many bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// SRID of all stored geometries (WGS84)
pub const SRID: i32 = 4326;

/// Row store writing into PostGIS-enabled tables
#[derive(Debug, Clone)]
pub struct PostgresRowStore {
    pool: PgPool,
    batch_size: usize,
}

impl PostgresRowStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Column name to SQL type of `table`
    async fn table_columns(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
    ) -> Result<BTreeMap<String, String>, ImportError> {
        let rows = sqlx::query(
            r#"
            SELECT a.attname::text AS name, format_type(a.atttypid, a.atttypmod) AS sql_type
            FROM pg_attribute a
            WHERE a.attrelid = $1::regclass AND a.attnum > 0 AND NOT a.attisdropped
            "#,
        )
        .bind(table)
        .fetch_all(&mut **tx)
        .await?;

        let mut columns = BTreeMap::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            let sql_type: String = row.try_get("sql_type")?;
            columns.insert(name, sql_type);
        }
        Ok(columns)
    }

    async fn insert_chunks(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch: &ImportBatch<'_>,
        columns: &[(String, String)],
        has_geometry: bool,
    ) -> Result<u64, ImportError> {
        let mut header = format!("INSERT INTO {} (", quote_table(batch.table));
        for (name, _) in columns {
            header.push_str(&quote(name));
            header.push_str(", ");
        }
        if has_geometry {
            header.push_str(&quote(GEOMETRY_FIELD));
            header.push_str(", ");
        }
        header.push_str(&quote(EPOCH_FIELD));
        header.push_str(") ");

        // Query in chunks to stay under the parameter limit
        let params_per_row = columns.len() + usize::from(has_geometry) + 1;
        let chunk_size = self.batch_size.min(MAX_BIND_PARAMS / params_per_row).max(1);

        let mut inserted = 0u64;
        for chunk in batch.rows.chunks(chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&header);
            query_builder.push_values(chunk.iter(), |mut b, row| {
                for (name, sql_type) in columns {
                    b.push("CAST(");
                    b.push_bind_unseparated(row.get(name).and_then(sql_text));
                    b.push_unseparated(format!(" AS {sql_type})"));
                }
                if has_geometry {
                    b.push("ST_GeomFromText(");
                    b.push_bind_unseparated(row.geometry.as_ref().map(|g| g.to_wkt()));
                    b.push_unseparated(format!(", {SRID})"));
                }
                b.push_bind(batch.epoch);
            });

            let result = query_builder.build().execute(&mut **tx).await?;
            inserted += result.rows_affected();
            tracing::debug!(table = %batch.table, rows = chunk.len(), "Inserted chunk");
        }
        Ok(inserted)
    }

    async fn prune(
        tx: &mut Transaction<'_, Postgres>,
        batch: &ImportBatch<'_>,
    ) -> Result<u64, ImportError> {
        let table = quote_table(batch.table);
        let source = quote(DATA_SOURCE_FIELD);
        let epoch = quote(EPOCH_FIELD);

        let result = if batch.types.is_empty() {
            let sql = format!(
                "DELETE FROM {table} WHERE ({source} = $1 AND {epoch} <> $2) \
                 OR {source} IS NULL OR {source} = ''"
            );
            sqlx::query(&sql)
                .bind(batch.data_source)
                .bind(batch.epoch)
                .execute(&mut **tx)
                .await?
        } else {
            let sql = format!(
                "DELETE FROM {table} WHERE {source} = $1 AND {epoch} <> $2 AND {} = ANY($3)",
                quote(TYPE_FIELD)
            );
            sqlx::query(&sql)
                .bind(batch.data_source)
                .bind(batch.epoch)
                .bind(batch.types.as_slice())
                .execute(&mut **tx)
                .await?
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn replace(&self, batch: &ImportBatch<'_>) -> Result<ImportSummary, ImportError> {
        validate_identifier(batch.table)?;
        if batch.rows.is_empty() {
            return Err(ImportError::NoRows);
        }

        let mut tx = self.pool.begin().await?;
        let table_columns = Self::table_columns(&mut tx, batch.table).await?;

        let present: BTreeSet<&str> = batch
            .rows
            .iter()
            .flat_map(|row| row.fields.keys().map(String::as_str))
            .collect();
        let (columns, unknown): (Vec<&str>, Vec<&str>) = present
            .into_iter()
            .filter(|name| *name != GEOMETRY_FIELD && *name != EPOCH_FIELD)
            .partition(|name| table_columns.contains_key(*name));
        if !unknown.is_empty() {
            tracing::debug!(table = %batch.table, columns = ?unknown, "Ignoring fields without a table column");
        }
        let columns: Vec<(String, String)> = columns
            .into_iter()
            .filter_map(|name| {
                let sql_type = table_columns.get(name)?;
                Some((name.to_string(), sql_type.clone()))
            })
            .collect();
        let has_geometry = table_columns.contains_key(GEOMETRY_FIELD)
            && batch.rows.iter().any(|row| row.geometry.is_some());

        let inserted = self.insert_chunks(&mut tx, batch, &columns, has_geometry).await?;
        let pruned = Self::prune(&mut tx, batch).await?;
        tx.commit().await?;

        Ok(ImportSummary { inserted, pruned })
    }
}

/// Text form handed to `CAST($n AS <column type>)`
fn sql_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::Int(i) => Some(i.to_string()),
        FieldValue::Float(f) => Some(f.to_string()),
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        FieldValue::Timestamp(t) => Some(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        FieldValue::TimestampTz(t) => Some(t.to_rfc3339()),
        FieldValue::Json(v) => Some(v.to_string()),
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_table(table: &str) -> String {
    table.split('.').map(quote).collect::<Vec<_>>().join(".")
}
