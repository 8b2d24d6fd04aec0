//! Delimited text tables (CSV exports, scraped article tables)

use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use super::{read_artifact, RecordMapping, RowTransformer};
use crate::context::PipelineContext;
use crate::error::TransformError;
use crate::row::{FieldValue, NormalizedRow, ACQUISITION_DATE_FIELD};

#[allow(clippy::unwrap_used)]
static DOTTED_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2}\.\d{2}\.\d{4}").unwrap());

/// Reads every downloaded table and maps its records
#[derive(Debug, Clone)]
pub struct DelimitedTableTransformer {
    delimiter: u8,
    /// Lines above the header row
    skip_rows: usize,
    /// Preamble line announcing the source's own update date
    date_marker: Option<String>,
    mapping: RecordMapping,
}

impl DelimitedTableTransformer {
    pub fn new(delimiter: u8, mapping: RecordMapping) -> Self {
        Self {
            delimiter,
            skip_rows: 0,
            date_marker: None,
            mapping,
        }
    }

    pub fn skip_rows(mut self, rows: usize) -> Self {
        self.skip_rows = rows;
        self
    }

    /// Take the acquisition date (`dd.mm.yyyy`) from the preamble line
    /// containing `marker`.
    pub fn date_from_preamble(mut self, marker: impl Into<String>) -> Self {
        self.date_marker = Some(marker.into());
        self
    }

    fn preamble_date(&self, preamble: &[&str]) -> Option<NaiveDate> {
        let marker = self.date_marker.as_deref()?;
        let line = preamble.iter().find(|l| l.contains(marker))?;
        let found = DOTTED_DATE.find(line)?;
        NaiveDate::parse_from_str(found.as_str(), "%d.%m.%Y").ok()
    }

    fn read_table(&self, path: &Path) -> Result<(Vec<NormalizedRow>, Option<NaiveDate>), TransformError> {
        let content = read_artifact(path)?;
        let content = content.trim_start_matches('\u{feff}');

        let mut lines = content.splitn(self.skip_rows + 1, '\n');
        let preamble: Vec<&str> = lines.by_ref().take(self.skip_rows).collect();
        if preamble.len() < self.skip_rows {
            return Err(TransformError::structure(
                path,
                format!("expected {} preamble lines", self.skip_rows),
            ));
        }
        let body = lines.next().unwrap_or_default();
        let source_date = self.preamble_date(&preamble);
        if self.date_marker.is_some() && source_date.is_none() {
            tracing::warn!(path = %path.display(), "No update date in preamble, using run date");
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());
        let headers = reader.headers()?.clone();

        let present: HashSet<&str> = headers.iter().collect();
        if let Some(column) = self.mapping.missing_required(&present) {
            return Err(TransformError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row = NormalizedRow::new();
            for (name, value) in headers.iter().zip(record.iter()) {
                if !name.is_empty() {
                    row.set(name, FieldValue::text(value));
                }
            }
            rows.push(row);
        }
        Ok((rows, source_date))
    }
}

impl RowTransformer for DelimitedTableTransformer {
    fn transform(
        &self,
        ctx: &PipelineContext,
        _target_model: &str,
        _acquisition_date: NaiveDate,
    ) -> Result<Vec<NormalizedRow>, TransformError> {
        if ctx.artifacts.is_empty() {
            return Err(TransformError::MissingArtifact);
        }

        let mut result = Vec::new();
        for path in &ctx.artifacts {
            let (raw, source_date) = self.read_table(path)?;
            tracing::debug!(path = %path.display(), records = raw.len(), "Read table");

            let mut rows = self.mapping.apply_all(raw, ctx.resource.meta());
            if let Some(date) = source_date {
                for row in &mut rows {
                    row.set(ACQUISITION_DATE_FIELD, date);
                }
            }
            result.extend(rows);
        }
        Ok(result)
    }
}
