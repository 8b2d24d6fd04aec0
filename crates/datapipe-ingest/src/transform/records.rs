//! JSON record arrays (event feeds, gateway and node lists)

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::{artifact, read_artifact, RecordMapping, RowTransformer};
use crate::context::PipelineContext;
use crate::error::TransformError;
use crate::row::{FieldValue, NormalizedRow};

/// Reads the array at a JSON pointer; nested objects are flattened into
/// dotted field names (`location.latitude`).
#[derive(Debug, Clone)]
pub struct JsonRecordsTransformer {
    pointer: String,
    mapping: RecordMapping,
}

impl JsonRecordsTransformer {
    /// `pointer` follows RFC 6901; an empty pointer is the document root.
    pub fn new(pointer: impl Into<String>, mapping: RecordMapping) -> Self {
        Self {
            pointer: pointer.into(),
            mapping,
        }
    }
}

fn flatten_into(row: &mut NormalizedRow, prefix: &str, object: &Map<String, Value>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(row, &name, nested),
            other => row.set(name, FieldValue::from_json(other)),
        }
    }
}

impl RowTransformer for JsonRecordsTransformer {
    fn transform(
        &self,
        ctx: &PipelineContext,
        _target_model: &str,
        _acquisition_date: NaiveDate,
    ) -> Result<Vec<NormalizedRow>, TransformError> {
        let path = artifact(ctx)?;
        let doc: Value = serde_json::from_str(&read_artifact(path)?)?;
        let records = doc
            .pointer(&self.pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| TransformError::structure(path, format!("no array at {:?}", self.pointer)))?;

        let raw = records
            .iter()
            .filter_map(Value::as_object)
            .map(|object| {
                let mut row = NormalizedRow::new();
                flatten_into(&mut row, "", object);
                row
            })
            .collect();
        Ok(self.mapping.apply_all(raw, ctx.resource.meta()))
    }
}
