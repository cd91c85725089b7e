use std::sync::Arc;

use crate::schema::{RecordSchema, SchemaError};
use crate::value::Value;

/// A columnar batch of records sharing one schema.
///
/// This is the unit transmitted over a write stream and pulled back out of a
/// read stream. Columns are stored field-major; all columns have equal length.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    schema: Arc<RecordSchema>,
    columns: Vec<Vec<Value>>,
}

impl RecordBatch {
    /// Builds a batch from row-major values, validating every row against
    /// the schema before transposing into columns.
    pub fn from_rows(
        schema: Arc<RecordSchema>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, SchemaError> {
        let mut columns: Vec<Vec<Value>> = (0..schema.len())
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for row in rows {
            schema.validate_row(&row)?;
            for (column, value) in columns.iter_mut().zip(row.into_iter()) {
                column.push(value);
            }
        }
        Ok(RecordBatch { schema, columns })
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Extracts one row back out of the columnar layout.
    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        if index >= self.num_rows() {
            return None;
        }
        Some(self.columns.iter().map(|col| col[index].clone()).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).filter_map(|i| self.row(i))
    }

    /// Approximate encoded size of the whole batch in bytes.
    pub fn approx_bytes(&self) -> usize {
        self.columns
            .iter()
            .flat_map(|col| col.iter())
            .map(Value::encoded_size)
            .sum()
    }
}

/// A borrowed view over one decoded row, resolving values by field name.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    schema: &'a RecordSchema,
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn new(schema: &'a RecordSchema, values: &'a [Value]) -> Self {
        RowView { schema, values }
    }

    pub fn schema(&self) -> &RecordSchema {
        self.schema
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.schema
            .field_index(name)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn require(&self, name: &str) -> Result<&'a Value, SchemaError> {
        self.value(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))
    }

    /// The value of `name` when present and non-null.
    pub fn non_null(&self, name: &str) -> Option<&'a Value> {
        self.value(name).filter(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    fn schema() -> Arc<RecordSchema> {
        Arc::new(
            RecordSchema::builder()
                .field("timestamp_ns", FieldKind::Int64, false)
                .unwrap()
                .field("value", FieldKind::Float64, false)
                .unwrap()
                .build(),
        )
    }

    #[test]
    fn roundtrips_rows_through_columns() {
        let rows = vec![
            vec![Value::Int(10), Value::Float(1.0)],
            vec![Value::Int(20), Value::Float(2.0)],
        ];
        let batch = RecordBatch::from_rows(schema(), rows.clone()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.rows().collect::<Vec<_>>(), rows);
        assert!(batch.row(2).is_none());
    }

    #[test]
    fn rejects_invalid_rows() {
        let rows = vec![vec![Value::Float(1.0), Value::Float(1.0)]];
        assert!(RecordBatch::from_rows(schema(), rows).is_err());
    }

    #[test]
    fn row_view_resolves_by_name() {
        let values = vec![Value::Int(10), Value::Float(1.5)];
        let schema = schema();
        let view = RowView::new(&schema, &values);
        assert_eq!(view.value("value").and_then(Value::as_f64), Some(1.5));
        assert!(view.value("missing").is_none());
        assert!(view.require("missing").is_err());
    }
}
