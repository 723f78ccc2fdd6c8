use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, Float64Builder, Int32Builder, Int64Builder, NullBuilder,
    StringBuilder, UInt8Builder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use rusqlite::types::{Value, ValueRef};

use super::types::{arrow_type_for_decltype, arrow_type_for_value};

/// Rows per emitted record batch.
pub const MAX_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub decltype: Option<String>,
}

/// A fully materialized result stream: the schema plus its batches in order.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl QueryResult {
    pub fn empty(schema: SchemaRef) -> Self {
        let batch = RecordBatch::new_empty(schema.clone());
        Self { schema, batches: vec![batch] }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Schema from declared column types only (no rows looked at).
pub fn declared_schema(columns: &[ColumnInfo]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, arrow_type_for_decltype(c.decltype.as_deref()), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Schema for a result set. Declared types win; columns whose declared type
/// maps to `Null` take the storage class of the first row instead.
pub fn infer_schema(columns: &[ColumnInfo], first_row: Option<&[Value]>) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut data_type = arrow_type_for_decltype(c.decltype.as_deref());
            if data_type == DataType::Null {
                if let Some(value) = first_row.and_then(|row| row.get(i)) {
                    data_type = arrow_type_for_value(&ValueRef::from(value));
                }
            }
            Field::new(&c.name, data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Page materialized rows into batches of at most `MAX_BATCH_SIZE` rows.
pub fn rows_to_batches(schema: &SchemaRef, rows: &[Vec<Value>]) -> Result<Vec<RecordBatch>, ArrowError> {
    let mut batches = Vec::with_capacity(rows.len().div_ceil(MAX_BATCH_SIZE));
    for chunk in rows.chunks(MAX_BATCH_SIZE) {
        let mut builders = schema
            .fields()
            .iter()
            .map(|f| ColumnBuilder::new(f.data_type(), chunk.len()))
            .collect::<Result<Vec<_>, _>>()?;
        for row in chunk {
            for (i, builder) in builders.iter_mut().enumerate() {
                builder.append(row.get(i).unwrap_or(&Value::Null));
            }
        }
        let arrays: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();
        batches.push(RecordBatch::try_new(schema.clone(), arrays)?);
    }
    Ok(batches)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::Real(f) => Some(*f as i64),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Real(f) => Some(*f),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

fn value_as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Blob(b) => Some(b.clone()),
        Value::Text(s) => Some(s.as_bytes().to_vec()),
        other => value_as_string(other).map(String::into_bytes),
    }
}

/// One Arrow builder per output column. SQLite is loosely typed, so every
/// builder coerces whatever storage class it receives; values that cannot be
/// represented become nulls.
enum ColumnBuilder {
    Null(NullBuilder),
    Int64(Int64Builder),
    Int32(Int32Builder),
    UInt8(UInt8Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
}

impl ColumnBuilder {
    fn new(data_type: &DataType, capacity: usize) -> Result<Self, ArrowError> {
        Ok(match data_type {
            DataType::Null => ColumnBuilder::Null(NullBuilder::new()),
            DataType::Int64 => ColumnBuilder::Int64(Int64Builder::with_capacity(capacity)),
            DataType::Int32 => ColumnBuilder::Int32(Int32Builder::with_capacity(capacity)),
            DataType::UInt8 => ColumnBuilder::UInt8(UInt8Builder::with_capacity(capacity)),
            DataType::Float64 => ColumnBuilder::Float64(Float64Builder::with_capacity(capacity)),
            DataType::Utf8 => ColumnBuilder::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
            DataType::Binary => ColumnBuilder::Binary(BinaryBuilder::with_capacity(capacity, capacity * 16)),
            other => {
                return Err(ArrowError::NotYetImplemented(format!(
                    "SQLite data conversion to {other}"
                )))
            }
        })
    }

    fn append(&mut self, value: &Value) {
        match self {
            ColumnBuilder::Null(b) => b.append_null(),
            ColumnBuilder::Int64(b) => b.append_option(value_as_i64(value)),
            ColumnBuilder::Int32(b) => {
                b.append_option(value_as_i64(value).and_then(|n| i32::try_from(n).ok()))
            }
            ColumnBuilder::UInt8(b) => {
                b.append_option(value_as_i64(value).and_then(|n| u8::try_from(n).ok()))
            }
            ColumnBuilder::Float64(b) => b.append_option(value_as_f64(value)),
            ColumnBuilder::Utf8(b) => b.append_option(value_as_string(value)),
            ColumnBuilder::Binary(b) => b.append_option(value_as_bytes(value)),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::Null(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int32(mut b) => Arc::new(b.finish()),
            ColumnBuilder::UInt8(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Utf8(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Binary(mut b) => Arc::new(b.finish()),
        }
    }
}
