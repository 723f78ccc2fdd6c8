//! `GetTables` with `include_schema`: decorates the base listing with a
//! `table_schema` column carrying each table's IPC-serialized schema.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BinaryBuilder};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use super::tables_schema;
use crate::backend::types::arrow_type_for_decltype;
use crate::backend::{QueryResult, SqliteBackend};
use crate::error::Result;
use crate::protocol::ipc::encode_schema;

const TABLE_NAME_COLUMN: usize = 2;

/// Column schema of `table`, typed through the declared-type mapping.
pub fn table_schema(backend: &SqliteBackend, table: &str) -> Result<Schema> {
    let fields: Vec<Field> = backend
        .table_columns(table)?
        .into_iter()
        .map(|c| Field::new(c.name, arrow_type_for_decltype(c.decltype.as_deref()), !c.not_null))
        .collect();
    Ok(Schema::new(fields))
}

/// Append `table_schema` to every batch of a `GetTables` result.
pub fn with_table_schemas(backend: &SqliteBackend, result: QueryResult) -> Result<QueryResult> {
    let schema = tables_schema(true);
    let mut batches = Vec::with_capacity(result.batches.len());
    for batch in &result.batches {
        let names = batch.column(TABLE_NAME_COLUMN).as_string::<i32>();
        let mut encoded = BinaryBuilder::new();
        for row in 0..batch.num_rows() {
            if names.is_null(row) {
                encoded.append_null();
                continue;
            }
            let table = table_schema(backend, names.value(row))?;
            encoded.append_value(encode_schema(&table)?);
        }
        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
        columns.push(Arc::new(encoded.finish()));
        batches.push(RecordBatch::try_new(schema.clone(), columns)?);
    }
    tracing::debug!(rows = result.num_rows(), "Attached table schemas");
    Ok(QueryResult { schema, batches })
}
