use arrow::record_batch::RecordBatch;
use rusqlite::types::Value;

use super::value::TaggedValue;
use crate::error::{FlightSqlError, Result};

/// Decode parameter batches row by row and hand each fully bound row to
/// `on_row`, positions in column order starting at 1.
///
/// Batch boundaries are transparent. A zero-row batch ends the input; later
/// batches are ignored. Nothing is executed here, `on_row` decides that.
/// Returns the number of rows bound.
pub fn bind_batches<F>(batches: &[RecordBatch], parameter_count: usize, mut on_row: F) -> Result<usize>
where
    F: FnMut(Vec<Value>) -> Result<()>,
{
    let mut bound = 0;
    for batch in batches {
        if batch.num_rows() == 0 {
            break;
        }
        if batch.num_columns() > parameter_count {
            return Err(FlightSqlError::InvalidArgument(format!(
                "Parameter batch has {} columns but the statement has {} parameters",
                batch.num_columns(),
                parameter_count
            )));
        }
        for row in 0..batch.num_rows() {
            let mut values = Vec::with_capacity(batch.num_columns());
            for column in batch.columns() {
                let value = match TaggedValue::decode(column.as_ref(), row)? {
                    Some(tagged) => tagged.to_sql_value()?,
                    None => Value::Null,
                };
                values.push(value);
            }
            on_row(values)?;
            bound += 1;
        }
    }
    tracing::debug!(rows = bound, "bound parameter rows");
    Ok(bound)
}
