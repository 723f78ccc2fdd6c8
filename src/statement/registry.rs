use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value;
use uuid::Uuid;

use super::binder::bind_batches;
use super::value::parameter_value_type;
use crate::backend::reader::{declared_schema, QueryResult};
use crate::backend::SqliteBackend;
use crate::error::{FlightSqlError, Result};

/// A compiled statement and what was derived from it at creation.
///
/// The compiled form lives in the connection's statement cache keyed by
/// `sql`; executions re-acquire it and apply `bindings`.
#[derive(Debug)]
pub struct PreparedStatement {
    pub sql: String,
    pub dataset_schema: SchemaRef,
    pub parameter_schema: SchemaRef,
    bindings: Vec<Value>,
}

impl PreparedStatement {
    pub fn parameter_count(&self) -> usize {
        self.parameter_schema.fields().len()
    }

    pub fn bindings(&self) -> &[Value] {
        &self.bindings
    }

    /// Apply parameter batches without executing. Each row overwrites the
    /// previous one, so the last row stays bound.
    pub fn bind(&mut self, batches: &[RecordBatch]) -> Result<usize> {
        let mut last = None;
        let rows = bind_batches(batches, self.parameter_count(), |row| {
            last = Some(row);
            Ok(())
        })?;
        if let Some(row) = last {
            self.bindings = row;
        }
        Ok(rows)
    }

    pub fn execute_query(&self, backend: &SqliteBackend) -> Result<QueryResult> {
        backend.query_with_bindings(&self.sql, &self.bindings)
    }

    /// Execute once per parameter row and sum the changed-row counts. With no
    /// parameter rows the statement runs once with its current bindings.
    ///
    /// Every row is decoded before the first execution, so a bad row leaves
    /// the database untouched.
    pub fn execute_update(&mut self, backend: &SqliteBackend, batches: &[RecordBatch]) -> Result<i64> {
        let mut rows = Vec::new();
        bind_batches(batches, self.parameter_count(), |row| {
            rows.push(row);
            Ok(())
        })?;
        let Some(last) = rows.pop() else {
            return backend.update_with_bindings(&self.sql, &self.bindings);
        };
        let mut total = 0;
        for row in &rows {
            total += backend.update_with_bindings(&self.sql, row)?;
        }
        total += backend.update_with_bindings(&self.sql, &last)?;
        self.bindings = last;
        Ok(total)
    }
}

pub type StatementRef = Arc<Mutex<PreparedStatement>>;

/// Handle → statement map. Handles are random UUIDs in hyphenated form.
///
/// The map lock serializes create/resolve/close; each statement's own lock
/// keeps bind and execute of one handle from interleaving.
#[derive(Default)]
pub struct StatementRegistry {
    statements: RwLock<HashMap<Uuid, StatementRef>>,
}

fn not_found(handle: &str) -> FlightSqlError {
    FlightSqlError::NotFound(format!("Prepared statement not found: {handle}"))
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, backend: &SqliteBackend, sql: &str) -> Result<(String, StatementRef)> {
        let shape = backend.describe(sql)?;
        let parameter_fields: Vec<Field> = shape
            .parameter_names
            .iter()
            .map(|name| Field::new(name, parameter_value_type(), true))
            .collect();
        let statement = PreparedStatement {
            sql: sql.to_string(),
            dataset_schema: declared_schema(&shape.columns),
            parameter_schema: Arc::new(Schema::new(parameter_fields)),
            bindings: Vec::new(),
        };

        let id = Uuid::new_v4();
        let statement = Arc::new(Mutex::new(statement));
        self.statements.write().insert(id, statement.clone());
        tracing::info!(handle = %id, params = shape.parameter_names.len(), "prepared statement created");
        Ok((id.to_string(), statement))
    }

    pub fn resolve(&self, handle: &str) -> Result<StatementRef> {
        let id = Uuid::parse_str(handle).map_err(|_| not_found(handle))?;
        self.statements.read().get(&id).cloned().ok_or_else(|| not_found(handle))
    }

    pub fn close(&self, handle: &str) -> Result<()> {
        let id = Uuid::parse_str(handle).map_err(|_| not_found(handle))?;
        match self.statements.write().remove(&id) {
            Some(_) => {
                tracing::info!(handle, "prepared statement closed");
                Ok(())
            }
            None => Err(not_found(handle)),
        }
    }

    pub fn len(&self) -> usize {
        self.statements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
