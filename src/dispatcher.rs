//! Command dispatch. Every command goes through one route table that says
//! where its schema comes from and how its rows are produced.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::backend::{QueryResult, SqliteBackend};
use crate::catalog::queries::{self, KeySide};
use crate::catalog::{self, tables};
use crate::error::{FlightSqlError, Result};
use crate::protocol::command::{
    Command, DoPutUpdateResult, PreparedStatementCreated, ACTION_CLOSE_PREPARED_STATEMENT,
    ACTION_CREATE_PREPARED_STATEMENT,
};
use crate::protocol::ipc::encode_schema;
use crate::statement::StatementRegistry;

/// Answer to `GetFlightInfo`. The ticket replays the command on `DoGet`.
#[derive(Debug, Clone)]
pub struct FlightInfo {
    pub schema: SchemaRef,
    pub ticket: Vec<u8>,
    /// `-1` when unknown, which is always the case here.
    pub total_records: i64,
    pub total_bytes: i64,
}

/// What a command produced.
#[derive(Debug)]
pub enum Outcome {
    Rows(QueryResult),
    RecordCount(i64),
    Created(PreparedStatementCreated),
    Closed,
}

enum Route<'a> {
    /// Zero rows of a fixed schema.
    Empty(SchemaRef),
    /// Fixed schema filled by SQL.
    Sql { schema: SchemaRef, sql: String },
    Tables { sql: String, include_schema: bool },
    SqlInfo(&'a [u32]),
    Statement(&'a str),
    Prepared(&'a str),
    /// Only reachable through `DoPut` or `DoAction`.
    NoStream(&'static str),
}

pub struct FlightSqlService {
    backend: Arc<SqliteBackend>,
    registry: StatementRegistry,
}

impl FlightSqlService {
    pub fn new(backend: Arc<SqliteBackend>) -> Self {
        Self { backend, registry: StatementRegistry::new() }
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    pub fn registry(&self) -> &StatementRegistry {
        &self.registry
    }

    fn route<'a>(&self, command: &'a Command) -> Route<'a> {
        match command {
            Command::GetCatalogs => Route::Empty(catalog::catalogs_schema()),
            Command::GetSchemas { .. } => Route::Empty(catalog::schemas_schema()),
            Command::GetTables {
                catalog,
                schema_filter_pattern,
                table_name_filter_pattern,
                table_types,
                include_schema,
            } => Route::Tables {
                sql: queries::tables_query(
                    catalog.as_deref(),
                    schema_filter_pattern.as_deref(),
                    table_name_filter_pattern.as_deref(),
                    table_types,
                ),
                include_schema: *include_schema,
            },
            Command::GetTableTypes => Route::Sql {
                schema: catalog::table_types_schema(),
                sql: queries::TABLE_TYPES_QUERY.to_string(),
            },
            Command::GetPrimaryKeys { catalog, schema, table } => Route::Sql {
                schema: catalog::primary_keys_schema(),
                sql: queries::primary_keys_query(catalog.as_deref(), schema.as_deref(), table),
            },
            Command::GetImportedKeys { catalog, schema, table } => Route::Sql {
                schema: catalog::foreign_keys_schema(),
                sql: queries::foreign_keys_query(
                    KeySide::Imported,
                    catalog.as_deref(),
                    schema.as_deref(),
                    table,
                ),
            },
            Command::GetExportedKeys { catalog, schema, table } => Route::Sql {
                schema: catalog::foreign_keys_schema(),
                sql: queries::foreign_keys_query(
                    KeySide::Exported,
                    catalog.as_deref(),
                    schema.as_deref(),
                    table,
                ),
            },
            Command::GetSqlInfo { info } => Route::SqlInfo(info),
            Command::StatementQuery { query } => Route::Statement(query),
            Command::PreparedStatementQuery { handle } => Route::Prepared(handle),
            Command::StatementUpdate { .. }
            | Command::PreparedStatementCreate { .. }
            | Command::PreparedStatementClose { .. }
            | Command::PreparedStatementUpdate { .. } => Route::NoStream(command.type_name()),
        }
    }

    fn route_schema(&self, route: &Route<'_>) -> Result<SchemaRef> {
        match route {
            Route::Empty(schema) | Route::Sql { schema, .. } => Ok(schema.clone()),
            Route::Tables { include_schema, .. } => Ok(catalog::tables_schema(*include_schema)),
            Route::SqlInfo(_) => Ok(catalog::sql_info_schema()),
            Route::Statement(sql) => self.backend.query_schema(sql),
            Route::Prepared(handle) => {
                let statement = self.registry.resolve(handle)?;
                let schema = statement.lock().dataset_schema.clone();
                Ok(schema)
            }
            Route::NoStream(name) => Err(no_stream(name)),
        }
    }

    fn produce(&self, route: Route<'_>) -> Result<QueryResult> {
        match route {
            Route::Empty(schema) => Ok(QueryResult::empty(schema)),
            Route::Sql { schema, sql } => {
                tracing::debug!(%sql, "metadata query");
                self.backend.execute_query(&sql, Some(&schema))
            }
            Route::Tables { sql, include_schema } => {
                tracing::debug!(%sql, include_schema, "tables query");
                let base = self.backend.execute_query(&sql, Some(&catalog::tables_schema(false)))?;
                if include_schema {
                    tables::with_table_schemas(&self.backend, base)
                } else {
                    Ok(base)
                }
            }
            Route::SqlInfo(info) => catalog::sql_info_result(info),
            Route::Statement(sql) => self.backend.execute_query(sql, None),
            Route::Prepared(handle) => {
                let statement = self.registry.resolve(handle)?;
                let guard = statement.lock();
                guard.execute_query(&self.backend)
            }
            Route::NoStream(name) => Err(no_stream(name)),
        }
    }

    pub fn get_flight_info(&self, command: &Command) -> Result<FlightInfo> {
        let schema = self.route_schema(&self.route(command))?;
        Ok(FlightInfo { schema, ticket: command.encode(), total_records: -1, total_bytes: -1 })
    }

    /// Replay the command carried by a ticket and return its rows.
    pub fn do_get(&self, ticket: &[u8]) -> Result<QueryResult> {
        let command = Command::decode(ticket)?;
        self.produce(self.route(&command))
    }

    /// Returns the put metadata: an encoded `DoPutUpdateResult` for updates,
    /// nothing for parameter binding.
    pub fn do_put(&self, command: &Command, batches: &[RecordBatch]) -> Result<Vec<u8>> {
        match command {
            Command::PreparedStatementQuery { handle } => {
                let statement = self.registry.resolve(handle)?;
                let rows = statement.lock().bind(batches)?;
                tracing::debug!(handle = %handle, rows, "parameters bound");
                Ok(Vec::new())
            }
            Command::StatementUpdate { .. } | Command::PreparedStatementUpdate { .. } => {
                match self.execute(command, batches)? {
                    Outcome::RecordCount(record_count) => {
                        Ok(DoPutUpdateResult { record_count }.encode())
                    }
                    _ => Err(not_accepted("DoPut", command)),
                }
            }
            _ => Err(not_accepted("DoPut", command)),
        }
    }

    pub fn do_action(&self, action_type: &str, body: &[u8]) -> Result<Vec<u8>> {
        let command = Command::decode(body)?;
        let expected = match &command {
            Command::PreparedStatementCreate { .. } => ACTION_CREATE_PREPARED_STATEMENT,
            Command::PreparedStatementClose { .. } => ACTION_CLOSE_PREPARED_STATEMENT,
            _ => return Err(not_accepted("DoAction", &command)),
        };
        if action_type != expected {
            return Err(FlightSqlError::InvalidArgument(format!(
                "Action {action_type} does not take {}",
                command.type_name()
            )));
        }
        match self.execute(&command, &[])? {
            Outcome::Created(created) => Ok(created.encode()),
            _ => Ok(Vec::new()),
        }
    }

    /// Run a command to completion. Parameter batches are only read by the
    /// prepared-statement commands; a prepared query binds them before running.
    pub fn execute(&self, command: &Command, batches: &[RecordBatch]) -> Result<Outcome> {
        match command {
            Command::StatementUpdate { query } => {
                tracing::debug!(sql = %query, "statement update");
                Ok(Outcome::RecordCount(self.backend.execute_update(query)?))
            }
            Command::PreparedStatementUpdate { handle } => {
                let statement = self.registry.resolve(handle)?;
                let count = statement.lock().execute_update(&self.backend, batches)?;
                Ok(Outcome::RecordCount(count))
            }
            Command::PreparedStatementQuery { handle } if !batches.is_empty() => {
                let statement = self.registry.resolve(handle)?;
                let mut guard = statement.lock();
                guard.bind(batches)?;
                Ok(Outcome::Rows(guard.execute_query(&self.backend)?))
            }
            Command::PreparedStatementCreate { query } => {
                let (handle, statement) = self.registry.create(&self.backend, query)?;
                let guard = statement.lock();
                Ok(Outcome::Created(PreparedStatementCreated {
                    handle,
                    dataset_schema: encode_schema(&guard.dataset_schema)?,
                    parameter_schema: encode_schema(&guard.parameter_schema)?,
                }))
            }
            Command::PreparedStatementClose { handle } => {
                self.registry.close(handle)?;
                Ok(Outcome::Closed)
            }
            _ => Ok(Outcome::Rows(self.produce(self.route(command))?)),
        }
    }
}

fn no_stream(name: &str) -> FlightSqlError {
    FlightSqlError::InvalidArgument(format!("{name} does not produce a result stream"))
}

fn not_accepted(rpc: &str, command: &Command) -> FlightSqlError {
    FlightSqlError::InvalidArgument(format!("{rpc} does not accept {}", command.type_name()))
}
