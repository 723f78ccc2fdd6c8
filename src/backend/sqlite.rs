use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, Statement};

use super::reader::{declared_schema, infer_schema, rows_to_batches, ColumnInfo, QueryResult};
use crate::error::{FlightSqlError, Result};

/// Demo tables created by `seed_example_tables`.
const SEED_SQL: &str = "
    CREATE TABLE foreignTable (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        foreignName varchar(100),
        value int);
    CREATE TABLE intTable (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        keyName varchar(100),
        value int,
        foreignId int references foreignTable(id));
    INSERT INTO foreignTable (foreignName, value) VALUES ('keyOne', 1);
    INSERT INTO foreignTable (foreignName, value) VALUES ('keyTwo', 0);
    INSERT INTO foreignTable (foreignName, value) VALUES ('keyThree', -1);
    INSERT INTO intTable (keyName, value, foreignId) VALUES ('one', 1, 1);
    INSERT INTO intTable (keyName, value, foreignId) VALUES ('zero', 0, 1);
    INSERT INTO intTable (keyName, value, foreignId) VALUES ('negative one', -1, 1);
";

/// Shape of a compiled statement, read without executing it.
#[derive(Debug, Clone)]
pub struct StatementShape {
    pub columns: Vec<ColumnInfo>,
    /// One entry per placeholder, in bind order.
    pub parameter_names: Vec<String>,
}

/// Column of a table as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub decltype: Option<String>,
    pub not_null: bool,
}

/// The single embedded engine connection. All statement execution goes
/// through this lock, so SQLite sees one caller at a time.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| FlightSqlError::Engine(format!("Failed to open SQLite: {e}")))?;

        if path != ":memory:" {
            // WAL for single-writer/multi-reader file databases
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Create and fill the `foreignTable`/`intTable` demo tables.
    pub fn seed_example_tables(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SEED_SQL)?;
        tracing::info!("Seeded example tables foreignTable and intTable");
        Ok(())
    }

    /// Run a query and collect every row.
    ///
    /// With `schema` the columns are coerced into that fixed layout (metadata
    /// commands); without it the schema comes from the declared column types,
    /// falling back to the first row's storage classes.
    pub fn execute_query(&self, sql: &str, schema: Option<&SchemaRef>) -> Result<QueryResult> {
        tracing::debug!(sql, "execute_query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns = columns_of(&stmt);
        let rows = collect_rows(&mut stmt, columns.len())?;
        finish_result(&columns, schema, rows)
    }

    /// Run a statement that returns no rows and report the changed-row count.
    pub fn execute_update(&self, sql: &str) -> Result<i64> {
        tracing::debug!(sql, "execute_update");
        let conn = self.conn.lock();
        let changed = conn.execute(sql, [])?;
        Ok(changed as i64)
    }

    /// Compile `sql` and report its output columns and placeholders.
    ///
    /// Compile failures are the caller's fault and map to `InvalidArgument`.
    pub fn describe(&self, sql: &str) -> Result<StatementShape> {
        let conn = self.conn.lock();
        let stmt = conn
            .prepare_cached(sql)
            .map_err(|e| FlightSqlError::InvalidArgument(e.to_string()))?;
        let parameter_names = (1..=stmt.parameter_count())
            .map(|i| match stmt.parameter_name(i) {
                Some(name) => name.to_string(),
                None => format!("parameter_{i}"),
            })
            .collect();
        Ok(StatementShape { columns: columns_of(&stmt), parameter_names })
    }

    /// Schema of a query's result from declared types only.
    pub fn query_schema(&self, sql: &str) -> Result<SchemaRef> {
        Ok(declared_schema(&self.describe(sql)?.columns))
    }

    /// Execute a prepared query with positional bindings (1-based, in order).
    /// Placeholders beyond `bindings` are NULL.
    pub fn query_with_bindings(&self, sql: &str, bindings: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql, bound = bindings.len(), "query_with_bindings");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        bind_all(&mut stmt, bindings)?;
        let columns = columns_of(&stmt);
        let rows = collect_rows(&mut stmt, columns.len())?;
        finish_result(&columns, None, rows)
    }

    /// Execute a prepared non-query with positional bindings.
    pub fn update_with_bindings(&self, sql: &str, bindings: &[Value]) -> Result<i64> {
        tracing::debug!(sql, bound = bindings.len(), "update_with_bindings");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        bind_all(&mut stmt, bindings)?;
        let changed = stmt.raw_execute()?;
        Ok(changed as i64)
    }

    /// Columns of `table` in declaration order. Unknown tables yield no columns.
    pub fn table_columns(&self, table: &str) -> Result<Vec<TableColumn>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT name, type, \"notnull\" FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table], |row| {
                let decltype: Option<String> = row.get(1)?;
                Ok(TableColumn {
                    name: row.get(0)?,
                    decltype: decltype.filter(|t| !t.is_empty()),
                    not_null: row.get::<_, i64>(2)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
}

fn columns_of(stmt: &Statement<'_>) -> Vec<ColumnInfo> {
    stmt.columns()
        .iter()
        .map(|c| ColumnInfo {
            name: c.name().to_string(),
            decltype: c.decl_type().map(str::to_string),
        })
        .collect()
}

fn bind_all(stmt: &mut Statement<'_>, bindings: &[Value]) -> Result<()> {
    for (i, value) in bindings.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, value)?;
    }
    Ok(())
}

fn collect_rows(stmt: &mut Statement<'_>, width: usize) -> Result<Vec<Vec<Value>>> {
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Value>(i)?);
        }
        out.push(values);
    }
    Ok(out)
}

fn finish_result(
    columns: &[ColumnInfo],
    schema: Option<&SchemaRef>,
    rows: Vec<Vec<Value>>,
) -> Result<QueryResult> {
    let schema = match schema {
        Some(s) => s.clone(),
        None => infer_schema(columns, rows.first().map(Vec::as_slice)),
    };
    let batches = rows_to_batches(&schema, &rows)?;
    tracing::debug!(rows = rows.len(), batches = batches.len(), "query finished");
    Ok(QueryResult { schema, batches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};

    fn new_backend() -> SqliteBackend {
        SqliteBackend::new(":memory:").unwrap()
    }

    fn seeded() -> SqliteBackend {
        let backend = new_backend();
        backend.seed_example_tables().unwrap();
        backend
    }

    #[test]
    fn test_backend_creates_in_memory() {
        let backend = new_backend();
        let result = backend.execute_query("SELECT 1", None).unwrap();
        assert_eq!(result.num_rows(), 1);
        // expression column: runtime fallback picks Int64
        assert_eq!(result.schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(result.batches[0].column(0).as_primitive::<Int64Type>().value(0), 1);
    }

    #[test]
    fn test_declared_types_drive_schema() {
        let backend = new_backend();
        backend
            .execute_update("CREATE TABLE t (id INTEGER, name TEXT, val REAL, data BLOB, n NUMERIC)")
            .unwrap();
        backend.execute_update("INSERT INTO t VALUES (1, 'a', 1.5, X'FF', 3)").unwrap();
        let result = backend.execute_query("SELECT id, name, val, data, n FROM t", None).unwrap();
        let types: Vec<_> = result.schema.fields().iter().map(|f| f.data_type().clone()).collect();
        assert_eq!(
            types,
            vec![DataType::Int64, DataType::Utf8, DataType::Float64, DataType::Binary, DataType::Int64]
        );
    }

    #[test]
    fn test_update_counts() {
        let backend = new_backend();
        backend.execute_update("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
        assert_eq!(backend.execute_update("INSERT INTO t VALUES (1, 'alice')").unwrap(), 1);
        backend.execute_update("INSERT INTO t VALUES (2, 'bob')").unwrap();
        assert_eq!(backend.execute_update("UPDATE t SET name = 'x'").unwrap(), 2);
        assert_eq!(backend.execute_update("DELETE FROM t WHERE id = 1").unwrap(), 1);
    }

    #[test]
    fn test_null_values() {
        let backend = new_backend();
        backend.execute_update("CREATE TABLE t (id INTEGER, val TEXT)").unwrap();
        backend.execute_update("INSERT INTO t VALUES (1, NULL)").unwrap();
        let result = backend.execute_query("SELECT val FROM t", None).unwrap();
        assert!(result.batches[0].column(0).is_null(0));
    }

    #[test]
    fn test_sql_error_keeps_engine_message() {
        let backend = new_backend();
        let err = backend.execute_query("SELECT * FROM nonexistent_table", None).unwrap_err();
        assert!(matches!(err, FlightSqlError::Engine(_)));
        assert!(err.to_string().contains("no such table"), "got: {err}");
    }

    #[test]
    fn test_fixed_schema_is_applied() {
        let backend = seeded();
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int32, true)]));
        let result = backend.execute_query("SELECT count(*) FROM intTable", Some(&schema)).unwrap();
        assert_eq!(result.schema, schema);
        assert_eq!(result.num_rows(), 1);
    }

    #[test]
    fn test_describe_reports_placeholders() {
        let backend = seeded();
        let shape = backend
            .describe("SELECT keyName FROM intTable WHERE value = ? AND id = :id")
            .unwrap();
        assert_eq!(shape.columns.len(), 1);
        assert_eq!(shape.columns[0].decltype.as_deref(), Some("varchar(100)"));
        assert_eq!(shape.parameter_names, vec!["parameter_1".to_string(), ":id".to_string()]);
    }

    #[test]
    fn test_describe_compile_error_is_invalid_argument() {
        let backend = new_backend();
        let err = backend.describe("SELEC nonsense").unwrap_err();
        assert!(matches!(err, FlightSqlError::InvalidArgument(_)));
    }

    #[test]
    fn test_query_with_bindings() {
        let backend = seeded();
        let sql = "SELECT keyName FROM intTable WHERE value = ?1";
        let result = backend.query_with_bindings(sql, &[Value::Integer(1)]).unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(result.batches[0].column(0).as_string::<i32>().value(0), "one");

        // bindings do not leak into the next execution of the cached statement
        let result = backend.query_with_bindings(sql, &[]).unwrap();
        assert_eq!(result.num_rows(), 0);
    }

    #[test]
    fn test_update_with_bindings() {
        let backend = seeded();
        let changed = backend
            .update_with_bindings(
                "INSERT INTO intTable (keyName, value) VALUES (?, ?)",
                &[Value::Text("two".into()), Value::Integer(2)],
            )
            .unwrap();
        assert_eq!(changed, 1);
        let result = backend.execute_query("SELECT count(*) FROM intTable", None).unwrap();
        assert_eq!(result.batches[0].column(0).as_primitive::<Int64Type>().value(0), 4);
    }

    #[test]
    fn test_table_columns() {
        let backend = new_backend();
        backend.execute_update("CREATE TABLE loose (a, b TEXT NOT NULL)").unwrap();
        let cols = backend.table_columns("loose").unwrap();
        assert_eq!(
            cols,
            vec![
                TableColumn { name: "a".into(), decltype: None, not_null: false },
                TableColumn { name: "b".into(), decltype: Some("TEXT".into()), not_null: true },
            ]
        );
        assert!(backend.table_columns("missing").unwrap().is_empty());
    }

    #[test]
    fn test_seed_data() {
        let backend = seeded();
        let result = backend
            .execute_query("SELECT foreignName FROM foreignTable ORDER BY id", None)
            .unwrap();
        let names = result.batches[0].column(0).as_string::<i32>();
        assert_eq!(names.value(0), "keyOne");
        assert_eq!(names.value(2), "keyThree");
    }

    #[test]
    fn test_file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let path = path.to_str().unwrap();
        {
            let backend = SqliteBackend::new(path).unwrap();
            backend.seed_example_tables().unwrap();
        }
        let backend = SqliteBackend::new(path).unwrap();
        let result = backend.execute_query("SELECT * FROM intTable", None).unwrap();
        assert_eq!(result.num_rows(), 3);
    }
}
