use std::sync::Arc;
use tokio::net::TcpListener;
use arrow::array::{Array, ArrayRef, AsArray, BooleanArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef, UInt8Type};
use arrow::record_batch::RecordBatch;
use flightsqlite::backend::SqliteBackend;
use flightsqlite::catalog;
use flightsqlite::client::FlightSqlClient;
use flightsqlite::dispatcher::FlightSqlService;
use flightsqlite::error::FlightSqlError;
use flightsqlite::protocol::ipc::decode_schema;
use flightsqlite::protocol::Command;
use flightsqlite::server;
use flightsqlite::statement::value::encode_parameters;
use flightsqlite::statement::TaggedValue;

async fn start_test_server() -> String {
    let backend = SqliteBackend::new(":memory:").unwrap();
    backend.seed_example_tables().unwrap();
    let service = Arc::new(FlightSqlService::new(Arc::new(backend)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let service = service.clone();
            tokio::spawn(async move {
                let _ = server::handle_connection_public(stream, service).await;
            });
        }
    });

    format!("127.0.0.1:{}", port)
}

async fn connect(addr: &str) -> FlightSqlClient {
    FlightSqlClient::connect(addr).await.unwrap()
}

fn parameter_batch(schema: &SchemaRef, columns: Vec<Vec<Option<TaggedValue>>>) -> RecordBatch {
    let arrays: Vec<ArrayRef> = columns.iter().map(|c| encode_parameters(c).unwrap()).collect();
    RecordBatch::try_new(schema.clone(), arrays).unwrap()
}

fn tables(pattern: &str, include_schema: bool) -> Command {
    Command::GetTables {
        catalog: None,
        schema_filter_pattern: None,
        table_name_filter_pattern: Some(pattern.to_string()),
        table_types: vec![],
        include_schema,
    }
}

#[tokio::test]
async fn test_get_tables_with_schema() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let result = client.fetch(&tables("intTable", true)).await.unwrap();
    assert_eq!(result.schema, catalog::tables_schema(true));
    assert_eq!(result.num_rows(), 1);

    let batch = &result.batches[0];
    assert_eq!(batch.column(2).as_string::<i32>().value(0), "intTable");
    assert_eq!(batch.column(3).as_string::<i32>().value(0), "table");
    let schema = decode_schema(batch.column(4).as_binary::<i32>().value(0)).unwrap();
    let expected = Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("keyName", DataType::Utf8, true),
        Field::new("value", DataType::Int64, true),
        Field::new("foreignId", DataType::Int64, true),
    ]);
    assert_eq!(schema.as_ref(), &expected);
}

#[tokio::test]
async fn test_ticket_replay_is_stable() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let command = tables("%Table", false);
    let info = client.get_flight_info(&command).await.unwrap();
    assert_eq!(info.schema, catalog::tables_schema(false));
    let first = client.do_get(&info.ticket).await.unwrap();
    let second = client.do_get(&info.ticket).await.unwrap();
    assert_eq!(first.num_rows(), 2);
    assert_eq!(first.batches, second.batches);

    let names = first.batches[0].column(2).as_string::<i32>();
    assert_eq!(names.value(0), "foreignTable");
    assert_eq!(names.value(1), "intTable");
}

#[tokio::test]
async fn test_catalogs_are_empty() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;
    let result = client.fetch(&Command::GetCatalogs).await.unwrap();
    assert_eq!(result.schema, catalog::catalogs_schema());
    assert_eq!(result.num_rows(), 0);
}

#[tokio::test]
async fn test_foreign_keys() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let imported = Command::GetImportedKeys { catalog: None, schema: None, table: "intTable".into() };
    let result = client.fetch(&imported).await.unwrap();
    assert_eq!(result.schema, catalog::foreign_keys_schema());
    assert_eq!(result.num_rows(), 1);
    let batch = &result.batches[0];
    assert_eq!(batch.column(2).as_string::<i32>().value(0), "foreignTable");
    assert_eq!(batch.column(3).as_string::<i32>().value(0), "id");
    assert_eq!(batch.column(7).as_string::<i32>().value(0), "foreignId");
    // NO ACTION is the SQLite default
    assert_eq!(batch.column(11).as_primitive::<UInt8Type>().value(0), 3);

    let exported = Command::GetExportedKeys { catalog: None, schema: None, table: "foreignTable".into() };
    assert_eq!(client.fetch(&exported).await.unwrap().num_rows(), 1);

    let keys = Command::GetPrimaryKeys { catalog: None, schema: None, table: "foreignTable".into() };
    let result = client.fetch(&keys).await.unwrap();
    assert_eq!(result.batches[0].column(3).as_string::<i32>().value(0), "id");
}

#[tokio::test]
async fn test_sql_info() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let command = Command::GetSqlInfo { info: vec![catalog::SQL_IDENTIFIER_QUOTE_CHAR, catalog::SQL_DDL_TABLE] };
    let result = client.fetch(&command).await.unwrap();
    assert_eq!(result.schema, catalog::sql_info_schema());
    let batch = &result.batches[0];
    assert_eq!(batch.num_rows(), 2);
    let values = batch.column(1);
    assert_eq!(TaggedValue::decode(values.as_ref(), 0).unwrap(), Some(TaggedValue::String("\"".into())));
    assert_eq!(TaggedValue::decode(values.as_ref(), 1).unwrap(), Some(TaggedValue::Bool(true)));

    let all = client.fetch(&Command::GetSqlInfo { info: vec![] }).await.unwrap();
    assert_eq!(all.num_rows(), catalog::sql_info_entries().len());
}

#[tokio::test]
async fn test_statement_query_and_update() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let count = client.execute_update("UPDATE intTable SET value = value * 10 WHERE value != 0").await.unwrap();
    assert_eq!(count, 2);

    let result = client.execute("SELECT value FROM intTable ORDER BY id").await.unwrap();
    let values = result.batches[0].column(0).as_primitive::<Int64Type>();
    assert_eq!(values.values().to_vec(), vec![10, 0, -10]);
}

#[tokio::test]
async fn test_prepared_query_with_parameter() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let prepared = client.prepare("SELECT * FROM intTable WHERE value = ?1").await.unwrap();
    assert_eq!(prepared.dataset_schema.fields().len(), 4);
    assert_eq!(prepared.parameter_schema.fields().len(), 1);

    let batch = parameter_batch(&prepared.parameter_schema, vec![vec![Some(TaggedValue::BigInt(1))]]);
    let result = client.execute_prepared(&prepared.handle, &[batch]).await.unwrap();
    assert_eq!(result.num_rows(), 1);
    assert_eq!(result.batches[0].column(1).as_string::<i32>().value(0), "one");

    // bindings persist until replaced
    let again = client.execute_prepared(&prepared.handle, &[]).await.unwrap();
    assert_eq!(again.num_rows(), 1);

    client.close_prepared(&prepared.handle).await.unwrap();
}

#[tokio::test]
async fn test_prepared_update_sums_counts() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let prepared = client.prepare("INSERT INTO intTable (keyName, value) VALUES (?, ?)").await.unwrap();
    let names: Vec<&str> = prepared.parameter_schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["parameter_1", "parameter_2"]);

    let batch = parameter_batch(
        &prepared.parameter_schema,
        vec![
            vec![Some(TaggedValue::String("two".into())), Some(TaggedValue::String("three".into())), None],
            vec![Some(TaggedValue::BigInt(2)), Some(TaggedValue::BigInt(3)), Some(TaggedValue::BigInt(4))],
        ],
    );
    let count = client.execute_prepared_update(&prepared.handle, &[batch]).await.unwrap();
    assert_eq!(count, 3);

    // no parameter rows: runs once with the last bound row
    let count = client.execute_prepared_update(&prepared.handle, &[]).await.unwrap();
    assert_eq!(count, 1);

    let result = client.execute("SELECT keyName FROM intTable WHERE value = 4").await.unwrap();
    let names = result.batches[0].column(0);
    assert_eq!(names.len(), 2);
    assert!(names.is_null(0));
}

#[tokio::test]
async fn test_unsupported_parameter_type() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let prepared = client.prepare("SELECT * FROM intTable WHERE keyName = ?").await.unwrap();
    let schema = Arc::new(Schema::new(vec![Field::new("flag", DataType::Boolean, true)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(BooleanArray::from(vec![true])) as ArrayRef]).unwrap();

    let err = client.execute_prepared(&prepared.handle, &[batch]).await.unwrap_err();
    assert!(matches!(err, FlightSqlError::InvalidArgument(_)));
    assert_eq!(err.to_string(), "Received unsupported data type: bool");
}

#[tokio::test]
async fn test_errors_keep_connection_open() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let err = client.execute("SELECT * FROM missing_table").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
    assert!(err.to_string().contains("no such table: missing_table"), "{}", err);

    let err = client.prepare("SELEC 1").await.unwrap_err();
    assert!(matches!(err, FlightSqlError::InvalidArgument(_)));

    let result = client.execute("SELECT 1").await.unwrap();
    assert_eq!(result.num_rows(), 1);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_handle_is_not_found() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;

    let prepared = client.prepare("SELECT 1").await.unwrap();
    client.close_prepared(&prepared.handle).await.unwrap();

    let err = client.close_prepared(&prepared.handle).await.unwrap_err();
    assert!(matches!(err, FlightSqlError::NotFound(_)));
    let err = client.execute_prepared(&prepared.handle, &[]).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    let err = client.close_prepared("not-a-handle").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_concurrent_close_has_one_winner() {
    let addr = start_test_server().await;
    let mut client = connect(&addr).await;
    let prepared = client.prepare("SELECT * FROM foreignTable").await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let addr = addr.clone();
        let handle = prepared.handle.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = connect(&addr).await;
            client.close_prepared(&handle).await.is_ok()
        }));
    }
    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_handles_are_shared_across_connections() {
    let addr = start_test_server().await;
    let mut first = connect(&addr).await;
    let mut second = connect(&addr).await;

    let prepared = first.prepare("SELECT keyName FROM intTable ORDER BY id").await.unwrap();
    let result = second.execute_prepared(&prepared.handle, &[]).await.unwrap();
    assert_eq!(result.num_rows(), 3);
    second.close_prepared(&prepared.handle).await.unwrap();
    assert_eq!(first.close_prepared(&prepared.handle).await.unwrap_err().code(), "NOT_FOUND");
}
