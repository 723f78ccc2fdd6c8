//! Metadata command results: the fixed result schemas, the SQL that fills
//! them, and the server's `GetSqlInfo` catalogue.

pub mod queries;
pub mod tables;

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::backend::QueryResult;
use crate::error::Result;
use crate::statement::value::{encode_sql_info, sql_info_value_type};
use crate::statement::TaggedValue;

fn utf8_fields(names: &[&str]) -> Vec<Field> {
    names.iter().map(|n| Field::new(*n, DataType::Utf8, true)).collect()
}

pub fn catalogs_schema() -> SchemaRef {
    Arc::new(Schema::new(utf8_fields(&["catalog_name"])))
}

pub fn schemas_schema() -> SchemaRef {
    Arc::new(Schema::new(utf8_fields(&["catalog_name", "schema_name"])))
}

pub fn tables_schema(include_schema: bool) -> SchemaRef {
    let mut fields = utf8_fields(&["catalog_name", "schema_name", "table_name", "table_type"]);
    if include_schema {
        fields.push(Field::new("table_schema", DataType::Binary, true));
    }
    Arc::new(Schema::new(fields))
}

pub fn table_types_schema() -> SchemaRef {
    Arc::new(Schema::new(utf8_fields(&["table_type"])))
}

pub fn primary_keys_schema() -> SchemaRef {
    let mut fields = utf8_fields(&["catalog_name", "schema_name", "table_name", "column_name"]);
    fields.push(Field::new("key_sequence", DataType::Int32, true));
    fields.push(Field::new("key_name", DataType::Utf8, true));
    Arc::new(Schema::new(fields))
}

/// Shared by imported and exported keys.
pub fn foreign_keys_schema() -> SchemaRef {
    let mut fields = utf8_fields(&[
        "pk_catalog_name",
        "pk_schema_name",
        "pk_table_name",
        "pk_column_name",
        "fk_catalog_name",
        "fk_schema_name",
        "fk_table_name",
        "fk_column_name",
    ]);
    fields.push(Field::new("key_sequence", DataType::Int32, true));
    fields.extend(utf8_fields(&["fk_key_name", "pk_key_name"]));
    fields.push(Field::new("update_rule", DataType::UInt8, true));
    fields.push(Field::new("delete_rule", DataType::UInt8, true));
    Arc::new(Schema::new(fields))
}

pub fn sql_info_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("info_name", DataType::UInt32, false),
        Field::new("value", sql_info_value_type(), false),
    ]))
}

// SqlInfo ids
pub const SERVER_NAME: u32 = 0;
pub const SERVER_VERSION: u32 = 1;
pub const SERVER_ARROW_VERSION: u32 = 2;
pub const SERVER_READ_ONLY: u32 = 3;
pub const SQL_DDL_CATALOG: u32 = 500;
pub const SQL_DDL_SCHEMA: u32 = 501;
pub const SQL_DDL_TABLE: u32 = 502;
pub const SQL_IDENTIFIER_CASE: u32 = 503;
pub const SQL_IDENTIFIER_QUOTE_CHAR: u32 = 504;
pub const SQL_NULL_ORDERING: u32 = 507;
pub const SQL_KEYWORDS: u32 = 508;
pub const SQL_SEARCH_STRING_ESCAPE: u32 = 513;
pub const SQL_SUPPORTS_COLUMN_ALIASING: u32 = 515;
pub const SQL_NULL_PLUS_NULL_IS_NULL: u32 = 516;
pub const SQL_SUPPORTS_CONVERT: u32 = 517;

const ARROW_VERSION: &str = "58";

// Conversion type codes used by SQL_SUPPORTS_CONVERT
const CONVERT_BIGINT: i32 = 0;
const CONVERT_FLOAT: i32 = 6;
const CONVERT_INTEGER: i32 = 7;
const CONVERT_REAL: i32 = 13;
const CONVERT_VARCHAR: i32 = 19;

/// The full catalogue, ordered by id.
pub fn sql_info_entries() -> Vec<(u32, TaggedValue)> {
    let keywords = ["ABORT", "AUTOINCREMENT", "CONFLICT", "GLOB", "PRAGMA", "REINDEX", "VACUUM"];
    let mut convert = BTreeMap::new();
    convert.insert(CONVERT_BIGINT, vec![CONVERT_INTEGER, CONVERT_REAL, CONVERT_VARCHAR]);
    convert.insert(CONVERT_INTEGER, vec![CONVERT_BIGINT, CONVERT_REAL, CONVERT_VARCHAR]);
    convert.insert(CONVERT_REAL, vec![CONVERT_FLOAT, CONVERT_VARCHAR]);
    convert.insert(CONVERT_VARCHAR, vec![CONVERT_BIGINT, CONVERT_INTEGER, CONVERT_REAL]);

    vec![
        (SERVER_NAME, TaggedValue::String(env!("CARGO_PKG_NAME").to_string())),
        (SERVER_VERSION, TaggedValue::String(env!("CARGO_PKG_VERSION").to_string())),
        (SERVER_ARROW_VERSION, TaggedValue::String(ARROW_VERSION.to_string())),
        (SERVER_READ_ONLY, TaggedValue::Bool(false)),
        (SQL_DDL_CATALOG, TaggedValue::Bool(false)),
        (SQL_DDL_SCHEMA, TaggedValue::Bool(false)),
        (SQL_DDL_TABLE, TaggedValue::Bool(true)),
        // case insensitive
        (SQL_IDENTIFIER_CASE, TaggedValue::Int32(1)),
        (SQL_IDENTIFIER_QUOTE_CHAR, TaggedValue::String("\"".to_string())),
        // nulls sorted at start
        (SQL_NULL_ORDERING, TaggedValue::Int32(2)),
        (SQL_KEYWORDS, TaggedValue::StringList(keywords.iter().map(|k| k.to_string()).collect())),
        (SQL_SEARCH_STRING_ESCAPE, TaggedValue::String("\\".to_string())),
        (SQL_SUPPORTS_COLUMN_ALIASING, TaggedValue::Bool(true)),
        (SQL_NULL_PLUS_NULL_IS_NULL, TaggedValue::Bool(true)),
        (SQL_SUPPORTS_CONVERT, TaggedValue::Int32ToInt32List(convert)),
    ]
}

/// Answer `GetSqlInfo`. An empty request means everything; unknown ids are
/// skipped. Output follows request order.
pub fn sql_info_result(requested: &[u32]) -> Result<QueryResult> {
    let entries = sql_info_entries();
    let selected: Vec<(u32, TaggedValue)> = if requested.is_empty() {
        entries
    } else {
        requested
            .iter()
            .filter_map(|id| entries.iter().find(|(e, _)| e == id).cloned())
            .collect()
    };

    let schema = sql_info_schema();
    let ids: ArrayRef = Arc::new(UInt32Array::from_iter_values(selected.iter().map(|(id, _)| *id)));
    let values: Vec<TaggedValue> = selected.into_iter().map(|(_, v)| v).collect();
    let batch = RecordBatch::try_new(schema.clone(), vec![ids, encode_sql_info(&values)?])?;
    Ok(QueryResult { schema, batches: vec![batch] })
}
