use arrow::datatypes::DataType;
use rusqlite::types::ValueRef;

/// Map a SQLite declared column type to an Arrow type.
///
/// SQLite leaves expression columns without a declared type, and anything it
/// does not recognise falls back to `Null` rather than failing.
pub fn arrow_type_for_decltype(decltype: Option<&str>) -> DataType {
    let Some(decltype) = decltype else {
        return DataType::Null;
    };
    let lower = decltype.to_ascii_lowercase();
    match lower.as_str() {
        "int" | "integer" => DataType::Int64,
        "real" => DataType::Float64,
        "blob" => DataType::Binary,
        "text" => DataType::Utf8,
        _ if lower.starts_with("char") || lower.starts_with("varchar") => DataType::Utf8,
        _ => DataType::Null,
    }
}

/// Infer an Arrow type from a SQLite runtime value (used for columns without declared types)
pub fn arrow_type_for_value(value: &ValueRef<'_>) -> DataType {
    match value {
        ValueRef::Null => DataType::Null,
        ValueRef::Integer(_) => DataType::Int64,
        ValueRef::Real(_) => DataType::Float64,
        ValueRef::Text(_) => DataType::Utf8,
        ValueRef::Blob(_) => DataType::Binary,
    }
}
