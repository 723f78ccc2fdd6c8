//! Self-describing parameter and metadata values.
//!
//! SQLite placeholders carry no static type, so clients send every parameter
//! as a dense union cell and the server picks the bind call from the tag.
//! The same model encodes `GetSqlInfo` values.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Float64Array, Int32Array, Int32Builder,
    Int64Array, ListBuilder, MapBuilder, StringArray, StringBuilder, UnionArray,
};
use arrow::buffer::ScalarBuffer;
use arrow::datatypes::{
    DataType, Field, FieldRef, Fields, Float32Type, Float64Type, Int32Type, Int64Type,
    UnionFields, UnionMode,
};
use rusqlite::types::Value;

use crate::error::{FlightSqlError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    String(String),
    Bool(bool),
    BigInt(i64),
    Int32(i32),
    Double(f64),
    Bytes(Vec<u8>),
    StringList(Vec<String>),
    Int32ToInt32List(BTreeMap<i32, Vec<i32>>),
}

/// Members of the union used for prepared statement parameters.
const PARAMETER_MEMBERS: &[&str] = &["string_value", "bytes_value", "bigint_value", "double_value"];

/// Members of the union used for `GetSqlInfo` values.
const SQL_INFO_MEMBERS: &[&str] = &[
    "string_value",
    "bool_value",
    "bigint_value",
    "int32_bitmask",
    "string_list",
    "int32_to_int32_list_map",
];

fn list_of(item: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", item, true)))
}

fn int32_to_int32_list_type() -> DataType {
    let entries = Fields::from(vec![
        Field::new("keys", DataType::Int32, false),
        Field::new("values", list_of(DataType::Int32), true),
    ]);
    DataType::Map(Arc::new(Field::new("entries", DataType::Struct(entries), false)), false)
}

fn member_type(name: &str) -> DataType {
    match name {
        "string_value" => DataType::Utf8,
        "bytes_value" => DataType::Binary,
        "bool_value" => DataType::Boolean,
        "bigint_value" => DataType::Int64,
        "double_value" => DataType::Float64,
        "int32_bitmask" => DataType::Int32,
        "string_list" => list_of(DataType::Utf8),
        _ => int32_to_int32_list_type(),
    }
}

fn union_fields(members: &[&str]) -> UnionFields {
    members
        .iter()
        .enumerate()
        .map(|(i, name)| (i as i8, Arc::new(Field::new(*name, member_type(name), true)) as FieldRef))
        .collect()
}

/// Type of every parameter field: `dense_union<string, bytes, bigint, double>`.
pub fn parameter_value_type() -> DataType {
    DataType::Union(union_fields(PARAMETER_MEMBERS), UnionMode::Dense)
}

/// Type of the `value` column of `GetSqlInfo` results.
pub fn sql_info_value_type() -> DataType {
    DataType::Union(union_fields(SQL_INFO_MEMBERS), UnionMode::Dense)
}

impl TaggedValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaggedValue::String(_) => "string",
            TaggedValue::Bool(_) => "bool",
            TaggedValue::BigInt(_) => "bigint",
            TaggedValue::Int32(_) => "int32",
            TaggedValue::Double(_) => "double",
            TaggedValue::Bytes(_) => "bytes",
            TaggedValue::StringList(_) => "string_list",
            TaggedValue::Int32ToInt32List(_) => "int32_to_int32_list",
        }
    }

    fn member(&self) -> &'static str {
        match self {
            TaggedValue::String(_) => "string_value",
            TaggedValue::Bool(_) => "bool_value",
            TaggedValue::BigInt(_) => "bigint_value",
            TaggedValue::Int32(_) => "int32_bitmask",
            TaggedValue::Double(_) => "double_value",
            TaggedValue::Bytes(_) => "bytes_value",
            TaggedValue::StringList(_) => "string_list",
            TaggedValue::Int32ToInt32List(_) => "int32_to_int32_list_map",
        }
    }

    /// Native SQLite value for a bind call. Only the four scalar kinds the
    /// engine stores natively are accepted.
    pub fn to_sql_value(&self) -> Result<Value> {
        match self {
            TaggedValue::String(s) => Ok(Value::Text(s.clone())),
            TaggedValue::BigInt(n) => Ok(Value::Integer(*n)),
            TaggedValue::Double(f) => Ok(Value::Real(*f)),
            TaggedValue::Bytes(b) => Ok(Value::Blob(b.clone())),
            other => Err(unsupported(other.type_name())),
        }
    }

    /// Decode the cell at `row`. `None` means SQL NULL.
    pub fn decode(array: &dyn Array, row: usize) -> Result<Option<TaggedValue>> {
        if let DataType::Union(_, mode) = array.data_type() {
            let union = array.as_union();
            let type_id = union.type_id(row);
            let offset = match mode {
                UnionMode::Dense => union.value_offset(row),
                UnionMode::Sparse => row,
            };
            return Self::decode(union.child(type_id).as_ref(), offset);
        }
        if array.is_null(row) {
            return Ok(None);
        }
        let value = match array.data_type() {
            DataType::Utf8 => TaggedValue::String(array.as_string::<i32>().value(row).to_string()),
            DataType::LargeUtf8 => {
                TaggedValue::String(array.as_string::<i64>().value(row).to_string())
            }
            DataType::Binary => TaggedValue::Bytes(array.as_binary::<i32>().value(row).to_vec()),
            DataType::LargeBinary => {
                TaggedValue::Bytes(array.as_binary::<i64>().value(row).to_vec())
            }
            DataType::Boolean => TaggedValue::Bool(array.as_boolean().value(row)),
            DataType::Int64 => TaggedValue::BigInt(array.as_primitive::<Int64Type>().value(row)),
            DataType::Int32 => TaggedValue::Int32(array.as_primitive::<Int32Type>().value(row)),
            DataType::Float64 => {
                TaggedValue::Double(array.as_primitive::<Float64Type>().value(row))
            }
            DataType::Float32 => {
                TaggedValue::Double(array.as_primitive::<Float32Type>().value(row) as f64)
            }
            DataType::List(item) if item.data_type() == &DataType::Utf8 => {
                let list = array.as_list::<i32>().value(row);
                let strings = list.as_string::<i32>();
                TaggedValue::StringList(
                    (0..strings.len()).map(|i| strings.value(i).to_string()).collect(),
                )
            }
            DataType::Map(entries, _) if is_int32_list_entries(entries) => {
                let entries = array.as_map().value(row);
                let keys = entries.column(0).as_primitive::<Int32Type>();
                let values = entries.column(1).as_list::<i32>();
                let mut map = BTreeMap::new();
                for i in 0..entries.len() {
                    let items = values.value(i);
                    let items = items.as_primitive::<Int32Type>();
                    map.insert(keys.value(i), items.values().to_vec());
                }
                TaggedValue::Int32ToInt32List(map)
            }
            other => return Err(unsupported(&other.to_string())),
        };
        Ok(Some(value))
    }
}

fn unsupported(type_name: &str) -> FlightSqlError {
    FlightSqlError::InvalidArgument(format!("Received unsupported data type: {type_name}"))
}

/// Only `Map<Int32, List<Int32>>` decodes; other map layouts are unsupported.
fn is_int32_list_entries(entries: &FieldRef) -> bool {
    let DataType::Struct(fields) = entries.data_type() else {
        return false;
    };
    fields.len() == 2
        && fields[0].data_type() == &DataType::Int32
        && matches!(fields[1].data_type(), DataType::List(item) if item.data_type() == &DataType::Int32)
}

/// Encode values as a dense union with the parameter layout. Nulls land in
/// the `string_value` child.
pub fn encode_parameters(values: &[Option<TaggedValue>]) -> Result<ArrayRef> {
    encode_union(PARAMETER_MEMBERS, values)
}

/// Encode values as a dense union with the `GetSqlInfo` layout.
pub fn encode_sql_info(values: &[TaggedValue]) -> Result<ArrayRef> {
    let values: Vec<Option<TaggedValue>> = values.iter().cloned().map(Some).collect();
    encode_union(SQL_INFO_MEMBERS, &values)
}

fn encode_union(members: &[&'static str], values: &[Option<TaggedValue>]) -> Result<ArrayRef> {
    let mut slots: Vec<Vec<Option<&TaggedValue>>> = vec![Vec::new(); members.len()];
    let mut type_ids = Vec::with_capacity(values.len());
    let mut offsets = Vec::with_capacity(values.len());
    for value in values {
        let member = value.as_ref().map_or(members[0], TaggedValue::member);
        let slot = members.iter().position(|m| *m == member).ok_or_else(|| {
            unsupported(value.as_ref().map_or("null", TaggedValue::type_name))
        })?;
        type_ids.push(slot as i8);
        offsets.push(slots[slot].len() as i32);
        slots[slot].push(value.as_ref());
    }

    let children = members
        .iter()
        .zip(&slots)
        .map(|(member, cells)| build_child(member, cells))
        .collect::<Result<Vec<_>>>()?;
    let array = UnionArray::try_new(
        union_fields(members),
        ScalarBuffer::from(type_ids),
        Some(ScalarBuffer::from(offsets)),
        children,
    )?;
    Ok(Arc::new(array))
}

fn build_child(member: &str, cells: &[Option<&TaggedValue>]) -> Result<ArrayRef> {
    let array: ArrayRef = match member {
        "string_value" => Arc::new(StringArray::from_iter(cells.iter().map(|c| match c {
            Some(TaggedValue::String(s)) => Some(s.as_str()),
            _ => None,
        }))),
        "bytes_value" => Arc::new(BinaryArray::from_iter(cells.iter().map(|c| match c {
            Some(TaggedValue::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }))),
        "bool_value" => Arc::new(BooleanArray::from_iter(cells.iter().map(|c| match c {
            Some(TaggedValue::Bool(b)) => Some(*b),
            _ => None,
        }))),
        "bigint_value" => Arc::new(Int64Array::from_iter(cells.iter().map(|c| match c {
            Some(TaggedValue::BigInt(n)) => Some(*n),
            _ => None,
        }))),
        "double_value" => Arc::new(Float64Array::from_iter(cells.iter().map(|c| match c {
            Some(TaggedValue::Double(f)) => Some(*f),
            _ => None,
        }))),
        "int32_bitmask" => Arc::new(Int32Array::from_iter(cells.iter().map(|c| match c {
            Some(TaggedValue::Int32(n)) => Some(*n),
            _ => None,
        }))),
        "string_list" => {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for cell in cells {
                match cell {
                    Some(TaggedValue::StringList(items)) => {
                        for item in items {
                            builder.values().append_value(item);
                        }
                        builder.append(true);
                    }
                    _ => builder.append(false),
                }
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder =
                MapBuilder::new(None, Int32Builder::new(), ListBuilder::new(Int32Builder::new()));
            for cell in cells {
                if let Some(TaggedValue::Int32ToInt32List(map)) = cell {
                    for (key, items) in map.iter() {
                        builder.keys().append_value(*key);
                        builder.values().values().append_slice(items);
                        builder.values().append(true);
                    }
                    builder.append(true)?;
                } else {
                    builder.append(false)?;
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}
