//! Self-describing command encoding.
//!
//! Every command and result body starts with a NUL-terminated type name
//! followed by its fields. Optional strings are length-prefixed with `-1`
//! for absent, lists are an `i32` count followed by the items.

use bytes::BufMut;

use super::messages::{put_blob, put_cstring, put_opt_string, Cursor, ProtocolError};

const TYPE_PREFIX: &str = "type.googleapis.com/arrow.flight.protocol.sql.";

pub const ACTION_CREATE_PREPARED_STATEMENT: &str = "CreatePreparedStatement";
pub const ACTION_CLOSE_PREPARED_STATEMENT: &str = "ClosePreparedStatement";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetCatalogs,
    GetSchemas {
        catalog: Option<String>,
        schema_filter_pattern: Option<String>,
    },
    GetTables {
        catalog: Option<String>,
        schema_filter_pattern: Option<String>,
        table_name_filter_pattern: Option<String>,
        table_types: Vec<String>,
        include_schema: bool,
    },
    GetTableTypes,
    GetPrimaryKeys {
        catalog: Option<String>,
        schema: Option<String>,
        table: String,
    },
    GetImportedKeys {
        catalog: Option<String>,
        schema: Option<String>,
        table: String,
    },
    GetExportedKeys {
        catalog: Option<String>,
        schema: Option<String>,
        table: String,
    },
    /// Empty `info` asks for every known entry.
    GetSqlInfo { info: Vec<u32> },
    StatementQuery { query: String },
    StatementUpdate { query: String },
    PreparedStatementCreate { query: String },
    PreparedStatementClose { handle: String },
    PreparedStatementQuery { handle: String },
    PreparedStatementUpdate { handle: String },
}

impl Command {
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::GetCatalogs => "CommandGetCatalogs",
            Command::GetSchemas { .. } => "CommandGetDbSchemas",
            Command::GetTables { .. } => "CommandGetTables",
            Command::GetTableTypes => "CommandGetTableTypes",
            Command::GetPrimaryKeys { .. } => "CommandGetPrimaryKeys",
            Command::GetImportedKeys { .. } => "CommandGetImportedKeys",
            Command::GetExportedKeys { .. } => "CommandGetExportedKeys",
            Command::GetSqlInfo { .. } => "CommandGetSqlInfo",
            Command::StatementQuery { .. } => "CommandStatementQuery",
            Command::StatementUpdate { .. } => "CommandStatementUpdate",
            Command::PreparedStatementCreate { .. } => "ActionCreatePreparedStatementRequest",
            Command::PreparedStatementClose { .. } => "ActionClosePreparedStatementRequest",
            Command::PreparedStatementQuery { .. } => "CommandPreparedStatementQuery",
            Command::PreparedStatementUpdate { .. } => "CommandPreparedStatementUpdate",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_cstring(&mut buf, &format!("{TYPE_PREFIX}{}", self.type_name()));
        match self {
            Command::GetCatalogs | Command::GetTableTypes => {}
            Command::GetSchemas { catalog, schema_filter_pattern } => {
                put_opt_string(&mut buf, catalog.as_deref());
                put_opt_string(&mut buf, schema_filter_pattern.as_deref());
            }
            Command::GetTables {
                catalog,
                schema_filter_pattern,
                table_name_filter_pattern,
                table_types,
                include_schema,
            } => {
                put_opt_string(&mut buf, catalog.as_deref());
                put_opt_string(&mut buf, schema_filter_pattern.as_deref());
                put_opt_string(&mut buf, table_name_filter_pattern.as_deref());
                buf.put_i32(table_types.len() as i32);
                for t in table_types {
                    put_blob(&mut buf, t.as_bytes());
                }
                buf.put_u8(u8::from(*include_schema));
            }
            Command::GetPrimaryKeys { catalog, schema, table }
            | Command::GetImportedKeys { catalog, schema, table }
            | Command::GetExportedKeys { catalog, schema, table } => {
                put_opt_string(&mut buf, catalog.as_deref());
                put_opt_string(&mut buf, schema.as_deref());
                put_blob(&mut buf, table.as_bytes());
            }
            Command::GetSqlInfo { info } => {
                buf.put_i32(info.len() as i32);
                for id in info {
                    buf.put_u32(*id);
                }
            }
            Command::StatementQuery { query }
            | Command::StatementUpdate { query }
            | Command::PreparedStatementCreate { query } => put_blob(&mut buf, query.as_bytes()),
            Command::PreparedStatementClose { handle }
            | Command::PreparedStatementQuery { handle }
            | Command::PreparedStatementUpdate { handle } => put_blob(&mut buf, handle.as_bytes()),
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor::new(bytes);
        let type_url = cur.read_cstring()?;
        let name = type_url.strip_prefix(TYPE_PREFIX).unwrap_or(&type_url);
        let command = match name {
            "CommandGetCatalogs" => Command::GetCatalogs,
            "CommandGetDbSchemas" => Command::GetSchemas {
                catalog: cur.read_opt_string()?,
                schema_filter_pattern: cur.read_opt_string()?,
            },
            "CommandGetTables" => {
                let catalog = cur.read_opt_string()?;
                let schema_filter_pattern = cur.read_opt_string()?;
                let table_name_filter_pattern = cur.read_opt_string()?;
                let count = read_count(&mut cur)?;
                let mut table_types = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    table_types.push(read_string(&mut cur)?);
                }
                let include_schema = cur.read_u8()? != 0;
                Command::GetTables {
                    catalog,
                    schema_filter_pattern,
                    table_name_filter_pattern,
                    table_types,
                    include_schema,
                }
            }
            "CommandGetTableTypes" => Command::GetTableTypes,
            "CommandGetPrimaryKeys" => {
                let (catalog, schema, table) = read_table_ref(&mut cur)?;
                Command::GetPrimaryKeys { catalog, schema, table }
            }
            "CommandGetImportedKeys" => {
                let (catalog, schema, table) = read_table_ref(&mut cur)?;
                Command::GetImportedKeys { catalog, schema, table }
            }
            "CommandGetExportedKeys" => {
                let (catalog, schema, table) = read_table_ref(&mut cur)?;
                Command::GetExportedKeys { catalog, schema, table }
            }
            "CommandGetSqlInfo" => {
                let count = read_count(&mut cur)?;
                let mut info = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    info.push(cur.read_i32()? as u32);
                }
                Command::GetSqlInfo { info }
            }
            "CommandStatementQuery" => Command::StatementQuery { query: read_string(&mut cur)? },
            "CommandStatementUpdate" => Command::StatementUpdate { query: read_string(&mut cur)? },
            "ActionCreatePreparedStatementRequest" => {
                Command::PreparedStatementCreate { query: read_string(&mut cur)? }
            }
            "ActionClosePreparedStatementRequest" => {
                Command::PreparedStatementClose { handle: read_string(&mut cur)? }
            }
            "CommandPreparedStatementQuery" => {
                Command::PreparedStatementQuery { handle: read_string(&mut cur)? }
            }
            "CommandPreparedStatementUpdate" => {
                Command::PreparedStatementUpdate { handle: read_string(&mut cur)? }
            }
            other => {
                return Err(ProtocolError::InvalidFormat(format!("Unknown command type: {other}")))
            }
        };
        Ok(command)
    }
}

fn read_count(cur: &mut Cursor<'_>) -> Result<usize, ProtocolError> {
    let count = cur.read_i32()?;
    usize::try_from(count).map_err(|_| ProtocolError::InvalidFormat(format!("Negative count {count}")))
}

fn read_string(cur: &mut Cursor<'_>) -> Result<String, ProtocolError> {
    cur.read_opt_string()?
        .ok_or_else(|| ProtocolError::InvalidFormat("Missing required string".into()))
}

fn read_table_ref(
    cur: &mut Cursor<'_>,
) -> Result<(Option<String>, Option<String>, String), ProtocolError> {
    Ok((cur.read_opt_string()?, cur.read_opt_string()?, read_string(cur)?))
}

fn expect_type(cur: &mut Cursor<'_>, name: &str) -> Result<(), ProtocolError> {
    let type_url = cur.read_cstring()?;
    if type_url.strip_prefix(TYPE_PREFIX) != Some(name) {
        return Err(ProtocolError::InvalidFormat(format!("Expected {name}, got {type_url}")));
    }
    Ok(())
}

/// Result of the `CreatePreparedStatement` action. Schemas are IPC encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatementCreated {
    pub handle: String,
    pub dataset_schema: Vec<u8>,
    pub parameter_schema: Vec<u8>,
}

impl PreparedStatementCreated {
    const TYPE_NAME: &'static str = "ActionCreatePreparedStatementResult";

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_cstring(&mut buf, &format!("{TYPE_PREFIX}{}", Self::TYPE_NAME));
        put_blob(&mut buf, self.handle.as_bytes());
        put_blob(&mut buf, &self.dataset_schema);
        put_blob(&mut buf, &self.parameter_schema);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor::new(bytes);
        expect_type(&mut cur, Self::TYPE_NAME)?;
        Ok(Self {
            handle: read_string(&mut cur)?,
            dataset_schema: cur.read_blob()?,
            parameter_schema: cur.read_blob()?,
        })
    }
}

/// Put metadata answering an update. The count never travels in the row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoPutUpdateResult {
    pub record_count: i64,
}

impl DoPutUpdateResult {
    const TYPE_NAME: &'static str = "DoPutUpdateResult";

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_cstring(&mut buf, &format!("{TYPE_PREFIX}{}", Self::TYPE_NAME));
        buf.put_i64(self.record_count);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor::new(bytes);
        expect_type(&mut cur, Self::TYPE_NAME)?;
        Ok(Self { record_count: cur.read_i64()? })
    }
}
