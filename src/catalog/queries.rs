//! SQL text for metadata commands.
//!
//! SQLite has no catalogs or schemas, so those columns are synthesized as
//! NULL. Every request-supplied value reaches the SQL through `quote_literal`.

/// Quote `value` as a SQL string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub const TABLE_TYPES_QUERY: &str = "SELECT DISTINCT type as table_type FROM sqlite_master";

/// Foreign key actions in code order: CASCADE is 0, SET DEFAULT is 4.
pub const FK_ACTIONS: [&str; 5] = ["CASCADE", "RESTRICT", "SET NULL", "NO ACTION", "SET DEFAULT"];

pub fn tables_query(
    catalog: Option<&str>,
    schema_pattern: Option<&str>,
    table_pattern: Option<&str>,
    table_types: &[String],
) -> String {
    let mut sql = String::from(
        "SELECT null as catalog_name, null as schema_name, name as table_name, \
         type as table_type FROM sqlite_master where 1=1",
    );
    if let Some(catalog) = catalog {
        sql.push_str(&format!(" and catalog_name={}", quote_literal(catalog)));
    }
    if let Some(pattern) = schema_pattern {
        sql.push_str(&format!(" and schema_name LIKE {}", quote_literal(pattern)));
    }
    if let Some(pattern) = table_pattern {
        sql.push_str(&format!(" and table_name LIKE {}", quote_literal(pattern)));
    }
    if !table_types.is_empty() {
        let types: Vec<String> = table_types.iter().map(|t| quote_literal(t)).collect();
        sql.push_str(&format!(" and table_type IN ({})", types.join(",")));
    }
    sql.push_str(" order by table_name");
    sql
}

pub fn primary_keys_query(catalog: Option<&str>, schema: Option<&str>, table: &str) -> String {
    let mut sql = String::from(
        "SELECT * FROM (SELECT null AS catalog_name, null AS schema_name, t.table_name, \
         p.name AS column_name, p.pk AS key_sequence, null AS key_name \
         FROM (SELECT name AS table_name, type AS table_type FROM sqlite_master) t \
         JOIN pragma_table_info(t.table_name) p WHERE p.pk != 0) WHERE 1=1",
    );
    if let Some(catalog) = catalog {
        sql.push_str(&format!(" AND catalog_name LIKE {}", quote_literal(catalog)));
    }
    if let Some(schema) = schema {
        sql.push_str(&format!(" AND schema_name LIKE {}", quote_literal(schema)));
    }
    sql.push_str(&format!(" AND table_name LIKE {}", quote_literal(table)));
    sql
}

/// Which side of a foreign key the table filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySide {
    /// Keys declared on the table, pointing elsewhere.
    Imported,
    /// Keys elsewhere that reference the table.
    Exported,
}

fn action_code(column: &str) -> String {
    let arms: String = FK_ACTIONS
        .iter()
        .enumerate()
        .map(|(code, action)| format!(" WHEN {} THEN {}", quote_literal(action), code))
        .collect();
    format!("CASE p.{column}{arms} END")
}

pub fn foreign_keys_query(
    side: KeySide,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: &str,
) -> String {
    let mut sql = format!(
        "SELECT * FROM (SELECT NULL AS pk_catalog_name, NULL AS pk_schema_name, \
         p.\"table\" AS pk_table_name, p.\"to\" AS pk_column_name, \
         NULL AS fk_catalog_name, NULL AS fk_schema_name, m.name AS fk_table_name, \
         p.\"from\" AS fk_column_name, p.seq AS key_sequence, \
         NULL AS fk_key_name, NULL AS pk_key_name, \
         {} AS update_rule, {} AS delete_rule \
         FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) p ON m.name != p.\"table\" \
         WHERE m.type = 'table') WHERE 1=1",
        action_code("on_update"),
        action_code("on_delete"),
    );
    let prefix = match side {
        KeySide::Imported => "fk",
        KeySide::Exported => "pk",
    };
    if let Some(catalog) = catalog {
        sql.push_str(&format!(" AND {prefix}_catalog_name = {}", quote_literal(catalog)));
    }
    if let Some(schema) = schema {
        sql.push_str(&format!(" AND {prefix}_schema_name = {}", quote_literal(schema)));
    }
    sql.push_str(&format!(" AND {prefix}_table_name = {}", quote_literal(table)));
    sql.push_str(
        " ORDER BY pk_catalog_name, pk_schema_name, pk_table_name, pk_key_name, key_sequence",
    );
    sql
}
