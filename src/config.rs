use std::env;

pub const DEFAULT_ADDR: &str = "127.0.0.1:31337";
pub const DEFAULT_DB: &str = ":memory:";

/// Server settings, read from `FLIGHTSQLITE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub db_path: String,
    /// Create the demo `foreignTable`/`intTable` tables at startup.
    pub seed: bool,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source. Seeding defaults to on for in-memory
    /// databases only; unparseable flags fall back to that default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup("FLIGHTSQLITE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let db_path = lookup("FLIGHTSQLITE_DB").unwrap_or_else(|| DEFAULT_DB.to_string());
        let seed = lookup("FLIGHTSQLITE_SEED")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(db_path == DEFAULT_DB);
        Self { addr, db_path, seed }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
