pub mod reader;
pub mod sqlite;
pub mod types;

pub use reader::{ColumnInfo, QueryResult, MAX_BATCH_SIZE};
pub use sqlite::SqliteBackend;
