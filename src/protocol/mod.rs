pub mod command;
pub mod ipc;
pub mod messages;

pub use command::{Command, DoPutUpdateResult, PreparedStatementCreated};
pub use messages::{BackendMessage, FrontendMessage, ProtocolError};
