use arrow::error::ArrowError;
use thiserror::Error;

use crate::protocol::messages::ProtocolError;

#[derive(Error, Debug)]
pub enum FlightSqlError {
    /// Unknown, already closed or malformed prepared statement handle.
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
    /// Execution failure reported by SQLite, message kept verbatim.
    #[error("{0}")]
    Engine(String),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlightSqlError>;

impl FlightSqlError {
    /// Status code carried in error frames.
    pub fn code(&self) -> &'static str {
        match self {
            FlightSqlError::NotFound(_) => "NOT_FOUND",
            FlightSqlError::InvalidArgument(_) => "INVALID_ARGUMENT",
            FlightSqlError::Engine(_) | FlightSqlError::Arrow(_) => "INTERNAL",
            FlightSqlError::Protocol(_) => "PROTOCOL",
            FlightSqlError::Io(_) => "UNAVAILABLE",
        }
    }

    /// Rebuild an error from a wire status code.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "NOT_FOUND" => FlightSqlError::NotFound(message),
            "INVALID_ARGUMENT" => FlightSqlError::InvalidArgument(message),
            "PROTOCOL" => FlightSqlError::Protocol(ProtocolError::InvalidFormat(message)),
            "UNAVAILABLE" => FlightSqlError::Io(std::io::Error::other(message)),
            _ => FlightSqlError::Engine(message),
        }
    }
}

impl From<rusqlite::Error> for FlightSqlError {
    fn from(e: rusqlite::Error) -> Self {
        FlightSqlError::Engine(e.to_string())
    }
}
