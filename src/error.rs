use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

use crate::event::RepairEvent;

/// Crate-wide error type.
///
/// Variants mirror the failure taxonomy of the consistency engine: store
/// failures and batch-limit violations abort the current operation, while
/// `NotFound` is routinely tolerated at call sites (a referenced document
/// that was already deleted is logged and skipped, never fatal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum RegieError {
    #[error("Document store error: {0}")]
    Store(String),
    #[error("Invalid command: {0}")]
    Command(String),
    #[error("File system error: {0}")]
    Io(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)serialization error: {0}")]
    Serialization(String),
    #[error("Write batch holds {staged} operations, the store limit is {limit} per commit")]
    BatchLimit { staged: usize, limit: usize },
}

impl RegieError {
    /// True for the tolerated class of failures: the target document no
    /// longer exists. Callers use this to decide between "skip and log"
    /// and "record a warning".
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegieError::NotFound(_))
    }
}

impl From<toml::de::Error> for RegieError {
    fn from(src: toml::de::Error) -> RegieError {
        RegieError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for RegieError {
    fn from(src: toml::ser::Error) -> RegieError {
        RegieError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for RegieError {
    fn from(src: JsonError) -> RegieError {
        RegieError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for RegieError {
    fn from(src: uuid::Error) -> RegieError {
        RegieError::Serialization(format!("UUID conversion failed: {src}"))
    }
}

impl From<chrono::ParseError> for RegieError {
    fn from(src: chrono::ParseError) -> RegieError {
        RegieError::Serialization(format!("Timestamp parse failed: {src}"))
    }
}

impl From<io::Error> for RegieError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => RegieError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => RegieError::PermissionDenied,
            _ => RegieError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<TokioSendError<RepairEvent>> for RegieError {
    fn from(x: TokioSendError<RepairEvent>) -> Self {
        RegieError::Io(format!(
            "Channel send error, could not transmit progress event {:?}",
            x.0
        ))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for RegieError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::RowNotFound => RegieError::NotFound("database row not found".to_string()),
            other => RegieError::Store(format!("database error: {other:?}")),
        }
    }
}
