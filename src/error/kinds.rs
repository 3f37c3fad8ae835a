use std::{fmt, io};

use crate::error::mongo::format_mongodb_error;

/// Crate-wide `Result` type using [`TransferError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Top-level error type for a transfer run.
///
/// Only the variants here can fail a whole run. Collection, batch and
/// document level problems are recorded in the run statistics instead.
#[derive(Debug)]
pub enum TransferError {
    /// Missing or invalid request parameters; the run never starts.
    Config(ConfigError),

    /// Store unreachable; the run aborts before enumeration.
    Connection(ConnectionError),

    /// Enumeration produced no collections to process.
    NoCollections(String),

    /// The batch writer was handed no target collection.
    MissingCollection,

    /// Archive packing or unpacking failed.
    Archive(ArchiveError),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// JSON encoding or decoding errors.
    Json(serde_json::Error),

    /// BSON / Extended JSON conversion errors.
    Bson(String),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// Invalid connection URI.
    InvalidUri(String),

    /// Not currently connected to MongoDB.
    NotConnected,
}

/// Configuration and request validation errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// Uploaded file rejected before the engine runs.
    RejectedUpload(String),
}

/// Archive codec errors.
#[derive(Debug)]
pub enum ArchiveError {
    /// Corrupt, truncated or unsafe archive input.
    Read(String),

    /// Destination could not be created or a source file could not be read.
    Write(String),
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Config(e) => write!(f, "Configuration error: {e}"),
            TransferError::Connection(e) => write!(f, "Connection error: {e}"),
            TransferError::NoCollections(msg) => write!(f, "{msg}"),
            TransferError::MissingCollection => write!(f, "No target collection given"),
            TransferError::Archive(e) => write!(f, "{e}"),
            TransferError::Io(e) => write!(f, "I/O error: {e}"),
            TransferError::MongoDb(e) => format_mongodb_error(f, e),
            TransferError::Json(e) => write!(f, "JSON error: {e}"),
            TransferError::Bson(msg) => write!(f, "BSON error: {msg}"),
            TransferError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
            ConnectionError::NotConnected => write!(f, "Not connected to MongoDB"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::RejectedUpload(msg) => write!(f, "Upload rejected: {msg}"),
        }
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Read(msg) => write!(f, "Archive read error: {msg}"),
            ArchiveError::Write(msg) => write!(f, "Archive write error: {msg}"),
        }
    }
}

impl std::error::Error for TransferError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ArchiveError {}

/* ========================= Conversions to TransferError ========================= */

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::Io(err)
    }
}

impl From<mongodb::error::Error> for TransferError {
    fn from(err: mongodb::error::Error) -> Self {
        TransferError::MongoDb(err)
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Json(err)
    }
}

impl From<bson::extjson::de::Error> for TransferError {
    fn from(err: bson::extjson::de::Error) -> Self {
        TransferError::Bson(err.to_string())
    }
}

impl From<bson::de::Error> for TransferError {
    fn from(err: bson::de::Error) -> Self {
        TransferError::Bson(err.to_string())
    }
}

impl From<ConnectionError> for TransferError {
    fn from(err: ConnectionError) -> Self {
        TransferError::Connection(err)
    }
}

impl From<ConfigError> for TransferError {
    fn from(err: ConfigError) -> Self {
        TransferError::Config(err)
    }
}

impl From<ArchiveError> for TransferError {
    fn from(err: ArchiveError) -> Self {
        TransferError::Archive(err)
    }
}

impl From<String> for TransferError {
    fn from(msg: String) -> Self {
        TransferError::Generic(msg)
    }
}

impl From<&str> for TransferError {
    fn from(msg: &str) -> Self {
        TransferError::Generic(msg.to_owned())
    }
}
