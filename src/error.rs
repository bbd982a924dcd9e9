//! Error taxonomy for the database-access layer.
//!
//! Typed variants cover conditions raised by the layer itself. Conditions a
//! driver reports in its own words (duplicate keys, missing tables, ...) are
//! carried as [`Error::Driver`] messages tagged with a well-known prefix, so
//! any driver can surface them without sharing an error hierarchy. Use
//! [`Error::category`] to classify them.
use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub const KEY_VIOLATION: &str = "Key violation: ";
pub const FIELD_NOT_FOUND: &str = "Field not found: ";
pub const TABLE_NOT_FOUND: &str = "Table not found: ";
pub const RELATION_ALREADY_EXISTS: &str = "Relation already exists: ";
pub const DATABASE_BUSY: &str = "Database busy: ";
pub const CONNECT_FAILED: &str = "Connect failed: ";

#[derive(Debug, Error)]
pub enum Error {
    /// The descriptor names a driver that was never registered.
    #[error("unknown database driver '{0}'")]
    DriverUnknown(String),

    #[error("invalid number of parameters: expected {expected}, got {got}")]
    InvalidNumberOfParameters { expected: usize, got: usize },

    /// A capability the driver or dialect does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A scalar query produced zero or more than one row.
    #[error("expected exactly one result row, got {0}")]
    NotOneResult(usize),

    #[error("transaction aborted")]
    TransactionAborted,

    /// The connection is presumed dead. Safe to handle by reopening.
    #[error("bad connection")]
    BadConnection,

    /// Reported by drivers when the physical connection dropped. The retry
    /// layer turns it into [`Error::BadConnection`] once it gives up.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("translation failed: {0}")]
    Translate(String),

    #[error("invalid connection descriptor: {0}")]
    InvalidConnDesc(String),

    #[error("driver connection already carries an open transaction")]
    TxBusy,

    #[error("database layer is not initialized")]
    NotInitialized,

    /// Driver-reported failure, possibly tagged with a category prefix.
    #[error("{0}")]
    Driver(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Categories detected by message prefix on [`Error::Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    KeyViolation,
    FieldNotFound,
    TableNotFound,
    RelationAlreadyExists,
    DatabaseBusy,
    ConnectFailed,
}

impl ErrorCategory {
    pub fn prefix(self) -> &'static str {
        match self {
            ErrorCategory::KeyViolation => KEY_VIOLATION,
            ErrorCategory::FieldNotFound => FIELD_NOT_FOUND,
            ErrorCategory::TableNotFound => TABLE_NOT_FOUND,
            ErrorCategory::RelationAlreadyExists => RELATION_ALREADY_EXISTS,
            ErrorCategory::DatabaseBusy => DATABASE_BUSY,
            ErrorCategory::ConnectFailed => CONNECT_FAILED,
        }
    }

    const ALL: [ErrorCategory; 6] = [
        ErrorCategory::KeyViolation,
        ErrorCategory::FieldNotFound,
        ErrorCategory::TableNotFound,
        ErrorCategory::RelationAlreadyExists,
        ErrorCategory::DatabaseBusy,
        ErrorCategory::ConnectFailed,
    ];
}

impl Error {
    pub fn tagged(category: ErrorCategory, msg: impl fmt::Display) -> Self {
        Error::Driver(format!("{}{}", category.prefix(), msg))
    }

    pub fn key_violation(msg: impl fmt::Display) -> Self {
        Self::tagged(ErrorCategory::KeyViolation, msg)
    }

    pub fn field_not_found(msg: impl fmt::Display) -> Self {
        Self::tagged(ErrorCategory::FieldNotFound, msg)
    }

    pub fn table_not_found(msg: impl fmt::Display) -> Self {
        Self::tagged(ErrorCategory::TableNotFound, msg)
    }

    pub fn relation_already_exists(msg: impl fmt::Display) -> Self {
        Self::tagged(ErrorCategory::RelationAlreadyExists, msg)
    }

    pub fn database_busy(msg: impl fmt::Display) -> Self {
        Self::tagged(ErrorCategory::DatabaseBusy, msg)
    }

    pub fn connect_failed(msg: impl fmt::Display) -> Self {
        Self::tagged(ErrorCategory::ConnectFailed, msg)
    }

    /// Classify a driver message by its prefix.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Error::Driver(msg) => ErrorCategory::ALL
                .into_iter()
                .find(|c| msg.starts_with(c.prefix())),
            _ => None,
        }
    }

    pub fn is_key_violation(&self) -> bool {
        self.category() == Some(ErrorCategory::KeyViolation)
    }

    pub fn is_table_not_found(&self) -> bool {
        self.category() == Some(ErrorCategory::TableNotFound)
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionLost(_))
    }
}

/// Parse or validation failure, with a 1-based location when the grammar
/// reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: Option<u64>,
    pub column: Option<u64>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: u64, column: u64) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SQL parse error: {}", self.message)?;
        if let (Some(line), Some(col)) = (self.line, self.column) {
            write!(f, " at line {}, column {}", line, col)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}
