//! Error types for notegraph

use std::fmt;

use thiserror::Error;

/// Result type alias using notegraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Notegraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Entity '{0}' not found. Run `notegraph sync` to refresh the graph.")]
    EntityNotFound(String),

    #[error("Project '{0}' not found. Run `notegraph projects list` to see all projects.")]
    ProjectNotFound(String),

    // Integrity errors (E100-E199)
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(UniqueConstraint),

    #[error("Storage invariant violated: {0}")]
    InvariantViolation(String),

    // Document errors (E200-E299)
    #[error("Failed to parse document '{path}': {message}")]
    ParseError { path: String, message: String },

    // Sync errors (E300-E399)
    #[error("Sync pass cancelled")]
    Cancelled,

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntityNotFound(_) => "E001",
            Self::ProjectNotFound(_) => "E002",
            Self::UniqueViolation(_) => "E100",
            Self::InvariantViolation(_) => "E101",
            Self::ParseError { .. } => "E200",
            Self::Cancelled => "E300",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::EntityNotFound(_) => Some("notegraph sync".to_string()),
            Self::ProjectNotFound(_) => Some("notegraph projects list".to_string()),
            Self::InvariantViolation(_) => {
                Some("Report this as a bug and include the log output".to_string())
            }
            Self::ConfigError(_) => Some("notegraph config show".to_string()),
            _ => None,
        }
    }

    /// The violated unique constraint, if this is a uniqueness error
    pub fn unique_constraint(&self) -> Option<&UniqueConstraint> {
        match self {
            Self::UniqueViolation(constraint) => Some(constraint),
            _ => None,
        }
    }

    /// True when another entity already owns the file path
    pub fn is_file_path_conflict(&self) -> bool {
        matches!(self.unique_constraint(), Some(UniqueConstraint::FilePath))
    }

    /// True when another entity already owns the permalink
    pub fn is_permalink_conflict(&self) -> bool {
        matches!(self.unique_constraint(), Some(UniqueConstraint::Permalink))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
                return Self::UniqueViolation(UniqueConstraint::from_message(db_err.message()));
            }
        }
        Self::DatabaseError(err)
    }
}

/// Which uniqueness rule a write ran into
///
/// Only `FilePath` and `Permalink` are identity conflicts the sync engine
/// knows how to resolve. Anything else is reported as `Other` with the raw
/// database message and must propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueConstraint {
    FilePath,
    Permalink,
    Other(String),
}

impl UniqueConstraint {
    /// Classify a SQLite message such as
    /// `UNIQUE constraint failed: entities.project_id, entities.file_path`
    pub fn from_message(message: &str) -> Self {
        let columns: Vec<&str> = message
            .split_once(':')
            .map(|(_, cols)| cols)
            .unwrap_or(message)
            .split(',')
            .map(|col| col.trim())
            .map(|col| col.rsplit('.').next().unwrap_or(col))
            .collect();

        if columns.contains(&"file_path") {
            Self::FilePath
        } else if columns.contains(&"permalink") {
            Self::Permalink
        } else {
            Self::Other(message.to_string())
        }
    }
}

impl fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FilePath => write!(f, "file_path already in use"),
            Self::Permalink => write!(f, "permalink already in use"),
            Self::Other(message) => write!(f, "{}", message),
        }
    }
}
