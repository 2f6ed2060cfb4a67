//! Error types for Table Store operations

use thiserror::Error;

/// SQLSTATE raised by `CREATE DATABASE` when the database already exists
pub const DUPLICATE_DATABASE: &str = "42P04";

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors that can occur during table store operations
#[derive(Debug, Error)]
pub enum TableStoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tenant error: {0}")]
    Tenant(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Type not found: {0}")]
    TypeNotFound(String),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration {version} ({name}) failed: {source}")]
    Migration {
        version: i32,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl TableStoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn tenant(msg: impl Into<String>) -> Self {
        Self::Tenant(msg.into())
    }

    pub fn table_not_found(msg: impl ToString) -> Self {
        Self::TableNotFound(msg.to_string())
    }

    pub fn column_not_found(msg: impl ToString) -> Self {
        Self::ColumnNotFound(msg.to_string())
    }

    pub fn type_not_found(msg: impl ToString) -> Self {
        Self::TypeNotFound(msg.to_string())
    }

    pub fn row_not_found(msg: impl ToString) -> Self {
        Self::RowNotFound(msg.to_string())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map constraint violations onto `Conflict`, keep everything else as `Sql`
    ///
    /// Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
    pub fn interpret(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = error {
            if let Some(code) = db.code() {
                if code == UNIQUE_VIOLATION || code == FOREIGN_KEY_VIOLATION {
                    return Self::Conflict(db.message().to_string());
                }
            }
        }
        Self::Sql(error)
    }

    /// Whether this is a not-found condition for any catalog entity or row
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TableNotFound(_)
                | Self::ColumnNotFound(_)
                | Self::TypeNotFound(_)
                | Self::RowNotFound(_)
        )
    }
}

impl From<config::ConfigError> for TableStoreError {
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

/// Whether a backend error reports that the database being created already exists
pub fn is_duplicate_database(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(DUPLICATE_DATABASE),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, TableStoreError>;
