//! Error types for data-access operations

use thiserror::Error;

/// Errors that can occur while modelling, compiling or executing tenant queries
///
/// Every validation variant is raised synchronously, before any SQL is issued,
/// and is never retried by this crate.
#[derive(Debug, Error)]
pub enum DataAccessError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Record has no identifier: {0}")]
    MissingIdentifier(String),

    #[error("Record already has an identifier: {0}")]
    AlreadyHasIdentifier(String),

    #[error("Duplicate record in batch: {0}")]
    DuplicateRecord(String),

    #[error("Invalid where clause: {0}")]
    InvalidWhereClause(String),

    #[error("Unknown organization: {0}")]
    UnknownOrganization(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid database response: {0}")]
    InvalidResponse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DataAccessError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    pub fn unknown_field(msg: impl Into<String>) -> Self {
        Self::UnknownField(msg.into())
    }

    pub fn unknown_table(msg: impl Into<String>) -> Self {
        Self::UnknownTable(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_where_clause(msg: impl Into<String>) -> Self {
        Self::InvalidWhereClause(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// True for the local validation failures of the taxonomy, as opposed to
    /// transport or database failures surfaced from the executor.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::RecordNotFound(_)
                | Self::InvalidResponse(_)
                | Self::Connection(_)
                | Self::Sql(_)
                | Self::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DataAccessError>;
