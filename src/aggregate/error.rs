// src/aggregate/error.rs

use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Failures of a single aggregation call, from page fetch to query result.
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("upstream fetch failed for page {page}: {source}")]
    Upstream {
        page: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A record names a currency the page library does not describe.
    #[error("currency '{currency}' is missing from the page currency library")]
    MissingReference { currency: String },

    #[error("malformed page {page}: {reason}")]
    MalformedPage { page: u32, reason: String },

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("query attempted a disallowed operation: {action}")]
    DeniedOperation { action: String },

    #[error("invalid sqlite query: {0}")]
    Syntax(String),

    #[error("query failed: {0}")]
    Runtime(String),

    #[error("table storage error: {0}")]
    Storage(String),

    #[error("aggregation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AggregateError {
    /// Stable machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            AggregateError::Upstream { .. } => "upstream_fetch_error",
            AggregateError::MissingReference { .. } => "missing_reference",
            AggregateError::MalformedPage { .. } => "malformed_page",
            AggregateError::SchemaConflict(_) => "schema_conflict",
            AggregateError::DeniedOperation { .. } => "denied_operation",
            AggregateError::Syntax(_) => "syntax_error",
            AggregateError::Runtime(_) => "runtime_error",
            AggregateError::Storage(_) => "storage_error",
            AggregateError::Timeout(_) => "timeout",
            AggregateError::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// True when the caller can fix the failure by changing the query text.
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            AggregateError::DeniedOperation { .. }
                | AggregateError::Syntax(_)
                | AggregateError::Runtime(_)
        )
    }
}

/// Returns true if the engine refused the statement through the authorizer.
pub(crate) fn is_authorization_denial(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::AuthorizationForStatementDenied
    )
}

pub type Result<T> = std::result::Result<T, AggregateError>;
