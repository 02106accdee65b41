//! Error types for flowscope

use std::path::PathBuf;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that stop the pipeline or the service from starting
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{database} not found at '{}'. Set MAXMIND_ASN_DB / MAXMIND_CITY_DB or place files correctly.", .path.display())]
    MissingDatabase {
        database: &'static str,
        path: PathBuf,
    },

    #[error("failed to open {database} at '{}': {source}", .path.display())]
    OpenDatabase {
        database: &'static str,
        path: PathBuf,
        #[source]
        source: maxminddb::MaxMindDBError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single provider lookup produced nothing.
///
/// Never leaves a provider: it is logged and collapsed to "unknown".
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("address not found")]
    NotFound,

    #[error("provider not configured")]
    Unavailable,

    #[error("lookup timed out")]
    Timeout,

    #[error("{0}")]
    Backend(String),
}

impl LookupError {
    /// Short label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::NotFound => "not_found",
            LookupError::Unavailable => "unavailable",
            LookupError::Timeout => "timeout",
            LookupError::Backend(_) => "backend",
        }
    }
}

impl From<maxminddb::MaxMindDBError> for LookupError {
    fn from(err: maxminddb::MaxMindDBError) -> Self {
        match err {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => LookupError::NotFound,
            other => LookupError::Backend(other.to_string()),
        }
    }
}
