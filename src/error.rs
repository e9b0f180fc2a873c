//! Error types for chain readers and the snapshot store

use thiserror::Error;

/// Errors surfaced by the chain readers.
///
/// Individual fetch failures are non-fatal for a reconciliation pass; the
/// reconciler decides which categories it can live without. `Pruned` is the
/// one variant drivers inspect: it signals that the node no longer serves
/// the requested height and walking further back is pointless.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("height {height} not available on node (pruned or not yet produced)")]
    Pruned { height: u64 },

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("request timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ChainError {
    /// True when the node lacks the requested historical height.
    pub fn is_pruned(&self) -> bool {
        matches!(self, ChainError::Pruned { .. })
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::Timeout
        } else {
            ChainError::Http(err)
        }
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Parse(err.to_string())
    }
}

/// Errors from the SQLite snapshot store. Corrupt stored values surface as
/// `Sqlite` conversion failures from the row mappers.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
