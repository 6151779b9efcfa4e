//! Error types for the vector store.

use std::path::PathBuf;
use std::sync::Arc;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by every fallible store operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("collection {0} is not configured")]
    UnknownCollection(String),

    /// An embedding failure for one record aborts the whole batch.
    #[error("failed to embed record {index} ({id}) of the batch: {source}")]
    EmbedRecord {
        index: usize,
        id: String,
        #[source]
        source: Box<Error>,
    },

    /// Failure of a deduplicated in-flight attempt, shared by every waiter.
    #[error(transparent)]
    Shared(Arc<Error>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures of the embedded LanceDB store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to open vector store at {path}: {reason}")]
    Connect { path: PathBuf, reason: String },

    #[error("LanceDB error on {table}: {reason}")]
    Table { table: String, reason: String },

    #[error("LanceDB error: {0}")]
    LanceDb(String),

    #[error("vector dimension mismatch in {table}: expected {expected}, got {actual}")]
    DimensionMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },
}

impl Error {
    /// Wrap the failure of a shared attempt. An error that is already
    /// shared is passed through instead of being nested.
    pub(crate) fn shared(error: Arc<Error>) -> Self {
        match &*error {
            Error::Shared(inner) => Error::Shared(inner.clone()),
            _ => Error::Shared(error),
        }
    }
}

impl DbError {
    pub(crate) fn table(table: &str, error: impl std::fmt::Display) -> Self {
        Self::Table {
            table: table.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Failures of the embedding collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("unknown embedding model: {0}")]
    UnknownModel(String),
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error.to_string())
    }
}
