//! Error taxonomy.
//!
//! Tool errors split into two classes: recoverable ones that go back to the
//! model as in-band tool results (it can adjust its next call), and store
//! failures that abort the session. Ingestion and provider errors are always
//! terminal for their operation.

use thiserror::Error;

/// Failure of one virtual shell tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}: No such file or directory")]
    NotFound(String),

    #[error("{0}: Is a directory")]
    IsDirectory(String),

    #[error("Invalid regex: {0}")]
    InvalidPattern(String),

    #[error("Invalid glob: {0}")]
    InvalidGlob(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("store query failed: {0}")]
    Store(#[from] sqlx::Error),
}

impl ToolError {
    /// Recoverable errors are reported to the model as tool results; the
    /// rest terminate the session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ToolError::Store(_))
    }
}

/// Failure of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("repository contains no ingestible files")]
    EmptyTree,

    #[error("storage write failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the model-provider collaborator. Fatal to the session.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider stream decode failed: {0}")]
    Stream(String),
}
