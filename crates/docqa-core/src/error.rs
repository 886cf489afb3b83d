use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No document has been ingested yet; upload a document first")]
    NoDocumentIngested,

    #[error("Nothing to index: {0}")]
    EmptyInput(String),

    #[error("No persisted index at {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("Persisted index is unreadable: {0}")]
    IndexCorrupt(String),

    #[error("Invalid prompt template: {0}")]
    Template(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Reranking failed: {0}")]
    Rerank(String),

    #[error("Generation backend failed: {message}")]
    GenerationBackend { message: String, transient: bool },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NoDocumentIngested)
    }

    /// Backend failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::GenerationBackend { transient: true, .. })
    }

    pub fn generation(message: impl Into<String>, transient: bool) -> Self {
        Error::GenerationBackend { message: message.into(), transient }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
