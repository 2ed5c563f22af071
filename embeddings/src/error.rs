//! Error types for the embeddings system.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The raw vector model could not be opened.
    #[error("vector model not found: {}: {source}", path.display())]
    ModelNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No raw vector model was configured for a cache that needs one.
    #[error("vector model not configured")]
    ModelNotConfigured,

    /// Any other input file could not be opened.
    #[error("file not found: {}: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Header counts disagree with the content, or a record is truncated.
    #[error("malformed file: {0}")]
    MalformedFile(String),

    /// A matrix could not be allocated.
    #[error("cannot allocate {rows} x {columns} matrix")]
    AllocationFailed { rows: usize, columns: usize },

    /// A word is absent from the index it was looked up in.
    #[error("unknown word: {0}")]
    UnknownWord(String),

    /// None of the tokens of a query are in the vocabulary.
    #[error("no known word in query: {0}")]
    AllTokensUnknown(String),

    /// The query contained no tokens at all.
    #[error("empty query")]
    EmptyQuery,

    /// The model produced a neighbor the cache index has no id for.
    #[error("neighbor {0} is not in the cache vocabulary")]
    VocabularyMismatch(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmbeddingError {
    /// Map a short read to [`EmbeddingError::MalformedFile`], keeping other
    /// IO failures as they are.
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::MalformedFile(format!("truncated {what}"))
        } else {
            Self::Io(err)
        }
    }
}
