use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the RAG engine.
///
/// Per-file ingestion errors (`UnsupportedFormat`, `Extraction`) are
/// recovered inside bulk jobs and reported through the job summary;
/// `StoreUninitialized` and `Config` are programmer/setup errors that
/// fail fast.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("unsupported format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("extraction failed for {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("vector store used before initialize()")]
    StoreUninitialized,
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        RagError::Internal(err.to_string())
    }

    pub fn extraction<E: std::fmt::Display>(path: impl Into<PathBuf>, err: E) -> Self {
        RagError::Extraction {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether a bulk job should record this error and continue with
    /// the next file instead of aborting.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            RagError::UnsupportedFormat { .. }
                | RagError::Extraction { .. }
                | RagError::EmbeddingUnavailable(_)
        )
    }
}
