//! Error types for coderag-index.

/// Errors that can occur during ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or preparing storage.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Repository clone or checkout failure.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// Tree-sitter parsing error.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unsupported or unrecognized language.
    #[error("unsupported language")]
    UnsupportedLanguage,

    /// LLM provider error (embedding).
    #[error("LLM error: {0}")]
    Llm(#[from] coderag_llm::LlmError),

    /// Chunk index error.
    #[error("memory error: {0}")]
    Memory(#[from] coderag_memory::MemoryError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
