#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("invalid project id: {0}")]
    InvalidScope(String),

    #[error("LLM error: {0}")]
    Llm(#[from] coderag_llm::LlmError),

    #[error("memory error: {0}")]
    Memory(#[from] coderag_memory::MemoryError),
}
