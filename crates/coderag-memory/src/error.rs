#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("unknown document: {0}")]
    UnknownDocument(uuid::Uuid),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("insert error: {0}")]
    Insert(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("delete error: {0}")]
    Delete(String),

    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
