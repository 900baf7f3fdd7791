//! Project-scoped chunk storage: Qdrant vectors with SQLite metadata.

pub mod chunk_index;
pub mod error;
pub mod in_memory;
pub mod qdrant;
pub mod types;

pub use chunk_index::{BoxFuture, ChunkIndex};
pub use error::MemoryError;
pub use in_memory::InMemoryChunkIndex;
pub use qdrant::QdrantChunkIndex;
pub use types::{ChunkMeta, Document, DocumentKind, Project, QueryRecord, ScoredChunk};
