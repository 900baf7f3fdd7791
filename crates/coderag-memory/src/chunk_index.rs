use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::error::MemoryError;
use crate::types::{ChunkMeta, DocumentKind, QueryRecord, ScoredChunk};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Backend-agnostic chunk storage, scoped to projects.
///
/// All writes are append-only except [`ChunkIndex::clear_project`], which
/// exists so re-ingestion can replace a project wholesale.
pub trait ChunkIndex: Send + Sync {
    /// Register a source file and return its id.
    fn create_document(
        &self,
        project_id: Uuid,
        kind: DocumentKind,
        path: &str,
        metadata: serde_json::Value,
    ) -> BoxFuture<'_, Result<Uuid, MemoryError>>;

    /// Store one chunk with its vector. The vector width must match the
    /// index; a mismatch is a hard [`MemoryError::Dimension`] error.
    fn insert_chunk(
        &self,
        document_id: Uuid,
        vector: Vec<f32>,
        meta: ChunkMeta,
    ) -> BoxFuture<'_, Result<Uuid, MemoryError>>;

    /// Nearest chunks within one project, ascending L2 distance, at most
    /// `limit` results. Unknown or empty projects yield an empty list.
    fn search(
        &self,
        project_id: Uuid,
        vector: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredChunk>, MemoryError>>;

    /// Drop every document and chunk under the project. Returns the number
    /// of chunks removed.
    fn clear_project(&self, project_id: Uuid) -> BoxFuture<'_, Result<usize, MemoryError>>;

    fn chunk_count(&self, project_id: Uuid) -> BoxFuture<'_, Result<usize, MemoryError>>;

    /// Append an audit row for an answered question.
    fn record_query(&self, record: QueryRecord) -> BoxFuture<'_, Result<(), MemoryError>>;
}
