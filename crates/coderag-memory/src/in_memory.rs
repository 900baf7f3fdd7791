//! Test and fallback backend holding everything in process memory.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::chunk_index::{BoxFuture, ChunkIndex};
use crate::error::MemoryError;
use crate::types::{ChunkMeta, Document, DocumentKind, QueryRecord, ScoredChunk};

struct StoredChunk {
    id: Uuid,
    document_id: Uuid,
    project_id: Uuid,
    vector: Vec<f32>,
    meta: ChunkMeta,
}

#[derive(Default)]
struct State {
    documents: HashMap<Uuid, Document>,
    // Insertion order is the tie-break for equal distances.
    chunks: Vec<StoredChunk>,
    queries: Vec<QueryRecord>,
}

pub struct InMemoryChunkIndex {
    state: RwLock<State>,
    vector_size: usize,
}

impl InMemoryChunkIndex {
    #[must_use]
    pub fn new(vector_size: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            vector_size,
        }
    }

    /// Audit rows recorded so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn recorded_queries(&self) -> Vec<QueryRecord> {
        self.state.read().unwrap().queries.clone()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), MemoryError> {
        if vector.len() == self.vector_size {
            Ok(())
        } else {
            Err(MemoryError::Dimension {
                expected: self.vector_size,
                got: vector.len(),
            })
        }
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl ChunkIndex for InMemoryChunkIndex {
    fn create_document(
        &self,
        project_id: Uuid,
        kind: DocumentKind,
        path: &str,
        metadata: serde_json::Value,
    ) -> BoxFuture<'_, Result<Uuid, MemoryError>> {
        let path = path.to_owned();
        Box::pin(async move {
            let id = Uuid::new_v4();
            let mut state = self
                .state
                .write()
                .map_err(|e| MemoryError::Insert(format!("lock poisoned: {e}")))?;
            state.documents.insert(
                id,
                Document {
                    id,
                    project_id,
                    kind,
                    path,
                    metadata,
                },
            );
            Ok(id)
        })
    }

    fn insert_chunk(
        &self,
        document_id: Uuid,
        vector: Vec<f32>,
        meta: ChunkMeta,
    ) -> BoxFuture<'_, Result<Uuid, MemoryError>> {
        Box::pin(async move {
            self.check_dimension(&vector)?;
            let mut state = self
                .state
                .write()
                .map_err(|e| MemoryError::Insert(format!("lock poisoned: {e}")))?;
            let project_id = state
                .documents
                .get(&document_id)
                .ok_or(MemoryError::UnknownDocument(document_id))?
                .project_id;
            let id = Uuid::new_v4();
            state.chunks.push(StoredChunk {
                id,
                document_id,
                project_id,
                vector,
                meta,
            });
            Ok(id)
        })
    }

    fn search(
        &self,
        project_id: Uuid,
        vector: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredChunk>, MemoryError>> {
        Box::pin(async move {
            self.check_dimension(&vector)?;
            let state = self
                .state
                .read()
                .map_err(|e| MemoryError::Search(format!("lock poisoned: {e}")))?;
            let mut hits: Vec<ScoredChunk> = state
                .chunks
                .iter()
                .filter(|c| c.project_id == project_id)
                .map(|c| ScoredChunk {
                    chunk_id: c.id,
                    document_id: c.document_id,
                    path: state
                        .documents
                        .get(&c.document_id)
                        .map(|d| d.path.clone())
                        .unwrap_or_default(),
                    distance: l2_distance(&c.vector, &vector),
                    meta: c.meta.clone(),
                })
                .collect();
            // Stable sort keeps insertion order for equal distances.
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits.truncate(limit);
            Ok(hits)
        })
    }

    fn clear_project(&self, project_id: Uuid) -> BoxFuture<'_, Result<usize, MemoryError>> {
        Box::pin(async move {
            let mut state = self
                .state
                .write()
                .map_err(|e| MemoryError::Delete(format!("lock poisoned: {e}")))?;
            let before = state.chunks.len();
            state.chunks.retain(|c| c.project_id != project_id);
            let removed = before - state.chunks.len();
            state.documents.retain(|_, d| d.project_id != project_id);
            Ok(removed)
        })
    }

    fn chunk_count(&self, project_id: Uuid) -> BoxFuture<'_, Result<usize, MemoryError>> {
        Box::pin(async move {
            let state = self
                .state
                .read()
                .map_err(|e| MemoryError::Search(format!("lock poisoned: {e}")))?;
            Ok(state
                .chunks
                .iter()
                .filter(|c| c.project_id == project_id)
                .count())
        })
    }

    fn record_query(&self, record: QueryRecord) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self
                .state
                .write()
                .map_err(|e| MemoryError::Insert(format!("lock poisoned: {e}")))?;
            state.queries.push(record);
            Ok(())
        })
    }
}
