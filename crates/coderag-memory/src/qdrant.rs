//! `Qdrant` vectors + `SQLite` metadata, dual-written per chunk.

use std::str::FromStr;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointStruct, PointsIdsList, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use crate::chunk_index::{BoxFuture, ChunkIndex};
use crate::error::MemoryError;
use crate::types::{ChunkMeta, DocumentKind, QueryRecord, ScoredChunk};

const DEFAULT_COLLECTION: &str = "coderag_chunks";

/// Vectors live in `Qdrant` under a Euclid-distance collection; document and
/// chunk metadata lives in `SQLite` so project-wide deletes and audit queries
/// stay cheap.
pub struct QdrantChunkIndex {
    client: Qdrant,
    collection: String,
    pool: SqlitePool,
    vector_size: usize,
}

impl QdrantChunkIndex {
    /// # Errors
    ///
    /// Returns an error if the `Qdrant` client cannot be created.
    pub fn new(qdrant_url: &str, pool: SqlitePool, vector_size: usize) -> Result<Self, MemoryError> {
        let client = Qdrant::from_url(qdrant_url)
            .build()
            .map_err(|e| MemoryError::Connection(format!("qdrant client: {e}")))?;
        Ok(Self {
            client,
            collection: DEFAULT_COLLECTION.into(),
            pool,
            vector_size,
        })
    }

    /// Open (or create) the `SQLite` database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open_database(path: &str) -> Result<SqlitePool, MemoryError> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        sqlx::migrate!().run(&pool).await?;
        Ok(pool)
    }

    /// Create the collection and payload indexes if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if `Qdrant` cannot be reached or creation fails.
    pub async fn ensure_collection(&self) -> Result<(), MemoryError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| MemoryError::Connection(format!("collection check: {e}")))?;
        if exists {
            return Ok(());
        }

        let size = u64::try_from(self.vector_size)
            .map_err(|e| MemoryError::Connection(format!("vector size overflow: {e}")))?;
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(size, Distance::Euclid)),
            )
            .await
            .map_err(|e| MemoryError::Connection(format!("collection create: {e}")))?;

        for field in ["project_id", "document_id"] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| MemoryError::Connection(format!("field index {field}: {e}")))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
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

    async fn document_row(&self, document_id: Uuid) -> Result<(Uuid, String), MemoryError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT project_id, path FROM documents WHERE id = ?")
                .bind(document_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let (project_id, path) = row.ok_or(MemoryError::UnknownDocument(document_id))?;
        let project_id = Uuid::parse_str(&project_id)
            .map_err(|e| MemoryError::Insert(format!("corrupt project id: {e}")))?;
        Ok((project_id, path))
    }
}

fn scored_chunk(point: &ScoredPoint) -> Option<ScoredChunk> {
    let p = &point.payload;
    let get_str = |key: &str| {
        p.get(key)
            .and_then(qdrant_client::qdrant::Value::as_str)
            .cloned()
    };
    let get_line = |key: &str| {
        p.get(key)
            .and_then(qdrant_client::qdrant::Value::as_integer)
            .and_then(|v| usize::try_from(v).ok())
    };

    let chunk_id = point.id.as_ref().and_then(|id| match &id.point_id_options {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) => Uuid::parse_str(s).ok(),
        _ => None,
    })?;

    Some(ScoredChunk {
        chunk_id,
        document_id: Uuid::parse_str(&get_str("document_id")?).ok()?,
        path: get_str("path")?,
        distance: point.score,
        meta: ChunkMeta {
            kind: get_str("kind")?,
            name: get_str("name")?,
            content: get_str("content")?,
            start_line: get_line("start_line")?,
            end_line: get_line("end_line")?,
        },
    })
}

impl ChunkIndex for QdrantChunkIndex {
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
            sqlx::query(
                "INSERT INTO documents (id, project_id, kind, path, metadata) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(project_id.to_string())
            .bind(kind.as_str())
            .bind(&path)
            .bind(metadata.to_string())
            .execute(&self.pool)
            .await?;
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
            let (project_id, path) = self.document_row(document_id).await?;
            let chunk_id = Uuid::new_v4();

            let payload: std::collections::HashMap<String, qdrant_client::qdrant::Value> =
                serde_json::from_value(serde_json::json!({
                    "project_id": project_id.to_string(),
                    "document_id": document_id.to_string(),
                    "path": path,
                    "kind": meta.kind,
                    "name": meta.name,
                    "content": meta.content,
                    "start_line": meta.start_line,
                    "end_line": meta.end_line,
                }))?;

            self.client
                .upsert_points(UpsertPointsBuilder::new(
                    &self.collection,
                    vec![PointStruct::new(chunk_id.to_string(), vector, payload)],
                ))
                .await
                .map_err(|e| MemoryError::Insert(format!("qdrant upsert: {e}")))?;

            let start_line = i64::try_from(meta.start_line)
                .map_err(|e| MemoryError::Insert(format!("line overflow: {e}")))?;
            let end_line = i64::try_from(meta.end_line)
                .map_err(|e| MemoryError::Insert(format!("line overflow: {e}")))?;

            sqlx::query(
                "INSERT INTO chunks (id, document_id, project_id, kind, name, start_line, end_line) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk_id.to_string())
            .bind(document_id.to_string())
            .bind(project_id.to_string())
            .bind(&meta.kind)
            .bind(&meta.name)
            .bind(start_line)
            .bind(end_line)
            .execute(&self.pool)
            .await?;

            Ok(chunk_id)
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
            let filter = Filter::must(vec![Condition::matches(
                "project_id",
                project_id.to_string(),
            )]);
            let builder =
                SearchPointsBuilder::new(&self.collection, vector, limit as u64)
                    .filter(filter)
                    .with_payload(true);
            let results = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| MemoryError::Search(format!("qdrant search: {e}")))?;

            Ok(results.result.iter().filter_map(scored_chunk).collect())
        })
    }

    fn clear_project(&self, project_id: Uuid) -> BoxFuture<'_, Result<usize, MemoryError>> {
        Box::pin(async move {
            let ids: Vec<(String,)> =
                sqlx::query_as("SELECT id FROM chunks WHERE project_id = ?")
                    .bind(project_id.to_string())
                    .fetch_all(&self.pool)
                    .await?;

            if !ids.is_empty() {
                let point_ids = ids.iter().map(|(id,)| id.clone().into()).collect();
                self.client
                    .delete_points(
                        DeletePointsBuilder::new(&self.collection)
                            .points(PointsIdsList { ids: point_ids }),
                    )
                    .await
                    .map_err(|e| MemoryError::Delete(format!("qdrant delete: {e}")))?;
            }

            sqlx::query("DELETE FROM chunks WHERE project_id = ?")
                .bind(project_id.to_string())
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM documents WHERE project_id = ?")
                .bind(project_id.to_string())
                .execute(&self.pool)
                .await?;

            Ok(ids.len())
        })
    }

    fn chunk_count(&self, project_id: Uuid) -> BoxFuture<'_, Result<usize, MemoryError>> {
        Box::pin(async move {
            let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE project_id = ?")
                .bind(project_id.to_string())
                .fetch_one(&self.pool)
                .await?;
            Ok(usize::try_from(row.0).unwrap_or(0))
        })
    }

    fn record_query(&self, record: QueryRecord) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO queries (project_id, user_id, question, response, citations) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(record.project_id.to_string())
            .bind(record.user_id.map(|u| u.to_string()))
            .bind(&record.question)
            .bind(&record.response)
            .bind(record.citations.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn document_rows_round_trip() {
        let pool = setup_pool().await;
        let id = Uuid::new_v4();
        let project = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO documents (id, project_id, kind, path, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(project.to_string())
        .bind("code")
        .bind("src/lib.rs")
        .bind("{}")
        .execute(&pool)
        .await
        .unwrap();

        let row: (String, String) =
            sqlx::query_as("SELECT project_id, path FROM documents WHERE id = ?")
                .bind(id.to_string())
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(row.0, project.to_string());
        assert_eq!(row.1, "src/lib.rs");
    }

    #[tokio::test]
    async fn chunk_delete_cascades_from_document() {
        let pool = setup_pool().await;
        let doc = Uuid::new_v4();
        let project = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO documents (id, project_id, kind, path, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(doc.to_string())
        .bind(project.to_string())
        .bind("code")
        .bind("src/lib.rs")
        .bind("{}")
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO chunks (id, document_id, project_id, kind, name, start_line, end_line) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(doc.to_string())
        .bind(project.to_string())
        .bind("function_item")
        .bind("main")
        .bind(0_i64)
        .bind(10_i64)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn queries_table_accepts_audit_rows() {
        let pool = setup_pool().await;

        sqlx::query(
            "INSERT INTO queries (project_id, user_id, question, response, citations) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Option::<String>::None)
        .bind("how is auth handled")
        .bind("via middleware")
        .bind("[]")
        .execute(&pool)
        .await
        .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn open_database_in_memory_runs_migrations() {
        let pool = QdrantChunkIndex::open_database(":memory:").await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
