//! End-to-end ingestion: clone, chunk, embed, store, report.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use coderag_llm::embedding::EmbeddingService;
use coderag_memory::{ChunkIndex, ChunkMeta, DocumentKind};

use crate::acquire::{Checkout, RepoAcquirer};
use crate::extract::{chunk_whole_file, extract_definitions};
use crate::languages::{Lang, detect_language};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Completed,
    Failed,
}

/// Outcome of one ingestion run. Per-file problems land in `errors`; only a
/// failure to acquire the repository at all marks the whole run `Failed`.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub files_discovered: usize,
    /// Files that contributed at least one stored chunk.
    pub files_parsed: usize,
    pub chunks_stored: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl IngestReport {
    fn failed(error: String, duration_ms: u64) -> Self {
        Self {
            status: IngestStatus::Failed,
            files_discovered: 0,
            files_parsed: 0,
            chunks_stored: 0,
            errors: Vec::new(),
            error: Some(error),
            duration_ms,
        }
    }
}

/// Drives a full ingestion run for one project.
pub struct IngestionPipeline {
    acquirer: RepoAcquirer,
    embedder: EmbeddingService,
    index: Arc<dyn ChunkIndex>,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        acquirer: RepoAcquirer,
        embedder: EmbeddingService,
        index: Arc<dyn ChunkIndex>,
    ) -> Self {
        Self {
            acquirer,
            embedder,
            index,
        }
    }

    /// Clone and index a repository. Never returns `Err`: acquisition
    /// failures produce a `Failed` report, everything later is contained
    /// per file.
    pub async fn ingest(&self, repo_url: &str, project_id: Uuid) -> IngestReport {
        let start = std::time::Instant::now();
        let checkout = match self.acquirer.fetch(repo_url, project_id).await {
            Ok(checkout) => checkout,
            Err(e) => {
                tracing::error!(repo = repo_url, error = %e, "acquisition failed");
                return IngestReport::failed(e.to_string(), elapsed_ms(start));
            }
        };
        self.ingest_checkout(&checkout, project_id).await
    }

    /// Index an already-present working tree.
    pub async fn ingest_checkout(&self, checkout: &Checkout, project_id: Uuid) -> IngestReport {
        let start = std::time::Instant::now();
        let mut report = IngestReport {
            status: IngestStatus::Completed,
            files_discovered: 0,
            files_parsed: 0,
            chunks_stored: 0,
            errors: Vec::new(),
            error: None,
            duration_ms: 0,
        };

        // Re-ingestion replaces the project wholesale.
        match self.index.clear_project(project_id).await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "cleared previous chunks");
            }
            Ok(_) => {}
            Err(e) => {
                report.errors.push(format!("clear project: {e}"));
            }
        }

        let files = checkout.files();
        report.files_discovered = files.len();
        tracing::info!(total = files.len(), "ingestion started");

        for rel_path in &files {
            let abs_path = checkout.root().join(rel_path);
            let mut stored = 0;
            let outcome = self
                .ingest_file(&abs_path, rel_path, project_id, &mut stored)
                .await;
            // Chunks stored before a mid-file failure stay in the index, so
            // they count either way.
            if stored > 0 {
                report.files_parsed += 1;
                report.chunks_stored += stored;
            }
            match outcome {
                Ok(()) => {
                    tracing::debug!(file = %rel_path.display(), stored, "file ingested");
                }
                Err(e) => {
                    tracing::warn!(file = %rel_path.display(), stored, error = %e, "file incomplete");
                    report.errors.push(format!("{}: {e}", rel_path.display()));
                }
            }
        }

        report.duration_ms = elapsed_ms(start);
        tracing::info!(
            files = report.files_parsed,
            chunks = report.chunks_stored,
            errors = report.errors.len(),
            "ingestion finished"
        );
        report
    }

    /// Chunk one file and store its embeddings. `stored` counts chunks as
    /// they land, so a mid-file failure still reports what made it into the
    /// index; zero with `Ok` means the file was empty.
    async fn ingest_file(
        &self,
        abs_path: &Path,
        rel_path: &Path,
        project_id: Uuid,
        stored: &mut usize,
    ) -> crate::Result<()> {
        let bytes = tokio::fs::read(abs_path).await?;
        let lang = detect_language(rel_path);
        let (kind, chunks) = self.chunk_file(&bytes, rel_path, lang);

        if chunks.is_empty() {
            return Ok(());
        }

        let metadata = match lang {
            Some(lang) => serde_json::json!({ "language": lang.id() }),
            None => serde_json::json!({}),
        };
        let document_id = self
            .index
            .create_document(project_id, kind, &rel_path.to_string_lossy(), metadata)
            .await?;

        for chunk in chunks {
            let vector = self.embedder.embed_text(&chunk.content).await?;
            self.index.insert_chunk(document_id, vector, chunk).await?;
            *stored += 1;
        }
        Ok(())
    }

    /// Structural extraction when the language supports it, whole-file
    /// fallback otherwise. A parse failure also degrades to the fallback
    /// rather than losing the file.
    fn chunk_file(
        &self,
        bytes: &[u8],
        rel_path: &Path,
        lang: Option<Lang>,
    ) -> (DocumentKind, Vec<ChunkMeta>) {
        if let Some(lang) = lang {
            if !lang.definition_kinds().is_empty() {
                let source = String::from_utf8_lossy(bytes);
                match extract_definitions(&source, lang) {
                    Ok(chunks) if !chunks.is_empty() => {
                        return (DocumentKind::Code, chunks);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(file = %rel_path.display(), error = %e, "parse failed, storing whole file");
                    }
                }
            }
        }
        let chunks = chunk_whole_file(bytes, rel_path).into_iter().collect();
        (DocumentKind::Generic, chunks)
    }
}

fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
