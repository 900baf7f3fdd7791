use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An indexed repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repo_url: String,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Parsed by a language grammar.
    Code,
    /// Stored whole, no structural parse.
    Generic,
}

impl DocumentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Generic => "generic",
        }
    }
}

/// One source file under a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: DocumentKind,
    /// Path relative to the repository root.
    pub path: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A retrievable span of a document. Line numbers are 0-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Syntax kind of the span, or `file_content` for a whole-file chunk.
    pub kind: String,
    pub name: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// A search hit, ordered by ascending distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub path: String,
    pub distance: f32,
    pub meta: ChunkMeta,
}

/// Audit row for an answered question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub project_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub question: String,
    pub response: String,
    pub citations: serde_json::Value,
}
