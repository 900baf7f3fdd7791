//! Retrieval-augmented answering over an indexed project.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use coderag_llm::embedding::EmbeddingService;
use coderag_llm::engine::GenerationEngine;
use coderag_memory::{ChunkIndex, QueryRecord, ScoredChunk};

use crate::error::RagError;
use crate::event::{ChatEvent, Citation};

pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

const PROMPT_TEMPLATE: &str = "You are an expert software architect. Answer the user's question \
                               based on the provided code context.";

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub retrieval_k: usize,
    pub max_tokens: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 5,
            max_tokens: 512,
        }
    }
}

/// A complete non-streaming answer.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Embeds a question, retrieves the nearest chunks in one project, and
/// streams a grounded answer.
pub struct RagOrchestrator {
    embedder: EmbeddingService,
    index: Arc<dyn ChunkIndex>,
    engine: Arc<GenerationEngine>,
    config: RagConfig,
}

impl RagOrchestrator {
    #[must_use]
    pub fn new(
        embedder: EmbeddingService,
        index: Arc<dyn ChunkIndex>,
        engine: Arc<GenerationEngine>,
        config: RagConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            engine,
            config,
        }
    }

    /// Answer a question as an event stream: one citations event, then
    /// tokens, then `Done`. Failures surface as an `Error` event; `Done` is
    /// always the last event. Dropping the stream cancels generation.
    #[must_use]
    pub fn answer_stream(&self, question: &str, project_scope: &str) -> EventStream {
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        let project = match Uuid::parse_str(project_scope) {
            Ok(id) => id,
            Err(_) => {
                // Nothing to retrieve for a malformed scope; short-circuit.
                let scope = project_scope.to_owned();
                tokio::spawn(async move {
                    let _ = tx
                        .send(ChatEvent::Error(format!("invalid project id: {scope}")))
                        .await;
                    let _ = tx.send(ChatEvent::Done).await;
                });
                return Box::pin(ReceiverStream::new(rx));
            }
        };

        let question = question.to_owned();
        let embedder = self.embedder.clone();
        let index = Arc::clone(&self.index);
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();

        tokio::spawn(async move {
            let hits = match retrieve(&embedder, &*index, project, &question, config.retrieval_k)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                    let _ = tx.send(ChatEvent::Done).await;
                    return;
                }
            };

            let citations: Vec<Citation> = hits.iter().map(Citation::from).collect();
            if tx.send(ChatEvent::Citations(citations)).await.is_err() {
                return;
            }

            let prompt = build_prompt(&hits, &question);
            let mut stream = engine.generate_stream(&prompt, config.max_tokens).await;
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(fragment) => ChatEvent::Token(fragment),
                    Err(e) => ChatEvent::Error(e.to_string()),
                };
                // Receiver gone means the client went away; stop generating.
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(ChatEvent::Done).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Answer a question in one shot and record it for audit.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is malformed or retrieval or generation
    /// fails.
    pub async fn answer(&self, question: &str, project_scope: &str) -> Result<Answer, RagError> {
        let project = Uuid::parse_str(project_scope)
            .map_err(|_| RagError::InvalidScope(project_scope.to_owned()))?;

        let hits = retrieve(
            &self.embedder,
            &*self.index,
            project,
            question,
            self.config.retrieval_k,
        )
        .await?;
        let citations: Vec<Citation> = hits.iter().map(Citation::from).collect();

        let prompt = build_prompt(&hits, question);
        let answer = self.engine.generate(&prompt, self.config.max_tokens).await?;

        // Audit is best effort; an unreachable store must not lose the answer.
        let record = QueryRecord {
            project_id: project,
            user_id: None,
            question: question.to_owned(),
            response: answer.clone(),
            citations: serde_json::to_value(&citations).unwrap_or_default(),
        };
        if let Err(e) = self.index.record_query(record).await {
            tracing::warn!(error = %e, "failed to record query");
        }

        Ok(Answer { answer, citations })
    }
}

async fn retrieve(
    embedder: &EmbeddingService,
    index: &dyn ChunkIndex,
    project: Uuid,
    question: &str,
    k: usize,
) -> Result<Vec<ScoredChunk>, RagError> {
    let vector = embedder.embed_text(question).await?;
    let hits = index.search(project, vector, k).await?;
    Ok(hits)
}

fn build_prompt(hits: &[ScoredChunk], question: &str) -> String {
    let context = hits
        .iter()
        .map(|h| h.meta.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{PROMPT_TEMPLATE}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:")
}

#[cfg(test)]
mod tests {
    use super::*;

    use coderag_llm::any::AnyProvider;
    use coderag_llm::mock::MockProvider;
    use coderag_memory::{ChunkMeta, DocumentKind, InMemoryChunkIndex};

    const DIM: usize = 384;

    fn orchestrator(
        index: Arc<InMemoryChunkIndex>,
        generation: MockProvider,
        config: RagConfig,
    ) -> RagOrchestrator {
        let embed_provider = Arc::new(AnyProvider::Mock(MockProvider::default()));
        RagOrchestrator::new(
            EmbeddingService::new(embed_provider),
            index,
            Arc::new(GenerationEngine::remote_only(AnyProvider::Mock(generation))),
            config,
        )
    }

    async fn seed_chunks(index: &InMemoryChunkIndex, project: Uuid, names: &[&str]) {
        let doc = index
            .create_document(
                project,
                DocumentKind::Code,
                "src/app.py",
                serde_json::json!({}),
            )
            .await
            .unwrap();
        for name in names {
            index
                .insert_chunk(
                    doc,
                    vec![0.1; DIM],
                    ChunkMeta {
                        kind: "function_definition".into(),
                        name: (*name).to_owned(),
                        content: format!("def {name}(): pass"),
                        start_line: 0,
                        end_line: 0,
                    },
                )
                .await
                .unwrap();
        }
    }

    async fn collect(mut stream: EventStream) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn invalid_project_id_short_circuits() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let orchestrator = orchestrator(index, MockProvider::default(), RagConfig::default());

        let events = collect(orchestrator.answer_stream("anything", "not-a-uuid")).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ChatEvent::Error(_)));
        assert_eq!(events[1], ChatEvent::Done);
    }

    #[tokio::test]
    async fn citations_precede_tokens_and_done_is_last() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let project = Uuid::new_v4();
        seed_chunks(&index, project, &["login"]).await;

        let orchestrator = orchestrator(
            Arc::clone(&index),
            MockProvider::with_responses(vec!["ok".into()]),
            RagConfig::default(),
        );
        let events = collect(orchestrator.answer_stream("how", &project.to_string())).await;

        let ChatEvent::Citations(ref citations) = events[0] else {
            panic!("expected citations first, got {:?}", events[0]);
        };
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].name, "login");

        let tokens: String = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, "ok");
        assert_eq!(events.last(), Some(&ChatEvent::Done));
        assert!(!events.iter().any(|e| matches!(e, ChatEvent::Error(_))));
    }

    #[tokio::test]
    async fn retrieval_respects_configured_k() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let project = Uuid::new_v4();
        seed_chunks(&index, project, &["a", "b", "c", "d"]).await;

        let orchestrator = orchestrator(
            Arc::clone(&index),
            MockProvider::default(),
            RagConfig {
                retrieval_k: 2,
                max_tokens: 64,
            },
        );
        let events = collect(orchestrator.answer_stream("q", &project.to_string())).await;
        let ChatEvent::Citations(ref citations) = events[0] else {
            panic!("expected citations first");
        };
        assert_eq!(citations.len(), 2);
    }

    #[tokio::test]
    async fn generation_failure_emits_error_then_done() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let project = Uuid::new_v4();
        seed_chunks(&index, project, &["x"]).await;

        let orchestrator = orchestrator(
            Arc::clone(&index),
            MockProvider::failing(),
            RagConfig::default(),
        );
        let events = collect(orchestrator.answer_stream("q", &project.to_string())).await;

        assert!(matches!(events[0], ChatEvent::Citations(_)));
        assert!(matches!(events[1], ChatEvent::Error(_)));
        assert_eq!(events.last(), Some(&ChatEvent::Done));
    }

    #[tokio::test]
    async fn empty_project_still_answers() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let project = Uuid::new_v4();

        let orchestrator = orchestrator(
            Arc::clone(&index),
            MockProvider::with_responses(vec!["no context".into()]),
            RagConfig::default(),
        );
        let events = collect(orchestrator.answer_stream("q", &project.to_string())).await;
        assert_eq!(events[0], ChatEvent::Citations(Vec::new()));
        assert_eq!(events.last(), Some(&ChatEvent::Done));
    }

    #[tokio::test]
    async fn non_streaming_answer_records_audit_row() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let project = Uuid::new_v4();
        seed_chunks(&index, project, &["handler"]).await;

        let orchestrator = orchestrator(
            Arc::clone(&index),
            MockProvider::with_responses(vec!["the handler dispatches".into()]),
            RagConfig::default(),
        );
        let answer = orchestrator
            .answer("what does the handler do", &project.to_string())
            .await
            .unwrap();

        assert_eq!(answer.answer, "the handler dispatches");
        assert_eq!(answer.citations.len(), 1);

        let recorded = index.recorded_queries();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].response, "the handler dispatches");
    }

    #[tokio::test]
    async fn non_streaming_invalid_scope_errors() {
        let index = Arc::new(InMemoryChunkIndex::new(DIM));
        let orchestrator = orchestrator(index, MockProvider::default(), RagConfig::default());
        let err = orchestrator.answer("q", "nope").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidScope(_)));
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let hits = vec![ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            path: "src/db.py".into(),
            distance: 0.2,
            meta: ChunkMeta {
                kind: "function_definition".into(),
                name: "connect".into(),
                content: "def connect(): ...".into(),
                start_line: 3,
                end_line: 4,
            },
        }];
        let prompt = build_prompt(&hits, "how do we connect?");
        assert!(prompt.contains("def connect(): ..."));
        assert!(prompt.contains("Question: how do we connect?"));
        assert!(prompt.ends_with("Answer:"));
    }
}
