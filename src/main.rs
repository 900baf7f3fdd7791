use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use uuid::Uuid;

use coderag_core::config::Config;
use coderag_core::event::ChatEvent;
use coderag_core::rag::{RagConfig, RagOrchestrator};
use coderag_index::acquire::RepoAcquirer;
use coderag_index::pipeline::IngestionPipeline;
use coderag_llm::any::AnyProvider;
use coderag_llm::embedding::EmbeddingService;
use coderag_llm::engine::{GenerationEngine, LocalBackend};
use coderag_llm::ollama::OllamaProvider;
use coderag_memory::{ChunkIndex, QdrantChunkIndex};

#[derive(Parser)]
#[command(name = "coderag", about = "Ask questions about a git repository", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "coderag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone a repository and index its contents.
    Index {
        /// Repository URL to clone.
        #[arg(long)]
        repo: String,
        /// Project id; a fresh one is generated when omitted.
        #[arg(long)]
        project: Option<Uuid>,
    },
    /// Ask a question about an indexed project.
    Ask {
        /// Project id returned by `index`.
        #[arg(long)]
        project: String,
        /// The question.
        question: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_engine(config: &Config, remote: &AnyProvider) -> GenerationEngine {
    #[cfg(feature = "candle")]
    let local = config
        .llm
        .local
        .clone()
        .map_or(LocalBackend::Disabled, LocalBackend::Candle);
    #[cfg(not(feature = "candle"))]
    let local = LocalBackend::Disabled;

    GenerationEngine::new(local, remote.clone(), config.llm.remote_only)
}

async fn build_index(config: &Config) -> anyhow::Result<Arc<QdrantChunkIndex>> {
    let pool = QdrantChunkIndex::open_database(&config.memory.database_path)
        .await
        .context("failed to open metadata database")?;
    let index = QdrantChunkIndex::new(&config.memory.qdrant_url, pool, config.index.vector_size)
        .context("failed to create qdrant client")?;
    index
        .ensure_collection()
        .await
        .context("failed to prepare qdrant collection")?;
    Ok(Arc::new(index))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let remote = Arc::new(AnyProvider::Ollama(OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    )));
    let embedder = EmbeddingService::new(Arc::clone(&remote));
    let index = build_index(&config).await?;

    match cli.command {
        Command::Index { repo, project } => {
            let project = project.unwrap_or_else(Uuid::new_v4);
            let pipeline = IngestionPipeline::new(
                RepoAcquirer::new(config.index.storage_root.clone()),
                embedder,
                index as Arc<dyn ChunkIndex>,
            );
            let report = pipeline.ingest(&repo, project).await;
            println!("project: {project}");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ask { project, question } => {
            let engine = Arc::new(build_engine(&config, &remote));
            let orchestrator = RagOrchestrator::new(
                embedder,
                index as Arc<dyn ChunkIndex>,
                engine,
                RagConfig {
                    retrieval_k: config.index.retrieval_k,
                    max_tokens: 512,
                },
            );

            let mut stream = orchestrator.answer_stream(&question, &project);
            while let Some(event) = stream.next().await {
                match event {
                    ChatEvent::Citations(citations) => {
                        for c in &citations {
                            println!("[{}:{}-{}] {}", c.path, c.start_line, c.end_line, c.name);
                        }
                        if !citations.is_empty() {
                            println!();
                        }
                    }
                    ChatEvent::Token(fragment) => {
                        use std::io::Write;
                        print!("{fragment}");
                        let _ = std::io::stdout().flush();
                    }
                    ChatEvent::Error(e) => {
                        eprintln!("error: {e}");
                    }
                    ChatEvent::Done => {
                        println!();
                    }
                }
            }
        }
    }

    Ok(())
}
