//! Backend selection with a one-time local to remote fallback.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::any::AnyProvider;
use crate::error::LlmError;
use crate::provider::{LlmProvider, TokenStream};

/// Where to find the in-process generation model.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModelConfig {
    pub model_repo: String,
    #[serde(default)]
    pub model_file: Option<String>,
    #[serde(default)]
    pub embedding_repo: Option<String>,
}

/// The local backend the engine tries before settling on remote.
#[derive(Debug, Clone)]
pub enum LocalBackend {
    Disabled,
    #[cfg(feature = "candle")]
    Candle(LocalModelConfig),
    #[cfg(feature = "mock")]
    Mock {
        provider: crate::mock::MockProvider,
        fail_init: bool,
    },
}

/// Picks a generation backend exactly once per process lifetime.
///
/// The first call that needs a backend tries to initialize the local one. If
/// that fails, the engine logs a warning and pins itself to the remote
/// provider; no later call retries the local path. With `remote_only` set the
/// local backend is never attempted at all.
pub struct GenerationEngine {
    backend: OnceCell<AnyProvider>,
    local: LocalBackend,
    remote: AnyProvider,
    remote_only: bool,
    local_attempts: AtomicUsize,
}

impl GenerationEngine {
    #[must_use]
    pub fn new(local: LocalBackend, remote: AnyProvider, remote_only: bool) -> Self {
        Self {
            backend: OnceCell::new(),
            local,
            remote,
            remote_only,
            local_attempts: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn remote_only(remote: AnyProvider) -> Self {
        Self::new(LocalBackend::Disabled, remote, true)
    }

    /// How many times local initialization has been attempted. Stays at most 1.
    #[must_use]
    pub fn local_attempts(&self) -> usize {
        self.local_attempts.load(Ordering::Relaxed)
    }

    /// Name of the backend currently pinned, if selection already happened.
    #[must_use]
    pub fn backend_name(&self) -> Option<&str> {
        self.backend.get().map(LlmProvider::name)
    }

    async fn active(&self) -> &AnyProvider {
        self.backend
            .get_or_init(|| async {
                if self.remote_only {
                    tracing::info!(provider = self.remote.name(), "using remote backend");
                    return self.remote.clone();
                }
                self.local_attempts.fetch_add(1, Ordering::Relaxed);
                match self.try_local().await {
                    Ok(Some(provider)) => {
                        tracing::info!(provider = provider.name(), "using local backend");
                        provider
                    }
                    Ok(None) => {
                        tracing::info!(provider = self.remote.name(), "using remote backend");
                        self.remote.clone()
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "local backend failed to load, falling back to remote");
                        self.remote.clone()
                    }
                }
            })
            .await
    }

    async fn try_local(&self) -> Result<Option<AnyProvider>, LlmError> {
        match &self.local {
            LocalBackend::Disabled => Ok(None),
            #[cfg(feature = "candle")]
            LocalBackend::Candle(config) => {
                let provider = crate::candle_backend::CandleProvider::load(config).await?;
                Ok(Some(AnyProvider::Candle(provider)))
            }
            #[cfg(feature = "mock")]
            LocalBackend::Mock { provider, fail_init } => {
                if *fail_init {
                    return Err(LlmError::ModelLoad("mock local init failure".into()));
                }
                Ok(Some(AnyProvider::Mock(provider.clone())))
            }
        }
    }

    /// Produce a full completion through the selected backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to produce a response.
    pub async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, LlmError> {
        self.active().await.generate(prompt, max_tokens).await
    }

    /// Produce a fragment stream through the selected backend.
    ///
    /// Never fails to return a stream: if the backend cannot open one, the
    /// stream carries the error as its single, terminal item. Mid-stream
    /// errors are also terminal; nothing is yielded after the first `Err`.
    pub async fn generate_stream(&self, prompt: &str, max_tokens: usize) -> TokenStream {
        match self.active().await.generate_stream(prompt, max_tokens).await {
            Ok(stream) => Box::pin(TerminalOnError {
                inner: stream,
                done: false,
            }),
            Err(e) => Box::pin(tokio_stream::once(Err(e))),
        }
    }

    /// Map text to an embedding through the selected backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend has no embedding capability or the
    /// request fails.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.active().await.embed(text).await
    }
}

impl std::fmt::Debug for GenerationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationEngine")
            .field("remote", &self.remote.name())
            .field("remote_only", &self.remote_only)
            .field("selected", &self.backend_name())
            .finish_non_exhaustive()
    }
}

/// Ends the stream right after the first `Err` item.
struct TerminalOnError {
    inner: TokenStream,
    done: bool,
}

impl Stream for TerminalOnError {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use tokio_stream::StreamExt;

    fn remote() -> AnyProvider {
        AnyProvider::Mock(MockProvider::with_responses(vec!["remote answer".into()]))
    }

    #[tokio::test]
    async fn remote_only_never_tries_local() {
        let engine = GenerationEngine::new(
            LocalBackend::Mock {
                provider: MockProvider::default(),
                fail_init: false,
            },
            remote(),
            true,
        );
        let answer = engine.generate("q", 16).await.unwrap();
        assert_eq!(answer, "remote answer");
        assert_eq!(engine.local_attempts(), 0);
    }

    #[tokio::test]
    async fn local_backend_wins_when_it_loads() {
        let local = MockProvider::with_responses(vec!["local answer".into()]);
        let engine = GenerationEngine::new(
            LocalBackend::Mock {
                provider: local,
                fail_init: false,
            },
            remote(),
            false,
        );
        assert_eq!(engine.generate("q", 16).await.unwrap(), "local answer");
        assert_eq!(engine.local_attempts(), 1);
    }

    #[tokio::test]
    async fn failed_local_init_pins_remote_permanently() {
        let engine = GenerationEngine::new(
            LocalBackend::Mock {
                provider: MockProvider::default(),
                fail_init: true,
            },
            AnyProvider::Mock(MockProvider::with_responses(vec![
                "first".into(),
                "second".into(),
            ])),
            false,
        );
        assert_eq!(engine.generate("q", 16).await.unwrap(), "first");
        assert_eq!(engine.generate("q", 16).await.unwrap(), "second");
        // Local init is attempted exactly once, not per call.
        assert_eq!(engine.local_attempts(), 1);
        assert_eq!(engine.backend_name(), Some("mock"));
    }

    #[tokio::test]
    async fn stream_open_failure_yields_single_error_item() {
        let engine = GenerationEngine::remote_only(AnyProvider::Mock(MockProvider::failing()));
        let mut stream = engine.generate_stream("q", 16).await;
        let first = stream.next().await;
        assert!(matches!(first, Some(Err(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_yields_fragments_then_ends() {
        let engine = GenerationEngine::remote_only(AnyProvider::Mock(
            MockProvider::with_responses(vec!["hi".into()]),
        ));
        let mut stream = engine.generate_stream("q", 16).await;
        let mut collected = String::new();
        while let Some(item) = stream.next().await {
            collected.push_str(&item.unwrap());
        }
        assert_eq!(collected, "hi");
    }
}
