//! Shared embedding service with a lazily probed vector dimension.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::any::AnyProvider;
use crate::error::LlmError;
use crate::provider::LlmProvider;

const PROBE_TEXT: &str = "dimension probe";

/// Cheap-to-clone handle over one embedding backend.
///
/// All clones share the probed dimension, so the first successful embedding
/// fixes the width every later vector must match.
#[derive(Clone)]
pub struct EmbeddingService {
    provider: Arc<AnyProvider>,
    dimension: Arc<OnceCell<usize>>,
}

impl EmbeddingService {
    #[must_use]
    pub fn new(provider: Arc<AnyProvider>) -> Self {
        Self {
            provider,
            dimension: Arc::new(OnceCell::new()),
        }
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or yields an empty vector.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let vector = self.provider.embed(text).await?;
        if vector.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: "embedding",
            });
        }
        Ok(vector)
    }

    /// Embed a batch of texts, preserving input order.
    ///
    /// # Errors
    ///
    /// Fails on the first text the backend cannot embed.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_text(text).await?);
        }
        Ok(vectors)
    }

    /// Vector width of this backend, probed once with a fixed input.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe embedding fails.
    pub async fn dimension(&self) -> Result<usize, LlmError> {
        self.dimension
            .get_or_try_init(|| async {
                let vector = self.embed_text(PROBE_TEXT).await?;
                Ok::<_, LlmError>(vector.len())
            })
            .await
            .copied()
    }

    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.provider.name())
            .field("dimension", &self.dimension.get())
            .finish()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn service(dimension: usize) -> EmbeddingService {
        EmbeddingService::new(Arc::new(AnyProvider::Mock(
            MockProvider::default().with_dimension(dimension),
        )))
    }

    #[tokio::test]
    async fn dimension_probe_is_cached() {
        let service = service(384);
        assert_eq!(service.dimension().await.unwrap(), 384);
        assert_eq!(service.dimension().await.unwrap(), 384);
    }

    #[tokio::test]
    async fn clones_share_probed_dimension() {
        let service = service(16);
        let clone = service.clone();
        assert_eq!(service.dimension().await.unwrap(), 16);
        assert_eq!(clone.dimension().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let service = service(8);
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = service.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], service.embed_text("a").await.unwrap());
        assert_eq!(vectors[1], service.embed_text("b").await.unwrap());
    }

    #[tokio::test]
    async fn failing_backend_surfaces_error() {
        let service = EmbeddingService::new(Arc::new(AnyProvider::Mock(MockProvider {
            fail_embed: true,
            ..MockProvider::default()
        })));
        assert!(service.embed_text("x").await.is_err());
        assert!(service.dimension().await.is_err());
    }
}
