//! Test-only mock LLM provider.

use std::sync::{Arc, Mutex};

use crate::provider::{LlmProvider, TokenStream};

#[derive(Debug, Clone)]
pub struct MockProvider {
    pub responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub dimension: usize,
    pub supports_embeddings: bool,
    pub fail_generate: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            dimension: 384,
            supports_embeddings: true,
            fail_generate: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_generate: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String, crate::LlmError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_generate {
            return Err(crate::LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<TokenStream, crate::LlmError> {
        let response = self.generate(prompt, max_tokens).await?;
        let chunks: Vec<_> = response.chars().map(|c| c.to_string()).map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::LlmError> {
        if self.fail_embed {
            return Err(crate::LlmError::Other("mock embedding error".into()));
        }
        if !self.supports_embeddings {
            return Err(crate::LlmError::EmbedUnsupported { provider: "mock" });
        }
        // Deterministic per-text vector so distance tests are meaningful.
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        Ok((0..self.dimension)
            .map(|i| f32::from(bytes[i % bytes.len()]) / 255.0)
            .collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn scripted_responses_in_order() {
        let provider = MockProvider::with_responses(vec!["first".into(), "second".into()]);
        assert_eq!(provider.generate("q", 16).await.unwrap(), "first");
        assert_eq!(provider.generate("q", 16).await.unwrap(), "second");
        assert_eq!(provider.generate("q", 16).await.unwrap(), "mock response");
    }

    #[tokio::test]
    async fn stream_yields_per_char_fragments() {
        let provider = MockProvider::with_responses(vec!["abc".into()]);
        let mut stream = provider.generate_stream("q", 16).await.unwrap();
        let mut collected = String::new();
        while let Some(fragment) = stream.next().await {
            collected.push_str(&fragment.unwrap());
        }
        assert_eq!(collected, "abc");
    }

    #[tokio::test]
    async fn embed_is_deterministic_and_text_sensitive() {
        let provider = MockProvider::default();
        let a = provider.embed("alpha").await.unwrap();
        let b = provider.embed("alpha").await.unwrap();
        let c = provider.embed("beta").await.unwrap();
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn failing_provider_errors() {
        let provider = MockProvider::failing();
        assert!(provider.generate("q", 16).await.is_err());
        assert!(provider.generate_stream("q", 16).await.is_err());
    }
}
