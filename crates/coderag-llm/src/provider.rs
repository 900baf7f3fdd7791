use std::pin::Pin;

use futures_core::Stream;

use crate::error::LlmError;

/// Incremental fragments of a generated completion. The stream always reaches
/// a defined end: an `Err` item is terminal, nothing follows it.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

pub trait LlmProvider: Send + Sync {
    /// Produce a full completion for the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to produce a response.
    fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Produce a lazy fragment stream for the prompt. Fragments are yielded
    /// as the backend emits them, never buffered into one final response.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened; mid-stream failures
    /// surface as an `Err` item inside the stream instead.
    fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> impl Future<Output = Result<TokenStream, LlmError>> + Send;

    /// Map text to a fixed-width embedding vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend has no embedding capability or the
    /// request fails.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn supports_embeddings(&self) -> bool;

    fn name(&self) -> &str;
}
