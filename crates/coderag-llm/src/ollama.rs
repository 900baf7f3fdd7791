use ollama_rs::Ollama;

use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{LlmProvider, TokenStream};

/// Remote generation backend over the Ollama HTTP API.
///
/// `max_tokens` is advisory here; the served model's own limits apply. The
/// local backend is the one that enforces a hard cap.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
        }
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::Unavailable(format!("failed to connect to Ollama — is it running? {e}"))
        })?;
        Ok(())
    }

    fn request(&self, prompt: &str) -> ChatMessageRequest {
        ChatMessageRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompt.to_owned())],
        )
    }
}

impl LlmProvider for OllamaProvider {
    async fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<String, LlmError> {
        let response = self
            .client
            .send_chat_messages(self.request(prompt))
            .await
            .map_err(|e| LlmError::Inference(format!("Ollama request failed: {e}")))?;

        Ok(response.message.content)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _max_tokens: usize,
    ) -> Result<TokenStream, LlmError> {
        let stream = self
            .client
            .send_chat_messages_stream(self.request(prompt))
            .await
            .map_err(|e| LlmError::Inference(format!("Ollama streaming request failed: {e}")))?;

        let mapped = stream.map(|item| match item {
            Ok(response) => Ok(response.message.content),
            Err(()) => Err(LlmError::Inference("Ollama stream chunk failed".into())),
        });

        Ok(Box::pin(mapped))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(text),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Inference(format!("Ollama embedding request failed: {e}")))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port() {
        let (host, port) = parse_host_port("http://localhost");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_trailing_slash() {
        let (host, port) = parse_host_port("http://10.0.0.5:9999/");
        assert_eq!(host, "http://10.0.0.5");
        assert_eq!(port, 9999);
    }

    #[tokio::test]
    async fn generate_unreachable_errors() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        let result = provider.generate("hello", 16).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn generate_stream_unreachable_errors() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        let result = provider.generate_stream("hello", 16).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn embed_unreachable_errors() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        let result = provider.embed("hello").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_unreachable_errors() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        assert!(provider.health_check().await.is_err());
    }
}
