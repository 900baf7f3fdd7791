pub mod embed;
pub mod generate;
pub mod loader;

pub use candle_core::Device;

use tokenizers::Tokenizer;

use crate::engine::LocalModelConfig;
use crate::error::LlmError;
use crate::provider::{LlmProvider, TokenStream};

use self::embed::BertEmbedder;
use self::generate::{GenerationOutput, SamplingConfig, generate_tokens};
use self::loader::{LoadedModel, ModelSource, load_gguf_model};

use candle_transformers::models::quantized_llama::ModelWeights;

#[derive(Clone)]
pub struct CandleProvider {
    // NOTE: std::sync::Mutex serializes inference; one request runs at a time.
    weights: std::sync::Arc<std::sync::Mutex<ModelWeights>>,
    tokenizer: std::sync::Arc<Tokenizer>,
    eos_token_id: u32,
    sampling: SamplingConfig,
    embed_model: Option<std::sync::Arc<BertEmbedder>>,
    device: Device,
}

impl std::fmt::Debug for CandleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleProvider")
            .field("sampling", &self.sampling)
            .field("device", &format!("{:?}", self.device))
            .field("embed_model", &self.embed_model)
            .finish_non_exhaustive()
    }
}

impl CandleProvider {
    /// Load the quantized generation model (and embedding model, when
    /// configured) off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if model download, parsing, or weight loading fails.
    pub async fn load(config: &LocalModelConfig) -> Result<Self, LlmError> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::load_sync(&config))
            .await
            .map_err(|e| LlmError::ModelLoad(format!("candle load task failed: {e}")))?
    }

    fn load_sync(config: &LocalModelConfig) -> Result<Self, LlmError> {
        let device = Device::Cpu;
        let source = ModelSource::from_config(config);
        let LoadedModel {
            weights,
            tokenizer,
            eos_token_id,
        } = load_gguf_model(&source, &device)?;

        let embed_model = match config.embedding_repo.as_deref() {
            Some(repo) => Some(std::sync::Arc::new(BertEmbedder::load(repo, &device)?)),
            None => None,
        };

        Ok(Self {
            weights: std::sync::Arc::new(std::sync::Mutex::new(weights)),
            tokenizer: std::sync::Arc::new(tokenizer),
            eos_token_id,
            sampling: SamplingConfig::default(),
            embed_model,
            device,
        })
    }

    #[must_use]
    pub fn device_name(&self) -> &'static str {
        match &self.device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }

    fn generate_sync(
        &self,
        prompt: &str,
        max_tokens: usize,
        on_fragment: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, LlmError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| LlmError::Inference(format!("tokenizer encode failed: {e}")))?;
        let input_tokens = encoding.get_ids();

        let weights = self.weights.clone();
        let mut forward_fn =
            |input: &candle_core::Tensor, pos: usize| -> Result<candle_core::Tensor, LlmError> {
                let mut w = weights
                    .lock()
                    .map_err(|e| LlmError::Inference(format!("model lock poisoned: {e}")))?;
                w.forward(input, pos).map_err(LlmError::Candle)
            };

        let GenerationOutput {
            text,
            tokens_generated,
        } = generate_tokens(
            &mut forward_fn,
            &self.tokenizer,
            input_tokens,
            &self.sampling,
            max_tokens,
            self.eos_token_id,
            &self.device,
            on_fragment,
        )?;

        tracing::debug!("generated {tokens_generated} token(s)");
        Ok(text)
    }
}

impl LlmProvider for CandleProvider {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, LlmError> {
        let provider = self.clone();
        let prompt = prompt.to_owned();
        tokio::task::spawn_blocking(move || {
            provider.generate_sync(&prompt, max_tokens, &mut |_| true)
        })
        .await
        .map_err(|e| LlmError::Inference(format!("candle generation task failed: {e}")))?
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<TokenStream, LlmError> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider = self.clone();
        let prompt = prompt.to_owned();

        tokio::task::spawn_blocking(move || {
            // A dropped receiver stops the token loop via the callback.
            let sender = tx.clone();
            let mut on_fragment =
                |fragment: &str| sender.blocking_send(Ok(fragment.to_owned())).is_ok();
            if let Err(e) = provider.generate_sync(&prompt, max_tokens, &mut on_fragment) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let Some(ref embed_model) = self.embed_model else {
            return Err(LlmError::EmbedUnsupported { provider: "candle" });
        };
        let model = embed_model.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || model.embed_sync(&text))
            .await
            .map_err(|e| LlmError::Inference(format!("candle embedding task failed: {e}")))?
    }

    fn supports_embeddings(&self) -> bool {
        self.embed_model.is_some()
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "candle"
    }
}
