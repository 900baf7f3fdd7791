//! BERT sentence embeddings for the local backend.

use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::error::LlmError;

/// Files a BERT checkpoint needs before it can serve embeddings.
struct BertAssets {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

fn fetch_assets(repo_id: &str) -> Result<BertAssets, LlmError> {
    let api = hf_hub::api::sync::Api::new().map_err(|e| {
        LlmError::ModelLoad(format!("failed to create HuggingFace API client: {e}"))
    })?;
    let repo = api.model(repo_id.to_owned());
    let fetch = |file: &str| {
        repo.get(file).map_err(|e| {
            LlmError::ModelLoad(format!("failed to download {file} from {repo_id}: {e}"))
        })
    };
    Ok(BertAssets {
        config: fetch("config.json")?,
        tokenizer: fetch("tokenizer.json")?,
        weights: fetch("model.safetensors")?,
    })
}

/// Turns chunk and question text into fixed-width vectors: a BERT forward
/// pass, mean pooling over the real tokens, then L2 normalization so stored
/// and query vectors compare on direction alone.
#[derive(Clone)]
pub struct BertEmbedder {
    model: Arc<BertModel>,
    tokenizer: Tokenizer,
    device: Device,
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl BertEmbedder {
    /// Fetch a checkpoint from `HuggingFace` Hub and load it onto `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails or the checkpoint is malformed.
    pub fn load(repo_id: &str, device: &Device) -> Result<Self, LlmError> {
        let assets = fetch_assets(repo_id)?;

        let raw = std::fs::read_to_string(&assets.config)
            .map_err(|e| LlmError::ModelLoad(format!("failed to read BERT config: {e}")))?;
        let config: BertConfig = serde_json::from_str(&raw)
            .map_err(|e| LlmError::ModelLoad(format!("failed to parse BERT config: {e}")))?;

        let tokenizer = Tokenizer::from_file(&assets.tokenizer)
            .map_err(|e| LlmError::ModelLoad(format!("failed to load tokenizer: {e}")))?;

        // SAFETY: the safetensors file comes straight from hf-hub and is not
        // touched while the VarBuilder maps it.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[assets.weights], DType::F32, device)?
        };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model: Arc::new(model),
            tokenizer,
            device: device.clone(),
        })
    }

    /// Embed one text. Blocking; callers run this off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or the forward pass fails.
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| LlmError::Inference(format!("tokenizer encode failed: {e}")))?;

        let token_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let attention = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self.model.forward(&token_ids, &type_ids, Some(&attention))?;

        // Pool over attended positions only; padding contributes nothing.
        let mask = attention.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let unit = pooled.broadcast_div(&norm)?.squeeze(0)?;
        unit.to_vec1::<f32>().map_err(LlmError::Candle)
    }
}
