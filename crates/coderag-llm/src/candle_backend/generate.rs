use candle_core::Tensor;

use crate::error::LlmError;
use candle_transformers::generation::LogitsProcessor;

#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub seed: u64,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: Some(0.9),
            top_k: None,
            seed: 42,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
        }
    }
}

pub struct GenerationOutput {
    pub text: String,
    pub tokens_generated: usize,
}

/// Run the token generation loop on a quantized llama model.
///
/// `forward_fn` abstracts over the specific model variant's forward pass.
/// Every decoded text delta is pushed through `on_fragment` as soon as the
/// token producing it is sampled; returning `false` from the callback stops
/// generation early.
///
/// # Errors
///
/// Returns an error if the forward pass or token decoding fails.
#[allow(clippy::too_many_arguments)]
pub fn generate_tokens<F, C>(
    forward_fn: &mut F,
    tokenizer: &tokenizers::Tokenizer,
    input_tokens: &[u32],
    sampling: &SamplingConfig,
    max_tokens: usize,
    eos_token_id: u32,
    device: &candle_core::Device,
    on_fragment: &mut C,
) -> Result<GenerationOutput, LlmError>
where
    F: FnMut(&Tensor, usize) -> Result<Tensor, LlmError>,
    C: FnMut(&str) -> bool,
{
    let mut logits_processor = LogitsProcessor::from_sampling(
        sampling.seed,
        candle_transformers::generation::Sampling::TopKThenTopP {
            k: sampling.top_k.unwrap_or(40),
            p: sampling.top_p.unwrap_or(0.9),
            temperature: sampling.temperature,
        },
    );

    let mut all_tokens: Vec<u32> = input_tokens.to_vec();
    let mut generated_tokens: Vec<u32> = Vec::with_capacity(max_tokens);
    let mut emitter = FragmentEmitter::default();

    if max_tokens == 0 {
        return Ok(GenerationOutput {
            text: String::new(),
            tokens_generated: 0,
        });
    }

    // Process the prompt in one batch
    let input = Tensor::new(input_tokens, device)?;
    let logits = forward_fn(&input, 0)?;
    let logits = logits.squeeze(0)?.to_dtype(candle_core::DType::F32)?;

    // Logits for the last prompt position
    let seq_len = logits.dim(0)?;
    let last_logits = logits.get(seq_len - 1)?;
    let last_logits = apply_repeat_penalty(
        &last_logits,
        &all_tokens,
        sampling.repeat_penalty,
        sampling.repeat_last_n,
    )?;

    let mut next_token = logits_processor.sample(&last_logits)?;
    generated_tokens.push(next_token);
    all_tokens.push(next_token);

    if next_token != eos_token_id && emitter.emit(tokenizer, &generated_tokens, on_fragment)? {
        // Autoregressive generation
        for i in 0..max_tokens.saturating_sub(1) {
            let input = Tensor::new(&[next_token], device)?;
            let pos = input_tokens.len() + i + 1;
            let logits = forward_fn(&input, pos)?;
            let logits = logits.squeeze(0)?.to_dtype(candle_core::DType::F32)?;

            let last_logits = if logits.dims().len() > 1 {
                let seq_len = logits.dim(0)?;
                logits.get(seq_len - 1)?
            } else {
                logits
            };

            let last_logits = apply_repeat_penalty(
                &last_logits,
                &all_tokens,
                sampling.repeat_penalty,
                sampling.repeat_last_n,
            )?;

            next_token = logits_processor.sample(&last_logits)?;
            generated_tokens.push(next_token);
            all_tokens.push(next_token);

            if next_token == eos_token_id {
                break;
            }
            if !emitter.emit(tokenizer, &generated_tokens, on_fragment)? {
                break;
            }
        }
    }

    let text = decode_tokens(tokenizer, &generated_tokens)?;
    if text.len() > emitter.emitted {
        on_fragment(&text[emitter.emitted..]);
    }
    Ok(GenerationOutput {
        text,
        tokens_generated: generated_tokens.len(),
    })
}

/// Tracks how much decoded text has been pushed out so far, so each sampled
/// token only emits the new suffix.
#[derive(Default)]
struct FragmentEmitter {
    emitted: usize,
}

impl FragmentEmitter {
    /// Decode everything generated so far and emit the unseen suffix. Returns
    /// `false` when the consumer asked to stop.
    fn emit<C>(
        &mut self,
        tokenizer: &tokenizers::Tokenizer,
        generated: &[u32],
        on_fragment: &mut C,
    ) -> Result<bool, LlmError>
    where
        C: FnMut(&str) -> bool,
    {
        let decoded = decode_tokens(tokenizer, generated)?;
        // A trailing replacement char means the last token is half of a
        // multi-byte sequence; wait for the next token to complete it.
        if decoded.ends_with('\u{FFFD}') || decoded.len() <= self.emitted {
            return Ok(true);
        }
        let fragment = &decoded[self.emitted..];
        self.emitted = decoded.len();
        Ok(on_fragment(fragment))
    }
}

fn apply_repeat_penalty(
    logits: &Tensor,
    tokens: &[u32],
    penalty: f32,
    last_n: usize,
) -> Result<Tensor, LlmError> {
    if (penalty - 1.0).abs() < f32::EPSILON {
        return Ok(logits.clone());
    }
    let start = tokens.len().saturating_sub(last_n);
    let recent = &tokens[start..];
    candle_transformers::utils::apply_repeat_penalty(logits, penalty, recent)
        .map_err(LlmError::Candle)
}

fn decode_tokens(tokenizer: &tokenizers::Tokenizer, tokens: &[u32]) -> Result<String, LlmError> {
    tokenizer
        .decode(tokens, true)
        .map_err(|e| LlmError::Inference(format!("tokenizer decode failed: {e}")))
}
