//! Text generation and embedding backends.
//!
//! A single [`provider::LlmProvider`] trait abstracts over a remote Ollama
//! backend and an optional in-process Candle backend. [`engine::GenerationEngine`]
//! picks one of the two exactly once per process lifetime, falling back to
//! remote when local model loading fails. [`embedding::EmbeddingService`]
//! wraps the shared provider for deterministic text-to-vector mapping.

pub mod any;
#[cfg(feature = "candle")]
pub mod candle_backend;
pub mod embedding;
pub mod engine;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::{LlmError, Result};
