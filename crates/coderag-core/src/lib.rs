//! Ties retrieval and generation into the question answering flow.

pub mod config;
pub mod error;
pub mod event;
pub mod rag;

pub use config::Config;
pub use error::RagError;
pub use event::{ChatEvent, Citation};
pub use rag::{Answer, EventStream, RagConfig, RagOrchestrator};
