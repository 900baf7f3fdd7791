//! Repository ingestion: clone, chunk, embed, store.

pub mod acquire;
pub mod error;
pub mod extract;
pub mod languages;
pub mod pipeline;

pub use acquire::{Checkout, RepoAcquirer};
pub use error::{IndexError, Result};
pub use languages::{Lang, detect_language};
pub use pipeline::{IngestReport, IngestStatus, IngestionPipeline};
