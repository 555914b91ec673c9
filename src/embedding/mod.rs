//! Text-to-vector embedding collaborator.
//!
//! The store never calls an embedding provider itself: callers embed note text
//! and queries, then hand the vectors to a [`Store`](crate::store::Store).
//! Provider clients (OpenAI, Ollama, ...) live outside this crate and implement
//! [`EmbeddingProvider`]. [`DimensionDiscovery`] wraps any provider to learn
//! the output width on first use.

pub mod discovery;

pub use discovery::DimensionDiscovery;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Number of dimensions this provider produces, or 0 while still unknown.
    fn dimensions(&self) -> usize;
}
