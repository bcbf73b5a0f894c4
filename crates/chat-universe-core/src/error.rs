//! Error types surfaced by the hybrid search engine.
//!
//! Everything else in the crate reports failures through `anyhow`; these
//! variants exist so callers can decide on their own fallback policy
//! (e.g. retry as full-text only) by downcasting.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// The embedding backend could not produce a query vector
    /// (missing credentials, provider disabled, backend down).
    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// The full-text backend failed.
    #[error("Full-text backend failed: {0}")]
    FullText(String),
    /// The vector-similarity backend failed after producing a query vector.
    #[error("Vector backend failed: {0}")]
    VectorQuery(String),
}
