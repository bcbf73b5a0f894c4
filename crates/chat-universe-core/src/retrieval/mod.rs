//! Retrieval backend abstraction.
//!
//! The hybrid search engine talks to three collaborators, all defined as
//! traits here so that SQLite, in-memory, or remote implementations can
//! be swapped in:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`FullTextIndex`] | Ranked full-text query over the unit corpus |
//! | [`SemanticIndex`] | Query embedding + vector-similarity query |
//! | [`UnitCatalog`] | Canonical unit/document lookup (parity + filters) |
//!
//! The relational store is the source of truth. A semantic index may be
//! stale relative to it; the engine reconciles through [`UnitCatalog`] at
//! query time instead of assuming write-time consistency.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// A full-text hit. Lists are returned best-first.
#[derive(Debug, Clone)]
pub struct FullTextHit {
    pub unit_id: String,
    /// Backend-specific relevance (higher is better). Only the rank is fused.
    pub score: f64,
}

/// A vector-similarity hit. Lists are returned best-first.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub unit_id: String,
    /// Raw similarity reported by the backend.
    pub similarity: f64,
}

/// Canonical view of a searchable unit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    pub id: String,
    pub thread_id: Option<String>,
    /// Legacy conversation reference.
    pub conversation_id: Option<String>,
    pub document_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    /// Unit's own timestamp (Unix seconds).
    pub timestamp: Option<i64>,
}

/// Backing document of a unit, used by source/format filters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDocument {
    pub id: String,
    pub source_id: String,
    pub format: String,
    pub title: Option<String>,
    pub source_path: Option<String>,
}

#[async_trait]
pub trait FullTextIndex: Send + Sync {
    /// Ranked unit ids matching `query`, at most `limit`.
    async fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<FullTextHit>>;
}

#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Embed the query text. Failure here means the backend is unavailable.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Nearest units to `vector`, at most `limit`.
    async fn nearest(&self, vector: &[f32], limit: usize) -> Result<Vec<SemanticHit>>;
}

#[async_trait]
pub trait UnitCatalog: Send + Sync {
    /// Resolve unit ids; ids the catalog does not know are absent from the map.
    async fn resolve_units(&self, ids: &[String]) -> Result<HashMap<String, UnitRecord>>;

    /// Resolve document ids; unknown ids are absent from the map.
    async fn resolve_documents(&self, ids: &[String]) -> Result<HashMap<String, UnitDocument>>;
}

#[async_trait]
impl<T: FullTextIndex + ?Sized> FullTextIndex for Arc<T> {
    async fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<FullTextHit>> {
        (**self).search_full_text(query, limit).await
    }
}

#[async_trait]
impl<T: SemanticIndex + ?Sized> SemanticIndex for Arc<T> {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed_query(text).await
    }

    async fn nearest(&self, vector: &[f32], limit: usize) -> Result<Vec<SemanticHit>> {
        (**self).nearest(vector, limit).await
    }
}

#[async_trait]
impl<T: UnitCatalog + ?Sized> UnitCatalog for Arc<T> {
    async fn resolve_units(&self, ids: &[String]) -> Result<HashMap<String, UnitRecord>> {
        (**self).resolve_units(ids).await
    }

    async fn resolve_documents(&self, ids: &[String]) -> Result<HashMap<String, UnitDocument>> {
        (**self).resolve_documents(ids).await
    }
}
