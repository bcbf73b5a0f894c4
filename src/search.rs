//! Hybrid search over the SQLite store.
//!
//! Wires the SQLite backends from [`crate::retrieval`] into the core
//! [`HybridSearchEngine`] and implements `chatu search`.
//!
//! When the embedding backend is unavailable the engine fails the whole
//! call. Falling back to full-text only is a caller decision; the CLI does
//! it only when `--keyword-fallback` is passed.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::warn;

use chat_universe_core::embedding::EmbeddingProvider;
use chat_universe_core::error::SearchError;
use chat_universe_core::retrieval::{SemanticHit, SemanticIndex};
use chat_universe_core::search::{
    HybridResult, HybridSearchEngine, SearchFilters, SearchRequest, SearchWeights,
};

use crate::config::{Config, RetrievalConfig};
use crate::embedding;
use crate::retrieval::{SqliteSemanticIndex, SqliteUnitIndex};
use crate::store::IndexingStore;

pub type SqliteHybridEngine =
    HybridSearchEngine<SqliteUnitIndex, SqliteSemanticIndex, SqliteUnitIndex>;

/// Build the engine for a pool and embedding provider.
pub fn build_engine(
    pool: &SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    retrieval: &RetrievalConfig,
) -> SqliteHybridEngine {
    let units = SqliteUnitIndex::new(pool.clone());
    HybridSearchEngine::new(
        units.clone(),
        SqliteSemanticIndex::new(pool.clone(), provider),
        units,
    )
    .with_candidate_k(retrieval.candidate_k)
}

/// Semantic index that contributes nothing. Used for the explicit
/// full-text-only fallback.
struct EmptySemanticIndex;

#[async_trait]
impl SemanticIndex for EmptySemanticIndex {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    async fn nearest(&self, _vector: &[f32], _limit: usize) -> Result<Vec<SemanticHit>> {
        Ok(Vec::new())
    }
}

/// Options for `chatu search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub source: Option<String>,
    pub format: Option<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub since: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub fts_weight: Option<f64>,
    pub semantic_weight: Option<f64>,
    pub keyword_fallback: bool,
    pub json: bool,
}

/// Parse a `YYYY-MM-DD` bound into Unix seconds at the start (or end) of
/// that UTC day.
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<i64> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", raw))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc().timestamp())
        .ok_or_else(|| anyhow::anyhow!("Invalid date '{}'", raw))
}

/// Search the configured database.
pub async fn search_store(
    config: &Config,
    store: &IndexingStore,
    query: &str,
    opts: &SearchOptions,
) -> Result<Vec<HybridResult>> {
    let filters = SearchFilters {
        source: opts.source.clone(),
        format: opts.format.clone(),
        from: opts
            .since
            .as_deref()
            .map(|s| parse_date_bound(s, false))
            .transpose()?,
        to: opts
            .until
            .as_deref()
            .map(|s| parse_date_bound(s, true))
            .transpose()?,
    };
    let request = SearchRequest {
        query,
        limit: opts.limit.unwrap_or(config.retrieval.final_limit),
        weights: SearchWeights {
            fts: opts.fts_weight.unwrap_or(config.retrieval.fts_weight),
            semantic: opts
                .semantic_weight
                .unwrap_or(config.retrieval.semantic_weight),
        },
        filters,
    };

    let provider = embedding::create_provider(&config.embedding)?;
    let engine = build_engine(store.pool(), provider, &config.retrieval);

    match engine.search(&request).await {
        Ok(results) => Ok(results),
        Err(err) if opts.keyword_fallback && is_embedding_unavailable(&err) => {
            warn!(error = %err, "semantic backend unavailable, using full-text only");
            let units = SqliteUnitIndex::new(store.pool().clone());
            HybridSearchEngine::new(units.clone(), EmptySemanticIndex, units)
                .with_candidate_k(config.retrieval.candidate_k)
                .search(&request)
                .await
        }
        Err(err) => Err(err),
    }
}

fn is_embedding_unavailable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SearchError>(),
        Some(SearchError::EmbeddingUnavailable(_))
    )
}

/// `chatu search`: run a hybrid search and print ranked results.
pub async fn run_search(config: &Config, query: &str, opts: &SearchOptions) -> Result<()> {
    let store = IndexingStore::open(config).await?;
    let results = search_store(config, &store, query, opts).await;
    store.close().await;
    let results = results?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        let date = result
            .timestamp
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.4}] {}",
            i + 1,
            result.combined_score,
            title_display
        );
        println!(
            "    fts: {:.0}  semantic: {:.3}",
            result.fts_score, result.semantic_score
        );
        if !date.is_empty() {
            println!("    date: {}", date);
        }
        if let Some(ref thread_id) = result.thread_id {
            println!("    thread: {}", thread_id);
        }
        if !result.tags.is_empty() {
            println!("    tags: {}", result.tags.join(", "));
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}
