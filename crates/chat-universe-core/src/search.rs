//! Hybrid search engine: full-text + semantic retrieval fused with RRF.
//!
//! The algorithm operates entirely through the retrieval traits in
//! [`crate::retrieval`], with no database or configuration dependencies.
//!
//! # Pipeline
//!
//! 1. Run the full-text query and the semantic query concurrently; both
//!    must finish before fusion.
//! 2. Parity: drop semantic hits whose unit id the [`UnitCatalog`] does not
//!    know. Full-text hits are not re-checked.
//! 3. Fuse with weighted RRF: `w / (60 + rank + 1)`, summed across lists.
//! 4. Apply source/format filters against each unit's backing document.
//! 5. Add tag boosts (`chunk-strategy-*`, and `has-image` for visual queries).
//! 6. Apply the date range on the unit's own timestamp.
//! 7. Sort by combined score (desc), id (asc); truncate to `limit`.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::SearchError;
use crate::fusion::weighted_rrf;
use crate::retrieval::{FullTextIndex, SemanticIndex, UnitCatalog, UnitDocument, UnitRecord};

pub const DEFAULT_FTS_WEIGHT: f64 = 0.6;
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.4;
/// Candidates fetched from each backend when `limit` is smaller.
pub const DEFAULT_CANDIDATE_K: usize = 80;

pub const CHUNK_STRATEGY_TAG_PREFIX: &str = "chunk-strategy-";
pub const HAS_IMAGE_TAG: &str = "has-image";
pub const CHUNK_STRATEGY_BOOST: f64 = 0.05;
pub const IMAGE_BOOST: f64 = 0.02;

/// Source filter value that falls back to conversation-backed units when
/// no result has a resolvable document.
pub const CONVERSATION_SOURCE_FALLBACK: &str = "claude";

const SNIPPET_CHARS: usize = 240;

lazy_static! {
    static ref VISUAL_INTENT_RE: Regex = Regex::new(
        r"(?i)\b(?:images?|photos?|diagrams?|screenshots?|mockups?|wireframes?|charts?|graphs?|figures?|uis?|uxs?|visuals?)\b"
    )
    .unwrap();
}

/// Whether the query text asks for visual material.
pub fn has_visual_intent(query: &str) -> bool {
    VISUAL_INTENT_RE.is_match(query)
}

/// Additive boost for a unit's tags given the query's visual intent.
pub fn tag_boost(tags: &[String], visual_intent: bool) -> f64 {
    let mut boost = 0.0;
    if tags.iter().any(|t| t.starts_with(CHUNK_STRATEGY_TAG_PREFIX)) {
        boost += CHUNK_STRATEGY_BOOST;
    }
    if visual_intent && tags.iter().any(|t| t == HAS_IMAGE_TAG) {
        boost += IMAGE_BOOST;
    }
    boost
}

/// Per-list RRF weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchWeights {
    pub fts: f64,
    pub semantic: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            fts: DEFAULT_FTS_WEIGHT,
            semantic: DEFAULT_SEMANTIC_WEIGHT,
        }
    }
}

/// Metadata and date filters. Date bounds are inclusive Unix seconds.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source: Option<String>,
    pub format: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl SearchFilters {
    fn has_document_filter(&self) -> bool {
        self.source.is_some() || self.format.is_some()
    }

    fn has_date_filter(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    fn document_matches(&self, doc: &UnitDocument) -> bool {
        self.source.as_deref().map_or(true, |s| doc.source_id == s)
            && self.format.as_deref().map_or(true, |f| doc.format == f)
    }

    fn timestamp_in_range(&self, ts: Option<i64>) -> bool {
        if !self.has_date_filter() {
            return true;
        }
        match ts {
            Some(ts) => {
                self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
            }
            None => false,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub limit: usize,
    pub weights: SearchWeights,
    pub filters: SearchFilters,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResult {
    pub id: String,
    pub title: Option<String>,
    pub snippet: String,
    pub thread_id: Option<String>,
    pub conversation_id: Option<String>,
    pub document_id: Option<String>,
    pub tags: Vec<String>,
    pub timestamp: Option<i64>,
    /// `1.0` if the unit was a full-text hit, else `0.0`.
    pub fts_score: f64,
    /// Raw similarity if the unit was a semantic hit, else `0.0`.
    pub semantic_score: f64,
    pub combined_score: f64,
}

struct Candidate<'u> {
    id: String,
    unit: Option<&'u UnitRecord>,
    fts_score: f64,
    semantic_score: f64,
    combined_score: f64,
}

impl Candidate<'_> {
    fn document_id(&self) -> Option<&str> {
        self.unit.and_then(|u| u.document_id.as_deref())
    }

    fn into_result(self) -> HybridResult {
        let unit = self.unit;
        HybridResult {
            id: self.id,
            title: unit.and_then(|u| u.title.clone()),
            snippet: unit
                .map(|u| u.content.chars().take(SNIPPET_CHARS).collect())
                .unwrap_or_default(),
            thread_id: unit.and_then(|u| u.thread_id.clone()),
            conversation_id: unit.and_then(|u| u.conversation_id.clone()),
            document_id: unit.and_then(|u| u.document_id.clone()),
            tags: unit.map(|u| u.tags.clone()).unwrap_or_default(),
            timestamp: unit.and_then(|u| u.timestamp),
            fts_score: self.fts_score,
            semantic_score: self.semantic_score,
            combined_score: self.combined_score,
        }
    }
}

/// Orchestrates the two retrieval backends and the unit catalog.
pub struct HybridSearchEngine<F, S, C> {
    full_text: F,
    semantic: S,
    catalog: C,
    candidate_k: usize,
}

impl<F, S, C> HybridSearchEngine<F, S, C>
where
    F: FullTextIndex,
    S: SemanticIndex,
    C: UnitCatalog,
{
    pub fn new(full_text: F, semantic: S, catalog: C) -> Self {
        Self {
            full_text,
            semantic,
            catalog,
            candidate_k: DEFAULT_CANDIDATE_K,
        }
    }

    pub fn with_candidate_k(mut self, candidate_k: usize) -> Self {
        self.candidate_k = candidate_k;
        self
    }

    /// Run a hybrid search.
    ///
    /// # Errors
    ///
    /// Fails with [`SearchError::EmbeddingUnavailable`] when no query
    /// vector can be produced; there is no full-text-only fallback here.
    pub async fn search(&self, req: &SearchRequest<'_>) -> Result<Vec<HybridResult>> {
        let query = req.query.trim();
        if query.is_empty() || req.limit == 0 {
            return Ok(Vec::new());
        }
        let k = req.limit.max(self.candidate_k);

        let full_text = async {
            self.full_text
                .search_full_text(query, k)
                .await
                .map_err(|e| SearchError::FullText(format!("{:#}", e)))
        };
        let semantic = async {
            let vector = self
                .semantic
                .embed_query(query)
                .await
                .map_err(|e| SearchError::EmbeddingUnavailable(format!("{:#}", e)))?;
            self.semantic
                .nearest(&vector, k)
                .await
                .map_err(|e| SearchError::VectorQuery(format!("{:#}", e)))
        };
        let (fts_hits, semantic_hits) = futures::try_join!(full_text, semantic)?;

        let mut lookup_ids: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for id in fts_hits
            .iter()
            .map(|h| h.unit_id.as_str())
            .chain(semantic_hits.iter().map(|h| h.unit_id.as_str()))
        {
            if seen.insert(id) {
                lookup_ids.push(id.to_string());
            }
        }
        let units = if lookup_ids.is_empty() {
            HashMap::new()
        } else {
            self.catalog.resolve_units(&lookup_ids).await?
        };

        let semantic_before = semantic_hits.len();
        let semantic_hits: Vec<_> = semantic_hits
            .into_iter()
            .filter(|h| units.contains_key(&h.unit_id))
            .collect();
        if semantic_hits.len() < semantic_before {
            debug!(
                dropped = semantic_before - semantic_hits.len(),
                "dropped semantic hits unknown to the relational store"
            );
        }

        let fts_ids: Vec<String> = fts_hits.iter().map(|h| h.unit_id.clone()).collect();
        let semantic_ids: Vec<String> = semantic_hits.iter().map(|h| h.unit_id.clone()).collect();
        let fts_set: HashSet<&str> = fts_ids.iter().map(String::as_str).collect();
        let mut similarity: HashMap<&str, f64> = HashMap::new();
        for hit in &semantic_hits {
            similarity.entry(hit.unit_id.as_str()).or_insert(hit.similarity);
        }

        let fused = weighted_rrf(&[
            (&fts_ids[..], req.weights.fts),
            (&semantic_ids[..], req.weights.semantic),
        ]);

        let mut candidates: Vec<Candidate<'_>> = fused
            .into_iter()
            .map(|(id, score)| Candidate {
                unit: units.get(&id),
                fts_score: if fts_set.contains(id.as_str()) { 1.0 } else { 0.0 },
                semantic_score: similarity.get(id.as_str()).copied().unwrap_or(0.0),
                combined_score: score,
                id,
            })
            .collect();

        if req.filters.has_document_filter() {
            candidates = self.apply_document_filters(candidates, &req.filters).await?;
        }

        let visual_intent = has_visual_intent(query);
        for c in &mut candidates {
            if let Some(unit) = c.unit {
                c.combined_score += tag_boost(&unit.tags, visual_intent);
            }
        }

        candidates.retain(|c| {
            req.filters
                .timestamp_in_range(c.unit.and_then(|u| u.timestamp))
        });

        candidates.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        candidates.truncate(req.limit);

        debug!(
            query,
            fts = fts_ids.len(),
            semantic = semantic_ids.len(),
            returned = candidates.len(),
            "hybrid search complete"
        );

        Ok(candidates.into_iter().map(Candidate::into_result).collect())
    }

    async fn apply_document_filters<'u>(
        &self,
        candidates: Vec<Candidate<'u>>,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate<'u>>> {
        let mut doc_ids: Vec<String> = Vec::new();
        for id in candidates.iter().filter_map(|c| c.document_id()) {
            if !doc_ids.iter().any(|d| d == id) {
                doc_ids.push(id.to_string());
            }
        }
        let documents = if doc_ids.is_empty() {
            HashMap::new()
        } else {
            self.catalog.resolve_documents(&doc_ids).await?
        };

        let has_candidates = candidates
            .iter()
            .any(|c| c.document_id().is_some_and(|d| documents.contains_key(d)));

        if !has_candidates {
            if filters.source.as_deref() == Some(CONVERSATION_SOURCE_FALLBACK) {
                return Ok(candidates
                    .into_iter()
                    .filter(|c| c.unit.is_some_and(|u| u.conversation_id.is_some()))
                    .collect());
            }
            return Ok(Vec::new());
        }

        Ok(candidates
            .into_iter()
            .filter(|c| {
                c.document_id()
                    .and_then(|d| documents.get(d))
                    .is_some_and(|doc| filters.document_matches(doc))
            })
            .collect())
    }
}
