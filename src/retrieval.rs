//! SQLite retrieval backends for hybrid search.
//!
//! - [`SqliteUnitIndex`]: FTS5 full-text over `units_fts` (bm25 ranking)
//!   and the canonical unit/document catalog used for parity checks and
//!   source/format filters.
//! - [`SqliteSemanticIndex`]: brute-force cosine similarity over
//!   `unit_vectors`, restricted to vectors with the provider's
//!   dimensionality. Vectors may outlive their units; the search engine
//!   drops those through the catalog.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use chat_universe_core::embedding::{blob_to_vec, cosine_similarity, embed_one, EmbeddingProvider};
use chat_universe_core::models::json_string_list;
use chat_universe_core::retrieval::{
    FullTextHit, FullTextIndex, SemanticHit, SemanticIndex, UnitCatalog, UnitDocument, UnitRecord,
};
use chat_universe_core::tokenize::tokenize_query;

/// Ids bound per `IN (...)` lookup.
const LOOKUP_BATCH: usize = 500;

/// Build an FTS5 expression matching any query term. Terms are quoted so
/// FTS5 operators in user input are treated as text.
pub fn fts_match_expression(query: &str) -> Option<String> {
    let terms = tokenize_query(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Full-text index and unit catalog over the relational store.
#[derive(Clone)]
pub struct SqliteUnitIndex {
    pool: SqlitePool,
}

impl SqliteUnitIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FullTextIndex for SqliteUnitIndex {
    async fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<FullTextHit>> {
        let expression = match fts_match_expression(query) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT unit_id, bm25(units_fts) AS rank
            FROM units_fts
            WHERE units_fts MATCH ?
            ORDER BY rank ASC, unit_id ASC
            LIMIT ?
            "#,
        )
        .bind(&expression)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                FullTextHit {
                    unit_id: row.get("unit_id"),
                    // bm25 is lower-is-better.
                    score: -rank,
                }
            })
            .collect())
    }
}

#[async_trait]
impl UnitCatalog for SqliteUnitIndex {
    async fn resolve_units(&self, ids: &[String]) -> Result<HashMap<String, UnitRecord>> {
        let mut found = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(LOOKUP_BATCH) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, thread_id, conversation_id, document_id, title, content, tags_json, unit_ts \
                 FROM units WHERE id IN (",
            );
            let mut separated = builder.separated(", ");
            for id in batch {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in &rows {
                let tags_json: Option<String> = row.get("tags_json");
                let unit = UnitRecord {
                    id: row.get("id"),
                    thread_id: row.get("thread_id"),
                    conversation_id: row.get("conversation_id"),
                    document_id: row.get("document_id"),
                    title: row.get("title"),
                    content: row.get("content"),
                    tags: json_string_list(tags_json.as_deref()),
                    timestamp: row.get("unit_ts"),
                };
                found.insert(unit.id.clone(), unit);
            }
        }
        Ok(found)
    }

    async fn resolve_documents(&self, ids: &[String]) -> Result<HashMap<String, UnitDocument>> {
        let mut found = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(LOOKUP_BATCH) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, source_id, format, title, source_path FROM documents WHERE id IN (",
            );
            let mut separated = builder.separated(", ");
            for id in batch {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in &rows {
                let doc = UnitDocument {
                    id: row.get("id"),
                    source_id: row.get("source_id"),
                    format: row.get("format"),
                    title: row.get("title"),
                    source_path: row.get("source_path"),
                };
                found.insert(doc.id.clone(), doc);
            }
        }
        Ok(found)
    }
}

/// Vector similarity over stored unit embeddings.
#[derive(Clone)]
pub struct SqliteSemanticIndex {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
}

impl SqliteSemanticIndex {
    pub fn new(pool: SqlitePool, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, provider }
    }
}

#[async_trait]
impl SemanticIndex for SqliteSemanticIndex {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        embed_one(self.provider.as_ref(), text).await
    }

    async fn nearest(&self, vector: &[f32], limit: usize) -> Result<Vec<SemanticHit>> {
        let rows = sqlx::query("SELECT unit_id, embedding FROM unit_vectors WHERE dims = ?")
            .bind(vector.len() as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<SemanticHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                SemanticHit {
                    unit_id: row.get("unit_id"),
                    similarity: cosine_similarity(vector, &stored) as f64,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
