//! In-memory retrieval backends for testing and embedding in other hosts.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Full-text search counts matching query terms per unit; vector search is
//! brute-force cosine similarity over all stored vectors.
//!
//! Units and vectors are held separately, and removing a unit leaves its
//! vector behind, which mirrors a vector index lagging the source of truth.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, embed_one, EmbeddingProvider};
use crate::tokenize::{tokenize_query, tokenize_turns};

use super::{
    FullTextHit, FullTextIndex, SemanticHit, SemanticIndex, UnitCatalog, UnitDocument, UnitRecord,
};

struct StoredVector {
    unit_id: String,
    vector: Vec<f32>,
}

/// In-memory unit corpus implementing all three retrieval traits.
pub struct InMemoryUnitIndex {
    units: RwLock<HashMap<String, UnitRecord>>,
    documents: RwLock<HashMap<String, UnitDocument>>,
    vectors: RwLock<Vec<StoredVector>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl InMemoryUnitIndex {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            vectors: RwLock::new(Vec::new()),
            embedder: None,
        }
    }

    /// Attach the provider used by [`SemanticIndex::embed_query`].
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn insert_unit(&self, unit: UnitRecord) {
        self.units.write().unwrap().insert(unit.id.clone(), unit);
    }

    /// Remove a unit from the catalog only; its vector stays indexed.
    pub fn remove_unit(&self, id: &str) -> Option<UnitRecord> {
        self.units.write().unwrap().remove(id)
    }

    pub fn insert_document(&self, doc: UnitDocument) {
        self.documents.write().unwrap().insert(doc.id.clone(), doc);
    }

    pub fn upsert_vector(&self, unit_id: &str, vector: Vec<f32>) {
        let mut vecs = self.vectors.write().unwrap();
        vecs.retain(|sv| sv.unit_id != unit_id);
        vecs.push(StoredVector {
            unit_id: unit_id.to_string(),
            vector,
        });
    }

    pub fn unit_count(&self) -> usize {
        self.units.read().unwrap().len()
    }
}

impl Default for InMemoryUnitIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FullTextIndex for InMemoryUnitIndex {
    async fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<FullTextHit>> {
        let terms = tokenize_query(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let units = self.units.read().unwrap();
        let mut hits: Vec<FullTextHit> = units
            .values()
            .filter_map(|unit| {
                let unit_terms: HashSet<String> = tokenize_turns(&[unit.content.as_str()])
                    .into_iter()
                    .map(|t| t.normalized)
                    .collect();
                let matches = terms.iter().filter(|t| unit_terms.contains(*t)).count();
                (matches > 0).then(|| FullTextHit {
                    unit_id: unit.id.clone(),
                    score: matches as f64,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.unit_id.cmp(&b.unit_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl SemanticIndex for InMemoryUnitIndex {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match &self.embedder {
            Some(embedder) => embed_one(embedder.as_ref(), text).await,
            None => bail!("no embedding provider attached"),
        }
    }

    async fn nearest(&self, vector: &[f32], limit: usize) -> Result<Vec<SemanticHit>> {
        let vecs = self.vectors.read().unwrap();
        let mut hits: Vec<SemanticHit> = vecs
            .iter()
            .map(|sv| SemanticHit {
                unit_id: sv.unit_id.clone(),
                similarity: cosine_similarity(vector, &sv.vector) as f64,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.unit_id.cmp(&b.unit_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl UnitCatalog for InMemoryUnitIndex {
    async fn resolve_units(&self, ids: &[String]) -> Result<HashMap<String, UnitRecord>> {
        let units = self.units.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| units.get(id).map(|u| (id.clone(), u.clone())))
            .collect())
    }

    async fn resolve_documents(&self, ids: &[String]) -> Result<HashMap<String, UnitDocument>> {
        let docs = self.documents.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id).map(|d| (id.clone(), d.clone())))
            .collect())
    }
}
