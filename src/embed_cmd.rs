//! Vector backfill for search units.
//!
//! A unit needs embedding when it has no stored vector, when its content
//! hash (sha256) changed, or when the stored vector came from a different
//! model. Vectors are written to `unit_vectors`, which is never touched by
//! relational deletes; search drops orphaned vectors through the catalog.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use chat_universe_core::embedding::{vec_to_blob, EmbeddingProvider};

use crate::config::Config;
use crate::embedding;
use crate::store::IndexingStore;

/// A unit whose vector is missing or stale.
#[derive(Debug, Clone)]
pub struct PendingUnit {
    pub unit_id: String,
    pub content: String,
    pub content_hash: String,
}

/// Counters from one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedStats {
    pub pending: u64,
    pub embedded: u64,
    pub failed: u64,
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Units needing a (re-)embedding with `model`, oldest id first.
pub async fn find_pending_units(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingUnit>> {
    let rows = sqlx::query(
        r#"
        SELECT u.id, u.content, v.content_hash, v.model
        FROM units u
        LEFT JOIN unit_vectors v ON v.unit_id = u.id
        ORDER BY u.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut pending = Vec::new();
    for row in &rows {
        let content: String = row.get("content");
        let content_hash = hash_text(&content);
        let stored_hash: Option<String> = row.get("content_hash");
        let stored_model: Option<String> = row.get("model");

        if stored_hash.as_deref() == Some(content_hash.as_str())
            && stored_model.as_deref() == Some(model)
        {
            continue;
        }

        pending.push(PendingUnit {
            unit_id: row.get("id"),
            content,
            content_hash,
        });
        if limit.is_some_and(|l| pending.len() >= l) {
            break;
        }
    }

    Ok(pending)
}

pub async fn upsert_vector(
    pool: &SqlitePool,
    unit_id: &str,
    model: &str,
    content_hash: &str,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO unit_vectors (unit_id, model, dims, content_hash, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(unit_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            content_hash = excluded.content_hash,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(unit_id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(content_hash)
    .bind(vec_to_blob(vector))
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Embed every pending unit in batches. A failing batch is counted and
/// skipped; later batches still run.
pub async fn embed_pending(
    store: &IndexingStore,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<EmbedStats> {
    let model = provider.model_name().to_string();
    let pending = find_pending_units(store.pool(), &model, limit).await?;

    let mut stats = EmbedStats {
        pending: pending.len() as u64,
        ..Default::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();

        match provider.embed(&texts).await {
            Ok(vectors) => {
                for (item, vector) in batch.iter().zip(vectors.iter()) {
                    upsert_vector(
                        store.pool(),
                        &item.unit_id,
                        &model,
                        &item.content_hash,
                        vector,
                    )
                    .await?;
                    stats.embedded += 1;
                }
                debug!(batch = batch.len(), "embedded batch");
            }
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "embedding batch failed");
                stats.failed += batch.len() as u64;
            }
        }
    }

    Ok(stats)
}

/// `chatu embed pending`.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let store = IndexingStore::open(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    if dry_run {
        let pending = find_pending_units(store.pool(), provider.model_name(), limit).await?;
        println!("embed pending (dry-run)");
        println!("  units needing embeddings: {}", pending.len());
        store.close().await;
        return Ok(());
    }

    let stats = embed_pending(&store, provider, batch_size, limit).await;
    store.close().await;
    let stats = stats?;

    println!("embed pending");
    if stats.pending == 0 {
        println!("  all units up to date");
        return Ok(());
    }
    println!("  total pending: {}", stats.pending);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);
    Ok(())
}
