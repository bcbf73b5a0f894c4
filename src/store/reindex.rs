//! Full-corpus rebuild of the lexicon, occurrences and co-occurrence graph.

use anyhow::Result;
use sqlx::Row;
use tracing::{debug, info};

use chat_universe_core::models::ReindexStats;

use super::{fetch_thread_turns, graph, indexer, IndexingStore};

impl IndexingStore {
    /// Wipe and rebuild term occurrences, thematic edges and the lexicon
    /// for every thread, in one transaction.
    ///
    /// Threads are indexed most recently updated first. Edges are rebuilt
    /// in a second pass once every thread's terms exist, so the resulting
    /// graph is symmetric.
    pub async fn reindex_universe(&self) -> Result<ReindexStats> {
        let mut tx = self.begin_write().await?;

        sqlx::query("DELETE FROM term_occurrences")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM thematic_edges")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM term_lexicon")
            .execute(&mut *tx)
            .await?;

        let threads: Vec<(String, String)> = sqlx::query(
            "SELECT id, provider_ref_id FROM chat_threads ORDER BY updated_at DESC, id ASC",
        )
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| (row.get("id"), row.get("provider_ref_id")))
        .collect();

        let mut stats = ReindexStats {
            threads: threads.len() as i64,
            ..Default::default()
        };

        for (thread_id, provider_ref_id) in &threads {
            let turns = fetch_thread_turns(&mut tx, thread_id).await?;
            let indexed =
                indexer::index_thread_terms(&mut tx, thread_id, provider_ref_id, &turns).await?;
            indexer::acquire_terms(&mut tx, &indexed.lexicon_ids).await?;
            stats.turns += turns.len() as i64;
            stats.occurrences += indexed.occurrences;
        }

        for (thread_id, _) in &threads {
            let edges = graph::rebuild_thread_edges(&mut tx, thread_id).await?;
            debug!(thread_id = %thread_id, edges, "rebuilt thread edges");
            stats.edges += edges;
        }

        stats.terms = sqlx::query_scalar("SELECT COUNT(*) FROM term_lexicon")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            threads = stats.threads,
            turns = stats.turns,
            terms = stats.terms,
            occurrences = stats.occurrences,
            edges = stats.edges,
            "reindexed universe"
        );

        Ok(stats)
    }
}
