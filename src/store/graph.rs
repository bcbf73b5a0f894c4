//! Thread co-occurrence graph.
//!
//! An edge `source -> target` weighs the number of distinct lexicon ids the
//! two threads share. Only the source thread's outgoing edges are rebuilt;
//! `target -> source` keeps whatever weight it had until the target is
//! reindexed itself.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use sqlx::{Row, SqliteConnection};

use chat_universe_core::models::EDGE_TYPE_COOCCURRENCE;

/// Outgoing edges kept per thread.
pub(crate) const MAX_EDGES_PER_THREAD: i64 = 100;

/// Replace the outgoing co-occurrence edges of `thread_id`. Returns the
/// number of edges written.
pub(crate) async fn rebuild_thread_edges(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<i64> {
    sqlx::query("DELETE FROM thematic_edges WHERE source_thread_id = ? AND edge_type = ?")
        .bind(thread_id)
        .bind(EDGE_TYPE_COOCCURRENCE)
        .execute(&mut *conn)
        .await?;

    let targets = sqlx::query(
        r#"
        SELECT o2.thread_id AS target_thread_id, COUNT(DISTINCT o2.lexicon_id) AS weight
        FROM (SELECT DISTINCT lexicon_id FROM term_occurrences WHERE thread_id = ?) src
        JOIN term_occurrences o2 ON o2.lexicon_id = src.lexicon_id
        WHERE o2.thread_id != ?
        GROUP BY o2.thread_id
        ORDER BY weight DESC, target_thread_id ASC
        LIMIT ?
        "#,
    )
    .bind(thread_id)
    .bind(thread_id)
    .bind(MAX_EDGES_PER_THREAD)
    .fetch_all(&mut *conn)
    .await?;

    let now = Utc::now().timestamp();
    for row in &targets {
        let target: String = row.get("target_thread_id");
        let weight: i64 = row.get("weight");
        let evidence = json!({ "sharedTerms": weight }).to_string();

        sqlx::query(
            r#"
            INSERT INTO thematic_edges
                (source_thread_id, target_thread_id, edge_type, weight, evidence_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_thread_id, target_thread_id, edge_type) DO UPDATE SET
                weight = excluded.weight,
                evidence_json = excluded.evidence_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(thread_id)
        .bind(&target)
        .bind(EDGE_TYPE_COOCCURRENCE)
        .bind(weight)
        .bind(&evidence)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(targets.len() as i64)
}
