//! Term indexing: lexicon upserts, occurrence rows and document frequency.
//!
//! `doc_freq` is maintained incrementally. Before a thread's occurrences are
//! deleted, [`release_thread_terms`] decrements every lexicon entry the
//! thread referenced; after the new occurrences are written,
//! [`acquire_terms`] increments each distinct entry once. Both run inside
//! the caller's transaction, so the counter always equals the number of
//! distinct threads with at least one occurrence.
//! [`IndexingStore::recompute_document_frequencies`] rebuilds the counter
//! from scratch as a repair step.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use chat_universe_core::models::ChatTurn;
use chat_universe_core::tokenize::tokenize_turns;

use super::IndexingStore;

/// Rows per multi-row INSERT; keeps bind counts well under SQLite's limit.
const OCCURRENCE_BATCH: usize = 500;
const ID_BATCH: usize = 900;

/// Result of indexing one thread.
#[derive(Debug, Default)]
pub(crate) struct ThreadTerms {
    pub occurrences: i64,
    /// Distinct lexicon ids referenced by the thread.
    pub lexicon_ids: Vec<i64>,
}

struct PendingOccurrence<'a> {
    lexicon_id: i64,
    turn_id: &'a str,
    position: i64,
    context_before: String,
    context_after: String,
}

/// Tokenize `turns` (already ordered by turn index) and write their
/// occurrences. Lexicon rows are created on first sight and keep the first
/// surface form they were created with.
pub(crate) async fn index_thread_terms(
    conn: &mut SqliteConnection,
    thread_id: &str,
    provider_ref_id: &str,
    turns: &[ChatTurn],
) -> Result<ThreadTerms> {
    let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
    let tokens = tokenize_turns(&contents);
    if tokens.is_empty() {
        return Ok(ThreadTerms::default());
    }

    let now = Utc::now().timestamp();
    let mut lexicon_cache: HashMap<String, i64> = HashMap::new();
    let mut lexicon_ids: Vec<i64> = Vec::new();
    let mut pending = Vec::with_capacity(tokens.len());

    for token in tokens {
        let lexicon_id = match lexicon_cache.get(&token.normalized) {
            Some(id) => *id,
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO term_lexicon (term, normalized_term, doc_freq, created_at, updated_at)
                    VALUES (?, ?, 0, ?, ?)
                    ON CONFLICT(normalized_term) DO UPDATE SET updated_at = excluded.updated_at
                    RETURNING id
                    "#,
                )
                .bind(&token.term)
                .bind(&token.normalized)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *conn)
                .await?;
                lexicon_cache.insert(token.normalized.clone(), id);
                lexicon_ids.push(id);
                id
            }
        };

        pending.push(PendingOccurrence {
            lexicon_id,
            turn_id: turns[token.turn_offset].id.as_str(),
            position: token.position,
            context_before: token.context_before,
            context_after: token.context_after,
        });
    }

    for batch in pending.chunks(OCCURRENCE_BATCH) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO term_occurrences \
             (lexicon_id, provider_ref_id, thread_id, turn_id, position, context_before, context_after) ",
        );
        builder.push_values(batch, |mut row, occ| {
            row.push_bind(occ.lexicon_id)
                .push_bind(provider_ref_id)
                .push_bind(thread_id)
                .push_bind(occ.turn_id)
                .push_bind(occ.position)
                .push_bind(occ.context_before.as_str())
                .push_bind(occ.context_after.as_str());
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(ThreadTerms {
        occurrences: pending.len() as i64,
        lexicon_ids,
    })
}

/// Decrement `doc_freq` for every term the thread currently references.
/// Must run before the thread's occurrences are deleted.
pub(crate) async fn release_thread_terms(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE term_lexicon
        SET doc_freq = MAX(doc_freq - 1, 0)
        WHERE id IN (SELECT DISTINCT lexicon_id FROM term_occurrences WHERE thread_id = ?)
        "#,
    )
    .bind(thread_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Increment `doc_freq` once per distinct lexicon id.
pub(crate) async fn acquire_terms(conn: &mut SqliteConnection, lexicon_ids: &[i64]) -> Result<()> {
    for batch in lexicon_ids.chunks(ID_BATCH) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE term_lexicon SET doc_freq = doc_freq + 1 WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in batch {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

impl IndexingStore {
    /// Recompute every lexicon entry's `doc_freq` from the occurrence table.
    /// Returns the number of entries whose value changed.
    pub async fn recompute_document_frequencies(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE term_lexicon
            SET doc_freq = (
                SELECT COUNT(DISTINCT o.thread_id)
                FROM term_occurrences o
                WHERE o.lexicon_id = term_lexicon.id
            )
            WHERE doc_freq != (
                SELECT COUNT(DISTINCT o.thread_id)
                FROM term_occurrences o
                WHERE o.lexicon_id = term_lexicon.id
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected();
        if changed > 0 {
            tracing::warn!(changed, "document frequencies were out of step and have been repaired");
        }
        Ok(changed)
    }
}
