//! Read-only queries over the indexed universe.
//!
//! Every listing takes `limit`/`offset` and returns a [`Page`]. Nothing here
//! writes; each call sees committed state only.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use chat_universe_core::models::{
    json_object_or_empty, ChatThreadSummary, ChatTurn, LexiconEntry, NetworkEdge, Page,
    ProviderId, ProviderSummary, TermOccurrenceHit, TurnRole, UniverseSummary,
};

use super::{provider_from_row, thread_from_row, turn_from_row, IndexingStore, THREAD_COLUMNS};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Clamp caller-supplied pagination to `1..=MAX_PAGE_LIMIT` and `offset >= 0`.
/// A non-positive limit falls back to [`DEFAULT_PAGE_LIMIT`].
pub(crate) fn page_bounds(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    };
    (limit, offset.max(0))
}

const EDGE_SELECT: &str = r#"
    SELECT e.source_thread_id, st.title AS source_title, sp.provider_id AS source_provider,
           e.target_thread_id, tt.title AS target_title, tp.provider_id AS target_provider,
           e.edge_type, e.weight, e.evidence_json, e.updated_at
    FROM thematic_edges e
    JOIN chat_threads st ON st.id = e.source_thread_id
    JOIN providers sp ON sp.id = st.provider_ref_id
    JOIN chat_threads tt ON tt.id = e.target_thread_id
    JOIN providers tp ON tp.id = tt.provider_ref_id
"#;

const SUMMARY_SELECT: &str = r#"
    a.display_name AS account_display_name,
    (SELECT COUNT(*) FROM chat_turns ct WHERE ct.thread_id = t.id) AS turn_count
    FROM chat_threads t
    JOIN providers p ON p.id = t.provider_ref_id
    LEFT JOIN provider_accounts a ON a.id = t.account_ref_id
"#;

impl IndexingStore {
    pub async fn get_universe_summary(&self) -> Result<UniverseSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM providers) AS providers,
                (SELECT COUNT(*) FROM provider_accounts) AS accounts,
                (SELECT COUNT(*) FROM chat_threads) AS threads,
                (SELECT COUNT(*) FROM chat_turns) AS turns,
                (SELECT COUNT(*) FROM term_lexicon) AS terms,
                (SELECT COUNT(*) FROM term_occurrences) AS occurrences,
                (SELECT COUNT(*) FROM thematic_edges) AS edges,
                (SELECT COUNT(*) FROM units) AS units,
                (SELECT COUNT(*) FROM ingest_runs) AS ingest_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(UniverseSummary {
            providers: row.get("providers"),
            accounts: row.get("accounts"),
            threads: row.get("threads"),
            turns: row.get("turns"),
            terms: row.get("terms"),
            occurrences: row.get("occurrences"),
            edges: row.get("edges"),
            units: row.get("units"),
            ingest_runs: row.get("ingest_runs"),
        })
    }

    pub async fn list_providers(&self, limit: i64, offset: i64) -> Result<Page<ProviderSummary>> {
        let (limit, offset) = page_bounds(limit, offset);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM providers")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT p.id, p.provider_id, p.display_name, p.metadata_json, p.created_at, p.updated_at,
                   (SELECT COUNT(*) FROM provider_accounts a WHERE a.provider_ref_id = p.id) AS account_count,
                   (SELECT COUNT(*) FROM chat_threads t WHERE t.provider_ref_id = p.id) AS thread_count,
                   (SELECT COUNT(*) FROM chat_turns ct
                      JOIN chat_threads t ON t.id = ct.thread_id
                     WHERE t.provider_ref_id = p.id) AS turn_count
            FROM providers p
            ORDER BY p.provider_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| ProviderSummary {
                provider: provider_from_row(row),
                account_count: row.get("account_count"),
                thread_count: row.get("thread_count"),
                turn_count: row.get("turn_count"),
            })
            .collect();

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Threads of one provider, most recently updated first.
    pub async fn list_provider_chats(
        &self,
        provider: ProviderId,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ChatThreadSummary>> {
        let (limit, offset) = page_bounds(limit, offset);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chat_threads t
            JOIN providers p ON p.id = t.provider_ref_id
            WHERE p.provider_id = ?
            "#,
        )
        .bind(provider.as_str())
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {}, {} WHERE p.provider_id = ? ORDER BY t.updated_at DESC, t.id ASC LIMIT ? OFFSET ?",
            THREAD_COLUMNS, SUMMARY_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(provider.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(summary_from_row).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn get_chat(&self, thread_id: &str) -> Result<Option<ChatThreadSummary>> {
        let sql = format!("SELECT {}, {} WHERE t.id = ?", THREAD_COLUMNS, SUMMARY_SELECT);
        let row = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(summary_from_row))
    }

    pub async fn list_chat_turns(
        &self,
        thread_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ChatTurn>> {
        let (limit, offset) = page_bounds(limit, offset);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_turns WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, thread_id, turn_index, role, content, created_at, pair_turn_id, metadata_json
            FROM chat_turns
            WHERE thread_id = ?
            ORDER BY turn_index ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(thread_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.iter().map(turn_from_row).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Edges touching a thread in either direction, heaviest first.
    ///
    /// Incoming edges are included because a thread's own outgoing edges
    /// only reflect threads that existed when it was last indexed.
    pub async fn get_chat_network(
        &self,
        thread_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<NetworkEdge>> {
        let (limit, offset) = page_bounds(limit, offset);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM thematic_edges WHERE source_thread_id = ? OR target_thread_id = ?",
        )
        .bind(thread_id)
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "{} WHERE e.source_thread_id = ? OR e.target_thread_id = ? \
             ORDER BY e.weight DESC, e.source_thread_id ASC, e.target_thread_id ASC \
             LIMIT ? OFFSET ?",
            EDGE_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .bind(thread_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(edge_from_row).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Occurrences of one term across the corpus, optionally restricted to
    /// a provider. The term is matched on its normalized form.
    pub async fn find_term_occurrences(
        &self,
        term: &str,
        provider: Option<ProviderId>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<TermOccurrenceHit>> {
        let (limit, offset) = page_bounds(limit, offset);
        let normalized = term.trim().to_lowercase();
        let provider_key = provider.map(|p| p.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM term_occurrences o
            JOIN term_lexicon l ON l.id = o.lexicon_id
            JOIN providers p ON p.id = o.provider_ref_id
            WHERE l.normalized_term = ? AND (? IS NULL OR p.provider_id = ?)
            "#,
        )
        .bind(&normalized)
        .bind(provider_key)
        .bind(provider_key)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT o.id, o.lexicon_id, l.term, l.normalized_term, p.provider_id,
                   o.thread_id, t.title AS thread_title, o.turn_id, ct.turn_index, ct.role,
                   o.position, o.context_before, o.context_after
            FROM term_occurrences o
            JOIN term_lexicon l ON l.id = o.lexicon_id
            JOIN providers p ON p.id = o.provider_ref_id
            JOIN chat_threads t ON t.id = o.thread_id
            JOIN chat_turns ct ON ct.id = o.turn_id
            WHERE l.normalized_term = ? AND (? IS NULL OR p.provider_id = ?)
            ORDER BY t.updated_at DESC, o.thread_id ASC, o.position ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&normalized)
        .bind(provider_key)
        .bind(provider_key)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| {
                let provider_id: String = row.get("provider_id");
                let role: String = row.get("role");
                TermOccurrenceHit {
                    id: row.get("id"),
                    lexicon_id: row.get("lexicon_id"),
                    term: row.get("term"),
                    normalized_term: row.get("normalized_term"),
                    provider_id: ProviderId::parse_lenient(&provider_id),
                    thread_id: row.get("thread_id"),
                    thread_title: row.get("thread_title"),
                    turn_id: row.get("turn_id"),
                    turn_index: row.get("turn_index"),
                    role: TurnRole::parse_lenient(&role),
                    position: row.get("position"),
                    context_before: row.get("context_before"),
                    context_after: row.get("context_after"),
                }
            })
            .collect();

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Every co-occurrence edge in the corpus, heaviest first. With
    /// `cross_provider_only`, edges between threads of the same provider
    /// are skipped.
    pub async fn list_parallel_networks(
        &self,
        cross_provider_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Page<NetworkEdge>> {
        let (limit, offset) = page_bounds(limit, offset);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM thematic_edges e
            JOIN chat_threads st ON st.id = e.source_thread_id
            JOIN chat_threads tt ON tt.id = e.target_thread_id
            WHERE (? = 0 OR st.provider_ref_id != tt.provider_ref_id)
            "#,
        )
        .bind(cross_provider_only)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "{} WHERE (? = 0 OR st.provider_ref_id != tt.provider_ref_id) \
             ORDER BY e.weight DESC, e.source_thread_id ASC, e.target_thread_id ASC \
             LIMIT ? OFFSET ?",
            EDGE_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(cross_provider_only)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(edge_from_row).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn get_lexicon_entry(&self, term: &str) -> Result<Option<LexiconEntry>> {
        let row = sqlx::query(
            "SELECT id, term, normalized_term, doc_freq FROM term_lexicon WHERE normalized_term = ?",
        )
        .bind(term.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| LexiconEntry {
            id: row.get("id"),
            term: row.get("term"),
            normalized_term: row.get("normalized_term"),
            doc_freq: row.get("doc_freq"),
        }))
    }
}

fn summary_from_row(row: &SqliteRow) -> ChatThreadSummary {
    ChatThreadSummary {
        thread: thread_from_row(row),
        account_display_name: row.get("account_display_name"),
        turn_count: row.get("turn_count"),
    }
}

fn edge_from_row(row: &SqliteRow) -> NetworkEdge {
    let source_provider: String = row.get("source_provider");
    let target_provider: String = row.get("target_provider");
    let evidence_json: Option<String> = row.get("evidence_json");
    NetworkEdge {
        source_thread_id: row.get("source_thread_id"),
        source_title: row.get("source_title"),
        source_provider: ProviderId::parse_lenient(&source_provider),
        target_thread_id: row.get("target_thread_id"),
        target_title: row.get("target_title"),
        target_provider: ProviderId::parse_lenient(&target_provider),
        edge_type: row.get("edge_type"),
        weight: row.get("weight"),
        evidence: json_object_or_empty(evidence_json.as_deref()),
        updated_at: row.get("updated_at"),
    }
}
