//! SQLite-backed indexing store.
//!
//! [`IndexingStore`] owns the relational schema created by
//! [`crate::migrate`] and is the only writer of providers, accounts,
//! threads, turns, the term lexicon, term occurrences, thematic edges,
//! search units and ingest runs.
//!
//! # Consistency
//!
//! Replacing a thread's turns is one transaction: the old term set is
//! released, occurrences/units/turns are deleted, the new turns inserted,
//! re-tokenized and indexed, units rebuilt and the thread's outgoing
//! co-occurrence edges recomputed. Readers on other connections see either
//! the previous generation or the new one, never a mix (WAL isolation).
//!
//! Submodules hold the pieces that run inside those transactions; their
//! helpers take `&mut SqliteConnection` so a caller can compose them under
//! a single `BEGIN IMMEDIATE`.

mod graph;
mod indexer;
mod reads;
mod reindex;
mod runs;
mod units;

pub use reads::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use chat_universe_core::models::{
    json_object_or_empty, ChatThread, ChatTurn, NormalizedConversation, Provider,
    ProviderAccount, ProviderId, TurnInput, TurnRole,
};

use crate::config::Config;
use crate::{db, migrate};

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct IndexingStore {
    pool: SqlitePool,
}

/// Account fields for [`IndexingStore::upsert_provider_account`].
#[derive(Debug, Clone, Default)]
pub struct AccountInput {
    /// `None` selects the provider's single default account.
    pub external_account_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub metadata: Option<Value>,
}

/// Thread fields for [`IndexingStore::upsert_chat_thread`].
#[derive(Debug, Clone)]
pub struct ThreadInput {
    pub provider_ref_id: String,
    pub account_ref_id: Option<String>,
    pub external_thread_id: Option<String>,
    pub title: String,
    pub source_path: String,
    pub metadata: Value,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Result of [`IndexingStore::ingest_normalized_thread`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedThread {
    pub thread: ChatThread,
    pub turns: Vec<ChatTurn>,
}

/// What a single turn replacement wrote.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReplaceOutcome {
    pub turns: Vec<ChatTurn>,
    pub occurrences: i64,
    pub edges: i64,
    pub units: i64,
}

impl IndexingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Start a transaction that takes the write lock up front.
    ///
    /// A deferred `BEGIN` whose first statement is a read fails with
    /// `SQLITE_BUSY` when it later upgrades while another writer holds the
    /// lock; `BEGIN IMMEDIATE` waits on the busy timeout instead.
    pub(crate) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub async fn upsert_provider(
        &self,
        provider_id: ProviderId,
        display_name: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<Provider> {
        let mut conn = self.pool.acquire().await?;
        upsert_provider_in(&mut conn, provider_id, display_name, metadata).await
    }

    pub async fn upsert_provider_account(
        &self,
        provider_ref_id: &str,
        input: &AccountInput,
    ) -> Result<ProviderAccount> {
        let mut conn = self.pool.acquire().await?;
        upsert_account_in(&mut conn, provider_ref_id, input).await
    }

    /// Insert or update a thread.
    ///
    /// An existing thread of the same provider matches by source path or by
    /// external thread id; a source-path match wins when both exist.
    pub async fn upsert_chat_thread(&self, input: &ThreadInput) -> Result<ChatThread> {
        let mut tx = self.begin_write().await?;
        let thread = upsert_thread_in(&mut tx, input).await?;
        tx.commit().await?;
        Ok(thread)
    }

    /// Replace every turn of a thread and rebuild everything derived from
    /// them. Returns the stored turns ordered by `turn_index`.
    pub async fn replace_thread_turns(
        &self,
        thread_id: &str,
        provider_ref_id: &str,
        turns: Vec<TurnInput>,
    ) -> Result<Vec<ChatTurn>> {
        let mut tx = self.begin_write().await?;
        let outcome = replace_turns_in(&mut tx, thread_id, provider_ref_id, turns).await?;
        tx.commit().await?;
        Ok(outcome.turns)
    }

    /// Store one normalized conversation: provider, optional account,
    /// thread, legacy conversation record, then its turns. All of it
    /// commits together.
    pub async fn ingest_normalized_thread(
        &self,
        input: &NormalizedConversation,
    ) -> Result<IngestedThread> {
        let mut tx = self.begin_write().await?;

        let provider =
            upsert_provider_in(&mut tx, input.provider, Some(input.provider.display_name()), None)
                .await?;

        let account = if input.has_account_details() {
            let account_input = AccountInput {
                external_account_id: input.external_account_id.clone(),
                display_name: input.account_display_name.clone(),
                email: input.account_email.clone(),
                metadata: None,
            };
            Some(upsert_account_in(&mut tx, &provider.id, &account_input).await?)
        } else {
            None
        };

        let turns: Vec<TurnInput> = input.turns.iter().map(TurnInput::from).collect();
        let latest_turn = turns.iter().filter_map(|t| t.timestamp).max();
        let created_at = input.created_at.map(|t| t.timestamp());
        let updated_at = input
            .updated_at
            .map(|t| t.timestamp())
            .or(latest_turn)
            .or(created_at);

        let thread_input = ThreadInput {
            provider_ref_id: provider.id.clone(),
            account_ref_id: account.map(|a| a.id),
            external_thread_id: input.external_thread_id.clone(),
            title: input.title.clone(),
            source_path: input.source_path.clone(),
            metadata: input.metadata.clone(),
            created_at,
            updated_at,
        };
        let thread = upsert_thread_in(&mut tx, &thread_input).await?;

        units::sync_conversation(&mut tx, &thread, turns.len() as i64).await?;

        let outcome = replace_turns_in(&mut tx, &thread.id, &provider.id, turns).await?;
        tx.commit().await?;

        info!(
            thread_id = %thread.id,
            provider = %provider.provider_id,
            turns = outcome.turns.len(),
            occurrences = outcome.occurrences,
            edges = outcome.edges,
            units = outcome.units,
            "ingested thread"
        );

        Ok(IngestedThread {
            thread,
            turns: outcome.turns,
        })
    }
}

// ============ Upserts ============

pub(crate) async fn upsert_provider_in(
    conn: &mut SqliteConnection,
    provider_id: ProviderId,
    display_name: Option<&str>,
    metadata: Option<&Value>,
) -> Result<Provider> {
    let now = Utc::now().timestamp();
    let display_name = display_name.unwrap_or_else(|| provider_id.display_name());
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;

    let row = sqlx::query(
        r#"
        INSERT INTO providers (id, provider_id, display_name, metadata_json, created_at, updated_at)
        VALUES (?, ?, ?, COALESCE(?, '{}'), ?, ?)
        ON CONFLICT(provider_id) DO UPDATE SET
            display_name = excluded.display_name,
            metadata_json = COALESCE(?, providers.metadata_json),
            updated_at = excluded.updated_at
        RETURNING id, provider_id, display_name, metadata_json, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(provider_id.as_str())
    .bind(display_name)
    .bind(&metadata_json)
    .bind(now)
    .bind(now)
    .bind(&metadata_json)
    .fetch_one(&mut *conn)
    .await?;

    Ok(provider_from_row(&row))
}

pub(crate) async fn upsert_account_in(
    conn: &mut SqliteConnection,
    provider_ref_id: &str,
    input: &AccountInput,
) -> Result<ProviderAccount> {
    let now = Utc::now().timestamp();
    let metadata_json = input
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    // Each branch names the partial unique index it conflicts on.
    let conflict_target = if input.external_account_id.is_some() {
        "(provider_ref_id, external_account_id) WHERE external_account_id IS NOT NULL"
    } else {
        "(provider_ref_id) WHERE external_account_id IS NULL"
    };

    let sql = format!(
        r#"
        INSERT INTO provider_accounts
            (id, provider_ref_id, external_account_id, display_name, email, metadata_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, COALESCE(?, '{{}}'), ?, ?)
        ON CONFLICT{} DO UPDATE SET
            display_name = COALESCE(excluded.display_name, provider_accounts.display_name),
            email = COALESCE(excluded.email, provider_accounts.email),
            metadata_json = COALESCE(?, provider_accounts.metadata_json),
            updated_at = excluded.updated_at
        RETURNING id, provider_ref_id, external_account_id, display_name, email,
                  metadata_json, created_at, updated_at
        "#,
        conflict_target
    );

    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(provider_ref_id)
        .bind(&input.external_account_id)
        .bind(&input.display_name)
        .bind(&input.email)
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .bind(&metadata_json)
        .fetch_one(&mut *conn)
        .await?;

    Ok(account_from_row(&row))
}

pub(crate) async fn upsert_thread_in(
    conn: &mut SqliteConnection,
    input: &ThreadInput,
) -> Result<ChatThread> {
    let now = Utc::now().timestamp();
    let metadata_json = serde_json::to_string(&input.metadata)?;

    let existing: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM chat_threads
        WHERE provider_ref_id = ?
          AND (source_path = ? OR (? IS NOT NULL AND external_thread_id = ?))
        ORDER BY CASE WHEN source_path = ? THEN 0 ELSE 1 END, updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(&input.provider_ref_id)
    .bind(&input.source_path)
    .bind(&input.external_thread_id)
    .bind(&input.external_thread_id)
    .bind(&input.source_path)
    .fetch_optional(&mut *conn)
    .await?;

    let thread_id = match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE chat_threads SET
                    account_ref_id = COALESCE(?, account_ref_id),
                    external_thread_id = COALESCE(?, external_thread_id),
                    title = ?,
                    source_path = ?,
                    metadata_json = ?,
                    created_at = COALESCE(?, created_at),
                    updated_at = COALESCE(?, updated_at),
                    ingested_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&input.account_ref_id)
            .bind(&input.external_thread_id)
            .bind(&input.title)
            .bind(&input.source_path)
            .bind(&metadata_json)
            .bind(input.created_at)
            .bind(input.updated_at)
            .bind(now)
            .bind(&id)
            .execute(&mut *conn)
            .await?;
            debug!(thread_id = %id, "updated existing thread");
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let created_at = input.created_at.or(input.updated_at).unwrap_or(now);
            let updated_at = input.updated_at.unwrap_or(created_at);
            sqlx::query(
                r#"
                INSERT INTO chat_threads
                    (id, provider_ref_id, account_ref_id, external_thread_id, title, source_path,
                     metadata_json, created_at, updated_at, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&input.provider_ref_id)
            .bind(&input.account_ref_id)
            .bind(&input.external_thread_id)
            .bind(&input.title)
            .bind(&input.source_path)
            .bind(&metadata_json)
            .bind(created_at)
            .bind(updated_at)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            id
        }
    };

    fetch_thread(conn, &thread_id)
        .await?
        .with_context(|| format!("thread {} vanished after upsert", thread_id))
}

// ============ Turn replacement ============

pub(crate) async fn replace_turns_in(
    conn: &mut SqliteConnection,
    thread_id: &str,
    provider_ref_id: &str,
    turns: Vec<TurnInput>,
) -> Result<ReplaceOutcome> {
    let thread = match fetch_thread(conn, thread_id).await? {
        Some(t) => t,
        None => bail!("Thread not found: {}", thread_id),
    };

    indexer::release_thread_terms(conn, thread_id).await?;

    sqlx::query("DELETE FROM term_occurrences WHERE thread_id = ?")
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;
    units::remove_thread_units(conn, thread_id).await?;
    sqlx::query("DELETE FROM chat_turns WHERE thread_id = ?")
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;

    let stored = prepare_turns(thread_id, turns);
    for turn in &stored {
        sqlx::query(
            r#"
            INSERT INTO chat_turns
                (id, thread_id, turn_index, role, content, created_at, pair_turn_id, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&turn.id)
        .bind(&turn.thread_id)
        .bind(turn.turn_index)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.timestamp)
        .bind(&turn.pair_turn_id)
        .bind(serde_json::to_string(&turn.metadata)?)
        .execute(&mut *conn)
        .await
        .with_context(|| {
            format!(
                "Failed to insert turn {} of thread {}",
                turn.turn_index, thread_id
            )
        })?;
    }

    let indexed = indexer::index_thread_terms(conn, thread_id, provider_ref_id, &stored).await?;
    indexer::acquire_terms(conn, &indexed.lexicon_ids).await?;

    let unit_count = units::rebuild_thread_units(conn, &thread, &stored).await?;
    let edges = graph::rebuild_thread_edges(conn, thread_id).await?;

    debug!(
        thread_id,
        turns = stored.len(),
        occurrences = indexed.occurrences,
        terms = indexed.lexicon_ids.len(),
        edges,
        units = unit_count,
        "replaced thread turns"
    );

    Ok(ReplaceOutcome {
        turns: stored,
        occurrences: indexed.occurrences,
        edges,
        units: unit_count,
    })
}

/// Order turns, assign missing ids and infer missing prompt/response links.
///
/// A user turn pairs with the next assistant turn before the following user
/// turn; that assistant turn pairs back. Explicit links are kept.
fn prepare_turns(thread_id: &str, mut turns: Vec<TurnInput>) -> Vec<ChatTurn> {
    turns.sort_by_key(|t| t.turn_index);

    let mut stored: Vec<ChatTurn> = turns
        .into_iter()
        .map(|t| ChatTurn {
            id: t.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            thread_id: thread_id.to_string(),
            turn_index: t.turn_index,
            role: t.role,
            content: t.content,
            timestamp: t.timestamp,
            pair_turn_id: t.pair_turn_id,
            metadata: t.metadata,
        })
        .collect();

    let mut pending_user: Option<usize> = None;
    for i in 0..stored.len() {
        match stored[i].role {
            TurnRole::User => pending_user = Some(i),
            TurnRole::Assistant => {
                if let Some(u) = pending_user.take() {
                    if stored[u].pair_turn_id.is_none() {
                        stored[u].pair_turn_id = Some(stored[i].id.clone());
                    }
                    if stored[i].pair_turn_id.is_none() {
                        stored[i].pair_turn_id = Some(stored[u].id.clone());
                    }
                }
            }
            TurnRole::System | TurnRole::Tool => {}
        }
    }

    stored
}

// ============ Row mapping ============

pub(crate) const THREAD_COLUMNS: &str = r#"
    t.id, t.provider_ref_id, p.provider_id AS provider_key, t.account_ref_id,
    t.external_thread_id, t.title, t.source_path, t.metadata_json,
    t.created_at, t.updated_at, t.ingested_at
"#;

pub(crate) async fn fetch_thread(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<Option<ChatThread>> {
    let sql = format!(
        "SELECT {} FROM chat_threads t JOIN providers p ON p.id = t.provider_ref_id WHERE t.id = ?",
        THREAD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(thread_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(thread_from_row))
}

pub(crate) async fn fetch_thread_turns(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<Vec<ChatTurn>> {
    let rows = sqlx::query(
        r#"
        SELECT id, thread_id, turn_index, role, content, created_at, pair_turn_id, metadata_json
        FROM chat_turns
        WHERE thread_id = ?
        ORDER BY turn_index ASC
        "#,
    )
    .bind(thread_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(turn_from_row).collect())
}

pub(crate) fn provider_from_row(row: &SqliteRow) -> Provider {
    let provider_id: String = row.get("provider_id");
    let metadata_json: Option<String> = row.get("metadata_json");
    Provider {
        id: row.get("id"),
        provider_id: ProviderId::parse_lenient(&provider_id),
        display_name: row.get("display_name"),
        metadata: json_object_or_empty(metadata_json.as_deref()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub(crate) fn account_from_row(row: &SqliteRow) -> ProviderAccount {
    let metadata_json: Option<String> = row.get("metadata_json");
    ProviderAccount {
        id: row.get("id"),
        provider_ref_id: row.get("provider_ref_id"),
        external_account_id: row.get("external_account_id"),
        display_name: row.get("display_name"),
        email: row.get("email"),
        metadata: json_object_or_empty(metadata_json.as_deref()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Expects the columns of [`THREAD_COLUMNS`].
pub(crate) fn thread_from_row(row: &SqliteRow) -> ChatThread {
    let provider_key: String = row.get("provider_key");
    let metadata_json: Option<String> = row.get("metadata_json");
    ChatThread {
        id: row.get("id"),
        provider_ref_id: row.get("provider_ref_id"),
        provider_id: ProviderId::parse_lenient(&provider_key),
        account_ref_id: row.get("account_ref_id"),
        external_thread_id: row.get("external_thread_id"),
        title: row.get("title"),
        source_path: row.get("source_path"),
        metadata: json_object_or_empty(metadata_json.as_deref()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        ingested_at: row.get("ingested_at"),
    }
}

pub(crate) fn turn_from_row(row: &SqliteRow) -> ChatTurn {
    let role: String = row.get("role");
    let metadata_json: Option<String> = row.get("metadata_json");
    ChatTurn {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        turn_index: row.get("turn_index"),
        role: TurnRole::parse_lenient(&role),
        content: row.get("content"),
        timestamp: row.get("created_at"),
        pair_turn_id: row.get("pair_turn_id"),
        metadata: json_object_or_empty(metadata_json.as_deref()),
    }
}
