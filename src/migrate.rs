//! Database schema migrations (idempotent).
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so `chatu init` can run
//! any number of times. FTS5 virtual tables are checked explicitly since
//! their `CREATE` has no `IF NOT EXISTS` guard on older SQLite builds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS providers (
        id TEXT PRIMARY KEY,
        provider_id TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS provider_accounts (
        id TEXT PRIMARY KEY,
        provider_ref_id TEXT NOT NULL REFERENCES providers(id),
        external_account_id TEXT,
        display_name TEXT,
        email TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_threads (
        id TEXT PRIMARY KEY,
        provider_ref_id TEXT NOT NULL REFERENCES providers(id),
        account_ref_id TEXT REFERENCES provider_accounts(id),
        external_thread_id TEXT,
        title TEXT NOT NULL,
        source_path TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        ingested_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_turns (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES chat_threads(id),
        turn_index INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER,
        pair_turn_id TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(thread_id, turn_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS term_lexicon (
        id INTEGER PRIMARY KEY,
        term TEXT NOT NULL,
        normalized_term TEXT NOT NULL UNIQUE,
        doc_freq INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS term_occurrences (
        id INTEGER PRIMARY KEY,
        lexicon_id INTEGER NOT NULL REFERENCES term_lexicon(id),
        provider_ref_id TEXT NOT NULL,
        thread_id TEXT NOT NULL REFERENCES chat_threads(id),
        turn_id TEXT NOT NULL REFERENCES chat_turns(id),
        position INTEGER NOT NULL,
        context_before TEXT NOT NULL,
        context_after TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thematic_edges (
        source_thread_id TEXT NOT NULL REFERENCES chat_threads(id),
        target_thread_id TEXT NOT NULL REFERENCES chat_threads(id),
        edge_type TEXT NOT NULL,
        weight INTEGER NOT NULL,
        evidence_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (source_thread_id, target_thread_id, edge_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_runs (
        id TEXT PRIMARY KEY,
        source_root TEXT NOT NULL,
        status TEXT NOT NULL,
        files_scanned INTEGER NOT NULL DEFAULT 0,
        files_ingested INTEGER NOT NULL DEFAULT 0,
        files_quarantined INTEGER NOT NULL DEFAULT 0,
        chats_ingested INTEGER NOT NULL DEFAULT 0,
        turns_ingested INTEGER NOT NULL DEFAULT 0,
        policy_report_path TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        error TEXT,
        started_at INTEGER NOT NULL,
        completed_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reindex_runs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        stats_json TEXT,
        error TEXT,
        started_at INTEGER NOT NULL,
        completed_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL UNIQUE REFERENCES chat_threads(id),
        provider TEXT NOT NULL,
        title TEXT NOT NULL,
        source_path TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        format TEXT NOT NULL,
        title TEXT,
        source_path TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS units (
        id TEXT PRIMARY KEY,
        thread_id TEXT,
        conversation_id TEXT,
        document_id TEXT,
        title TEXT,
        content TEXT NOT NULL,
        tags_json TEXT NOT NULL DEFAULT '[]',
        unit_ts INTEGER,
        updated_at INTEGER NOT NULL
    )
    "#,
    // Written by the embedding backfill only; never cascaded from units.
    r#"
    CREATE TABLE IF NOT EXISTS unit_vectors (
        unit_id TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        embedding BLOB NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    // One row per (provider, external id); at most one default account per provider.
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_accounts_external ON provider_accounts(provider_ref_id, external_account_id) WHERE external_account_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_accounts_default ON provider_accounts(provider_ref_id) WHERE external_account_id IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_threads_provider_path ON chat_threads(provider_ref_id, source_path)",
    "CREATE INDEX IF NOT EXISTS idx_threads_provider_external ON chat_threads(provider_ref_id, external_thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_threads_updated_at ON chat_threads(updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_occurrences_thread ON term_occurrences(thread_id, lexicon_id)",
    "CREATE INDEX IF NOT EXISTS idx_occurrences_lexicon ON term_occurrences(lexicon_id, thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON thematic_edges(target_thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_weight ON thematic_edges(weight DESC)",
    "CREATE INDEX IF NOT EXISTS idx_units_thread ON units(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_ingest_runs_started ON ingest_runs(started_at DESC)",
];

/// Connect to the configured database and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='units_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE units_fts USING fts5(
                unit_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
