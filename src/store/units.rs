//! Search unit projection and the legacy conversation bridge.
//!
//! Every non-empty chat turn is projected into one search unit (unit id =
//! turn id) carrying the thread title, the turn's `tags` metadata and the
//! turn timestamp (falling back to the thread's `updated_at`). Units and
//! their `units_fts` rows are rebuilt together with the thread's turns.
//!
//! `unit_vectors` is not touched here. The embedding backfill owns it and
//! search reconciles stale vectors at query time.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use chat_universe_core::models::{ChatThread, ChatTurn};
use chat_universe_core::retrieval::{UnitDocument, UnitRecord};

use super::IndexingStore;

/// Insert the thread's conversation record if absent, else refresh its
/// display fields.
pub(crate) async fn sync_conversation(
    conn: &mut SqliteConnection,
    thread: &ChatThread,
    message_count: i64,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO conversations
            (id, thread_id, provider, title, source_path, message_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(thread_id) DO UPDATE SET
            provider = excluded.provider,
            title = excluded.title,
            source_path = excluded.source_path,
            message_count = excluded.message_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&thread.id)
    .bind(thread.provider_id.as_str())
    .bind(&thread.title)
    .bind(&thread.source_path)
    .bind(message_count)
    .bind(now)
    .bind(thread.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn remove_thread_units(conn: &mut SqliteConnection, thread_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM units_fts WHERE unit_id IN (SELECT id FROM units WHERE thread_id = ?)")
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM units WHERE thread_id = ?")
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Project `turns` into search units. Returns the number written.
pub(crate) async fn rebuild_thread_units(
    conn: &mut SqliteConnection,
    thread: &ChatThread,
    turns: &[ChatTurn],
) -> Result<i64> {
    let conversation_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM conversations WHERE thread_id = ?")
            .bind(&thread.id)
            .fetch_optional(&mut *conn)
            .await?;

    let mut written = 0;
    for turn in turns.iter().filter(|t| !t.content.trim().is_empty()) {
        let tags: Vec<&str> = turn
            .metadata
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let unit = UnitRecord {
            id: turn.id.clone(),
            thread_id: Some(thread.id.clone()),
            conversation_id: conversation_id.clone(),
            document_id: None,
            title: Some(thread.title.clone()),
            content: turn.content.clone(),
            tags: tags.into_iter().map(str::to_string).collect(),
            timestamp: Some(turn.timestamp.unwrap_or(thread.updated_at)),
        };
        write_unit(conn, &unit).await?;
        written += 1;
    }
    Ok(written)
}

async fn write_unit(conn: &mut SqliteConnection, unit: &UnitRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO units
            (id, thread_id, conversation_id, document_id, title, content, tags_json, unit_ts, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            thread_id = excluded.thread_id,
            conversation_id = excluded.conversation_id,
            document_id = excluded.document_id,
            title = excluded.title,
            content = excluded.content,
            tags_json = excluded.tags_json,
            unit_ts = excluded.unit_ts,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&unit.id)
    .bind(&unit.thread_id)
    .bind(&unit.conversation_id)
    .bind(&unit.document_id)
    .bind(&unit.title)
    .bind(&unit.content)
    .bind(serde_json::to_string(&unit.tags)?)
    .bind(unit.timestamp)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM units_fts WHERE unit_id = ?")
        .bind(&unit.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO units_fts (unit_id, content) VALUES (?, ?)")
        .bind(&unit.id)
        .bind(&unit.content)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl IndexingStore {
    /// Insert or replace a unit document (backs source/format filters).
    pub async fn upsert_document(&self, document: &UnitDocument) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (id, source_id, format, title, source_path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                format = excluded.format,
                title = excluded.title,
                source_path = excluded.source_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.source_id)
        .bind(&document.format)
        .bind(&document.title)
        .bind(&document.source_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a search unit along with its full-text row.
    pub async fn upsert_unit(&self, unit: &UnitRecord) -> Result<()> {
        let mut tx = self.begin_write().await?;
        write_unit(&mut tx, unit).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a unit and its full-text row. Any stored vector is kept.
    pub async fn remove_unit(&self, unit_id: &str) -> Result<bool> {
        let mut tx = self.begin_write().await?;
        sqlx::query("DELETE FROM units_fts WHERE unit_id = ?")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM units WHERE id = ?")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }
}
