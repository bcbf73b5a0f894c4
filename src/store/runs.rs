//! Ingest run bookkeeping.
//!
//! A run records one import batch. It is independent of the per-thread
//! transactions: a run can finish `failed` while threads it touched stay
//! indexed.

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use chat_universe_core::models::{
    json_object_or_empty, IngestCompletion, IngestCounts, IngestRun, Page, RunStatus,
};

use super::reads::page_bounds;
use super::IndexingStore;

const RUN_COLUMNS: &str = r#"
    id, source_root, status, files_scanned, files_ingested, files_quarantined,
    chats_ingested, turns_ingested, policy_report_path, metadata_json, error,
    started_at, completed_at
"#;

impl IndexingStore {
    pub async fn create_ingest_run(&self, source_root: &str, metadata: &Value) -> Result<IngestRun> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO ingest_runs (id, source_root, status, metadata_json, started_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(source_root)
        .bind(RunStatus::Running.as_str())
        .bind(serde_json::to_string(metadata)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(run_id = %id, source_root, "created ingest run");

        Ok(IngestRun {
            id,
            source_root: source_root.to_string(),
            status: RunStatus::Running,
            counts: IngestCounts::default(),
            policy_report_path: None,
            metadata: metadata.clone(),
            error: None,
            started_at: now,
            completed_at: None,
        })
    }

    /// Record the final state of a run. A run can only be completed once.
    pub async fn complete_ingest_run(
        &self,
        run_id: &str,
        completion: &IngestCompletion,
    ) -> Result<IngestRun> {
        if completion.status == RunStatus::Running {
            bail!("An ingest run cannot be completed with status 'running'");
        }

        let now = Utc::now().timestamp();
        let counts = &completion.counts;
        let result = sqlx::query(
            r#"
            UPDATE ingest_runs SET
                status = ?,
                files_scanned = ?,
                files_ingested = ?,
                files_quarantined = ?,
                chats_ingested = ?,
                turns_ingested = ?,
                policy_report_path = ?,
                error = ?,
                completed_at = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(completion.status.as_str())
        .bind(counts.files_scanned)
        .bind(counts.files_ingested)
        .bind(counts.files_quarantined)
        .bind(counts.chats_ingested)
        .bind(counts.turns_ingested)
        .bind(&completion.policy_report_path)
        .bind(&completion.error)
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.get_ingest_run(run_id).await? {
                Some(_) => bail!("Ingest run {} is already completed", run_id),
                None => bail!("Ingest run not found: {}", run_id),
            }
        }

        match self.get_ingest_run(run_id).await? {
            Some(run) => Ok(run),
            None => bail!("Ingest run not found: {}", run_id),
        }
    }

    pub async fn get_ingest_run(&self, run_id: &str) -> Result<Option<IngestRun>> {
        let sql = format!("SELECT {} FROM ingest_runs WHERE id = ?", RUN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(run_from_row))
    }

    /// Runs, newest first.
    pub async fn list_ingest_runs(&self, limit: i64, offset: i64) -> Result<Page<IngestRun>> {
        let (limit, offset) = page_bounds(limit, offset);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_runs")
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {} FROM ingest_runs ORDER BY started_at DESC, id ASC LIMIT ? OFFSET ?",
            RUN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(run_from_row).collect(),
            total,
            limit,
            offset,
        })
    }
}

fn run_from_row(row: &SqliteRow) -> IngestRun {
    let status: String = row.get("status");
    let metadata_json: Option<String> = row.get("metadata_json");
    IngestRun {
        id: row.get("id"),
        source_root: row.get("source_root"),
        // An unreadable status is reported as failed rather than hiding the run.
        status: status.parse().unwrap_or(RunStatus::Failed),
        counts: IngestCounts {
            files_scanned: row.get("files_scanned"),
            files_ingested: row.get("files_ingested"),
            files_quarantined: row.get("files_quarantined"),
            chats_ingested: row.get("chats_ingested"),
            turns_ingested: row.get("turns_ingested"),
        },
        policy_report_path: row.get("policy_report_path"),
        metadata: json_object_or_empty(metadata_json.as_deref()),
        error: row.get("error"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}
