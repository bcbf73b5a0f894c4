//! Background reindex jobs.
//!
//! A reindex is recorded in `reindex_runs` before its task is spawned, so
//! a caller gets a run id immediately and polls [`get_reindex_run`] for
//! the outcome.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use chat_universe_core::models::{ReindexStats, RunStatus};

use crate::config::Config;
use crate::store::IndexingStore;

/// Status of one reindex job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexRun {
    pub id: String,
    pub status: RunStatus,
    pub stats: Option<ReindexStats>,
    pub error: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

/// Record a running reindex and execute it on a tokio task.
pub async fn start_reindex(store: &IndexingStore) -> Result<String> {
    let id = record_reindex_run(store).await?;
    info!(run_id = %id, "reindex started");

    let task_store = store.clone();
    supervise_reindex(store.clone(), id.clone(), async move {
        task_store.reindex_universe().await
    });

    Ok(id)
}

async fn record_reindex_run(store: &IndexingStore) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO reindex_runs (id, status, started_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(RunStatus::Running.as_str())
        .bind(Utc::now().timestamp())
        .execute(store.pool())
        .await?;
    Ok(id)
}

/// Run `job` on its own task and record its outcome, including a panic or
/// cancellation, so the run never stays `running`.
fn supervise_reindex<F>(store: IndexingStore, run_id: String, job: F)
where
    F: Future<Output = Result<ReindexStats>> + Send + 'static,
{
    let handle = tokio::spawn(job);
    tokio::spawn(async move {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(anyhow!("reindex task panicked")),
            Err(e) => Err(anyhow!("reindex task cancelled: {}", e)),
        };
        if let Err(e) = finish_reindex(&store, &run_id, outcome).await {
            warn!(run_id = %run_id, error = %e, "failed to record reindex outcome");
        }
    });
}

async fn finish_reindex(
    store: &IndexingStore,
    run_id: &str,
    outcome: Result<ReindexStats>,
) -> Result<()> {
    let (status, stats_json, error) = match outcome {
        Ok(stats) => (
            RunStatus::Completed,
            Some(serde_json::to_string(&stats)?),
            None,
        ),
        Err(e) => {
            warn!(run_id = %run_id, error = %e, "reindex failed");
            (RunStatus::Failed, None, Some(format!("{:#}", e)))
        }
    };

    sqlx::query(
        r#"
        UPDATE reindex_runs
        SET status = ?, stats_json = ?, error = ?, completed_at = ?
        WHERE id = ? AND completed_at IS NULL
        "#,
    )
    .bind(status.as_str())
    .bind(stats_json)
    .bind(error)
    .bind(Utc::now().timestamp())
    .bind(run_id)
    .execute(store.pool())
    .await?;

    info!(run_id = %run_id, status = %status, "reindex finished");
    Ok(())
}

pub async fn get_reindex_run(store: &IndexingStore, run_id: &str) -> Result<Option<ReindexRun>> {
    let row = sqlx::query(
        "SELECT id, status, stats_json, error, started_at, completed_at FROM reindex_runs WHERE id = ?",
    )
    .bind(run_id)
    .fetch_optional(store.pool())
    .await?;

    Ok(row.map(|row| {
        let status: String = row.get("status");
        let stats_json: Option<String> = row.get("stats_json");
        ReindexRun {
            id: row.get("id"),
            status: status.parse().unwrap_or(RunStatus::Failed),
            stats: stats_json.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }))
}

/// Poll until the run leaves `running`.
pub async fn wait_for_reindex(
    store: &IndexingStore,
    run_id: &str,
    poll: Duration,
) -> Result<ReindexRun> {
    loop {
        match get_reindex_run(store, run_id).await? {
            Some(run) if run.status != RunStatus::Running => return Ok(run),
            Some(_) => tokio::time::sleep(poll).await,
            None => bail!("Reindex run not found: {}", run_id),
        }
    }
}

fn print_reindex_run(run: &ReindexRun) {
    println!("reindex {}", run.id);
    println!("  status: {}", run.status);
    if let Some(ref stats) = run.stats {
        println!("  threads: {}", stats.threads);
        println!("  turns: {}", stats.turns);
        println!("  terms: {}", stats.terms);
        println!("  occurrences: {}", stats.occurrences);
        println!("  edges: {}", stats.edges);
    }
    if let Some(ref error) = run.error {
        println!("  error: {}", error);
    }
}

/// `chatu reindex`: start a job and wait for it, or look one up with
/// `--status`.
pub async fn run_reindex(config: &Config, status: Option<&str>, repair_doc_freq: bool) -> Result<()> {
    let store = IndexingStore::open(config).await?;
    let result = reindex_command(&store, status, repair_doc_freq).await;
    store.close().await;
    result
}

async fn reindex_command(
    store: &IndexingStore,
    status: Option<&str>,
    repair_doc_freq: bool,
) -> Result<()> {
    if let Some(run_id) = status {
        match get_reindex_run(store, run_id).await? {
            Some(run) => print_reindex_run(&run),
            None => bail!("Reindex run not found: {}", run_id),
        }
        return Ok(());
    }

    if repair_doc_freq {
        let changed = store.recompute_document_frequencies().await?;
        println!("lexicon document frequencies repaired: {} changed", changed);
        return Ok(());
    }

    let run_id = start_reindex(store).await?;
    let run = wait_for_reindex(store, &run_id, Duration::from_millis(200)).await?;
    print_reindex_run(&run);
    if run.status == RunStatus::Failed {
        bail!("Reindex failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> IndexingStore {
        let path = tmp.path().join("jobs.sqlite");
        let config: Config = toml::from_str(&format!("[db]\npath = \"{}\"\n", path.display())).unwrap();
        IndexingStore::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn panicking_job_marks_run_failed() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let run_id = record_reindex_run(&store).await.unwrap();
        supervise_reindex(store.clone(), run_id.clone(), async {
            let stats: Option<ReindexStats> = None;
            Ok(stats.expect("reindex job blew up"))
        });

        let run = wait_for_reindex(&store, &run_id, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.stats.is_none());
        assert!(run.error.unwrap().contains("panicked"));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn successful_job_records_stats() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let run_id = start_reindex(&store).await.unwrap();
        let run = wait_for_reindex(&store, &run_id, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.stats, Some(ReindexStats::default()));
        assert!(run.error.is_none());
    }
}
