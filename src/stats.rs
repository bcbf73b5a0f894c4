//! Corpus statistics and health overview.
//!
//! Summarizes what's indexed: provider, account, thread and turn counts,
//! lexicon and graph sizes, embedding coverage of search units, and a
//! per-provider breakdown. Used by `chatu stats`.

use anyhow::Result;

use crate::config::Config;
use crate::store::{IndexingStore, MAX_PAGE_LIMIT};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let store = IndexingStore::open(config).await?;
    let result = print_stats(config, &store, json).await;
    store.close().await;
    result
}

async fn print_stats(config: &Config, store: &IndexingStore, json: bool) -> Result<()> {
    let summary = store.get_universe_summary().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let embedded: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM unit_vectors v JOIN units u ON u.id = v.unit_id",
    )
    .fetch_one(store.pool())
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Chat Universe: Database Stats");
    println!("=============================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Providers:    {}", summary.providers);
    println!("  Accounts:     {}", summary.accounts);
    println!("  Threads:      {}", summary.threads);
    println!("  Turns:        {}", summary.turns);
    println!("  Terms:        {}", summary.terms);
    println!("  Occurrences:  {}", summary.occurrences);
    println!("  Edges:        {}", summary.edges);
    println!(
        "  Embedded:     {} / {} units ({}%)",
        embedded,
        summary.units,
        if summary.units > 0 {
            (embedded * 100) / summary.units
        } else {
            0
        }
    );

    let providers = store.list_providers(MAX_PAGE_LIMIT, 0).await?;
    if !providers.items.is_empty() {
        println!();
        println!("  By provider:");
        println!(
            "  {:<16} {:>9} {:>8} {:>8}",
            "PROVIDER", "ACCOUNTS", "THREADS", "TURNS"
        );
        println!("  {}", "-".repeat(44));
        for p in &providers.items {
            println!(
                "  {:<16} {:>9} {:>8} {:>8}",
                p.provider.provider_id.as_str(),
                p.account_count,
                p.thread_count,
                p.turn_count
            );
        }
    }

    let runs = store.list_ingest_runs(1, 0).await?;
    if let Some(last) = runs.items.first() {
        println!();
        println!(
            "  Last import:  {} ({}, {})",
            last.source_root,
            last.status,
            format_ts_relative(last.started_at)
        );
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
