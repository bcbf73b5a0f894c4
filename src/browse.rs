//! Read-only CLI views over the indexed universe.
//!
//! Each `run_*` function backs one `chatu` listing command. With `--json`
//! the [`Page`] envelope is printed as-is; otherwise a compact table or
//! record view goes to stdout.

use anyhow::{bail, Result};
use serde::Serialize;

use chat_universe_core::models::{NetworkEdge, Page, ProviderId};

use crate::config::Config;
use crate::stats::format_ts_iso;
use crate::store::IndexingStore;

/// `--limit` / `--offset` as given on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Paging {
    pub limit: i64,
    pub offset: i64,
    pub json: bool,
}

async fn with_store<F, Fut>(config: &Config, f: F) -> Result<()>
where
    F: FnOnce(IndexingStore) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let store = IndexingStore::open(config).await?;
    let handle = store.clone();
    let result = f(store).await;
    handle.close().await;
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_page_footer<T>(page: &Page<T>) {
    println!();
    println!(
        "  showing {}-{} of {}",
        if page.items.is_empty() { 0 } else { page.offset + 1 },
        page.offset + page.items.len() as i64,
        page.total
    );
}

/// `chatu providers`
pub async fn run_providers(config: &Config, paging: Paging) -> Result<()> {
    with_store(config, |store| async move {
        let page = store.list_providers(paging.limit, paging.offset).await?;
        if paging.json {
            return print_json(&page);
        }

        println!(
            "{:<12} {:<16} {:>9} {:>8} {:>8}",
            "PROVIDER", "NAME", "ACCOUNTS", "THREADS", "TURNS"
        );
        for p in &page.items {
            println!(
                "{:<12} {:<16} {:>9} {:>8} {:>8}",
                p.provider.provider_id.as_str(),
                p.provider.display_name,
                p.account_count,
                p.thread_count,
                p.turn_count
            );
        }
        print_page_footer(&page);
        Ok(())
    })
    .await
}

/// `chatu chats <provider>`
pub async fn run_chats(config: &Config, provider: &str, paging: Paging) -> Result<()> {
    let provider: ProviderId = provider.parse()?;
    with_store(config, |store| async move {
        let page = store
            .list_provider_chats(provider, paging.limit, paging.offset)
            .await?;
        if paging.json {
            return print_json(&page);
        }

        for chat in &page.items {
            println!(
                "{}  {:>5} turns  {}  {}",
                format_ts_iso(chat.thread.updated_at),
                chat.turn_count,
                chat.thread.id,
                chat.thread.title
            );
        }
        print_page_footer(&page);
        Ok(())
    })
    .await
}

/// `chatu chat <thread id>`
pub async fn run_chat(config: &Config, thread_id: &str, json: bool) -> Result<()> {
    with_store(config, |store| async move {
        let chat = match store.get_chat(thread_id).await? {
            Some(c) => c,
            None => bail!("chat not found: {}", thread_id),
        };
        if json {
            return print_json(&chat);
        }

        let t = &chat.thread;
        println!("--- Chat ---");
        println!("id:           {}", t.id);
        println!("title:        {}", t.title);
        println!("provider:     {}", t.provider_id);
        if let Some(ref account) = chat.account_display_name {
            println!("account:      {}", account);
        }
        if let Some(ref external) = t.external_thread_id {
            println!("external_id:  {}", external);
        }
        println!("source_path:  {}", t.source_path);
        println!("created_at:   {}", format_ts_iso(t.created_at));
        println!("updated_at:   {}", format_ts_iso(t.updated_at));
        println!("ingested_at:  {}", format_ts_iso(t.ingested_at));
        println!("turns:        {}", chat.turn_count);
        println!("metadata:     {}", t.metadata);
        Ok(())
    })
    .await
}

/// `chatu turns <thread id>`
pub async fn run_turns(config: &Config, thread_id: &str, paging: Paging) -> Result<()> {
    with_store(config, |store| async move {
        let page = store
            .list_chat_turns(thread_id, paging.limit, paging.offset)
            .await?;
        if paging.json {
            return print_json(&page);
        }

        for turn in &page.items {
            let when = turn.timestamp.map(format_ts_iso).unwrap_or_default();
            println!("[{}] {} {}", turn.turn_index, turn.role.as_str(), when);
            println!("{}", turn.content);
            println!();
        }
        print_page_footer(&page);
        Ok(())
    })
    .await
}

fn print_edges(page: &Page<NetworkEdge>) {
    println!(
        "{:>6}  {:<10} {:<10} {}",
        "WEIGHT", "SOURCE", "TARGET", "THREADS"
    );
    for edge in &page.items {
        println!(
            "{:>6}  {:<10} {:<10} {} -> {}",
            edge.weight,
            edge.source_provider.as_str(),
            edge.target_provider.as_str(),
            edge.source_title,
            edge.target_title
        );
    }
    print_page_footer(page);
}

/// `chatu network <thread id>`
pub async fn run_network(config: &Config, thread_id: &str, paging: Paging) -> Result<()> {
    with_store(config, |store| async move {
        let page = store
            .get_chat_network(thread_id, paging.limit, paging.offset)
            .await?;
        if paging.json {
            return print_json(&page);
        }
        print_edges(&page);
        Ok(())
    })
    .await
}

/// `chatu parallel`
pub async fn run_parallel(config: &Config, cross_provider: bool, paging: Paging) -> Result<()> {
    with_store(config, |store| async move {
        let page = store
            .list_parallel_networks(cross_provider, paging.limit, paging.offset)
            .await?;
        if paging.json {
            return print_json(&page);
        }
        print_edges(&page);
        Ok(())
    })
    .await
}

/// `chatu terms <term>`
pub async fn run_terms(
    config: &Config,
    term: &str,
    provider: Option<&str>,
    paging: Paging,
) -> Result<()> {
    let provider = provider.map(str::parse::<ProviderId>).transpose()?;
    with_store(config, |store| async move {
        let page = store
            .find_term_occurrences(term, provider, paging.limit, paging.offset)
            .await?;
        if paging.json {
            return print_json(&page);
        }

        if let Some(entry) = store.get_lexicon_entry(term).await? {
            println!("{} (in {} threads)", entry.normalized_term, entry.doc_freq);
            println!();
        }
        for hit in &page.items {
            println!(
                "{:<10} {} #{}  ...{}[{}]{}...",
                hit.provider_id.as_str(),
                hit.thread_title,
                hit.turn_index,
                hit.context_before,
                hit.term,
                hit.context_after
            );
        }
        print_page_footer(&page);
        Ok(())
    })
    .await
}

/// `chatu runs [id]`
pub async fn run_runs(config: &Config, run_id: Option<&str>, paging: Paging) -> Result<()> {
    with_store(config, |store| async move {
        if let Some(id) = run_id {
            let run = match store.get_ingest_run(id).await? {
                Some(r) => r,
                None => bail!("ingest run not found: {}", id),
            };
            return print_json(&run);
        }

        let page = store.list_ingest_runs(paging.limit, paging.offset).await?;
        if paging.json {
            return print_json(&page);
        }
        println!(
            "{:<36}  {:<9} {:<16} {:>6} {:>6} {}",
            "RUN", "STATUS", "STARTED", "CHATS", "QUAR", "ROOT"
        );
        for run in &page.items {
            println!(
                "{:<36}  {:<9} {:<16} {:>6} {:>6} {}",
                run.id,
                run.status.as_str(),
                format_ts_iso(run.started_at),
                run.counts.chats_ingested,
                run.counts.files_quarantined,
                run.source_root
            );
        }
        print_page_footer(&page);
        Ok(())
    })
    .await
}
