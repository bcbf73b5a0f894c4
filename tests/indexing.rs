use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::json;
use sqlx::Row;
use tempfile::TempDir;

use chat_universe::config::{Config, ImportConfig};
use chat_universe::import::import_directory;
use chat_universe::jobs::{get_reindex_run, start_reindex, wait_for_reindex};
use chat_universe::store::{AccountInput, IndexingStore};
use chat_universe_core::models::{
    IngestCompletion, IngestCounts, NormalizedConversation, ProviderId, RunStatus, TurnInput,
    TurnRole,
};

fn test_config(tmp: &TempDir) -> Config {
    let path = tmp.path().join("data").join("universe.sqlite");
    toml::from_str(&format!("[db]\npath = \"{}\"\n", path.display())).unwrap()
}

async fn open_store(tmp: &TempDir) -> IndexingStore {
    IndexingStore::open(&test_config(tmp)).await.unwrap()
}

fn conversation(provider: &str, source_path: &str, title: &str, turns: &[(&str, &str)]) -> NormalizedConversation {
    let turns: Vec<_> = turns
        .iter()
        .enumerate()
        .map(|(i, (role, content))| json!({ "turnIndex": i, "role": role, "content": content }))
        .collect();
    serde_json::from_value(json!({
        "provider": provider,
        "sourcePath": source_path,
        "title": title,
        "turns": turns,
    }))
    .unwrap()
}

fn turn_input(turn_index: i64, role: TurnRole, content: &str) -> TurnInput {
    TurnInput {
        id: None,
        turn_index,
        role,
        content: content.to_string(),
        timestamp: None,
        pair_turn_id: None,
        metadata: json!({}),
    }
}

async fn occurrence_positions(store: &IndexingStore) -> Vec<(String, i64)> {
    sqlx::query(
        "SELECT l.normalized_term, o.position FROM term_occurrences o \
         JOIN term_lexicon l ON l.id = o.lexicon_id ORDER BY o.thread_id, o.position",
    )
    .fetch_all(store.pool())
    .await
    .unwrap()
    .iter()
    .map(|r| (r.get("normalized_term"), r.get("position")))
    .collect()
}

async fn count(store: &IndexingStore, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(store.pool()).await.unwrap()
}

async fn doc_freq(store: &IndexingStore, term: &str) -> Option<i64> {
    store.get_lexicon_entry(term).await.unwrap().map(|e| e.doc_freq)
}

async fn edge_weights(store: &IndexingStore) -> BTreeMap<(String, String), i64> {
    sqlx::query("SELECT source_thread_id, target_thread_id, weight FROM thematic_edges")
        .fetch_all(store.pool())
        .await
        .unwrap()
        .iter()
        .map(|r| ((r.get("source_thread_id"), r.get("target_thread_id")), r.get("weight")))
        .collect()
}

async fn lexicon_snapshot(store: &IndexingStore) -> BTreeMap<String, i64> {
    sqlx::query("SELECT normalized_term, doc_freq FROM term_lexicon")
        .fetch_all(store.pool())
        .await
        .unwrap()
        .iter()
        .map(|r| (r.get("normalized_term"), r.get("doc_freq")))
        .collect()
}

#[tokio::test]
async fn test_cooccurrence_across_providers() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let t1 = store
        .ingest_normalized_thread(&conversation("claude", "claude/t1.json", "T1", &[("user", "nebula drift")]))
        .await
        .unwrap();
    assert_eq!(doc_freq(&store, "nebula").await, Some(1));
    assert_eq!(count(&store, "SELECT COUNT(*) FROM thematic_edges").await, 0);

    let t2 = store
        .ingest_normalized_thread(&conversation("chatgpt", "chatgpt/t2.json", "T2", &[("user", "nebula orbit")]))
        .await
        .unwrap();

    assert_eq!(doc_freq(&store, "nebula").await, Some(2));
    assert_eq!(doc_freq(&store, "drift").await, Some(1));

    let hits = store.find_term_occurrences("Nebula", None, 10, 0).await.unwrap();
    assert_eq!(hits.total, 2);
    let claude_only = store
        .find_term_occurrences("nebula", Some(ProviderId::Claude), 10, 0)
        .await
        .unwrap();
    assert_eq!(claude_only.total, 1);
    assert_eq!(claude_only.items[0].thread_id, t1.thread.id);

    // Only the later thread's outgoing edge exists until T1 is reindexed.
    let edges = edge_weights(&store).await;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges.get(&(t2.thread.id.clone(), t1.thread.id.clone())), Some(&1));

    let network = store.get_chat_network(&t1.thread.id, 10, 0).await.unwrap();
    assert_eq!(network.total, 1);
    assert_eq!(network.items[0].source_thread_id, t2.thread.id);
    assert_eq!(network.items[0].target_thread_id, t1.thread.id);
    assert_eq!(network.items[0].evidence, json!({ "sharedTerms": 1 }));

    let parallel = store.list_parallel_networks(true, 10, 0).await.unwrap();
    assert_eq!(parallel.total, 1);
    assert_eq!(parallel.items[0].source_provider, ProviderId::Chatgpt);
    assert_eq!(parallel.items[0].target_provider, ProviderId::Claude);
}

#[tokio::test]
async fn test_reindex_is_idempotent_and_symmetric() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let a = store
        .ingest_normalized_thread(&conversation(
            "claude",
            "a.json",
            "A",
            &[("user", "rust borrow checker"), ("assistant", "the borrow checker enforces lifetimes")],
        ))
        .await
        .unwrap();
    let b = store
        .ingest_normalized_thread(&conversation("gemini", "b.json", "B", &[("user", "lifetimes in rust")]))
        .await
        .unwrap();
    store
        .ingest_normalized_thread(&conversation("grok", "c.json", "C", &[("user", "sourdough starter")]))
        .await
        .unwrap();

    let first = store.reindex_universe().await.unwrap();
    let lexicon_after_first = lexicon_snapshot(&store).await;
    let edges_after_first = edge_weights(&store).await;
    let occurrences_after_first = count(&store, "SELECT COUNT(*) FROM term_occurrences").await;

    let second = store.reindex_universe().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.threads, 3);
    assert_eq!(first.turns, 4);
    assert_eq!(lexicon_snapshot(&store).await, lexicon_after_first);
    assert_eq!(edge_weights(&store).await, edges_after_first);
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM term_occurrences").await,
        occurrences_after_first
    );

    // "rust" and "lifetimes" are shared both ways after a full rebuild.
    assert_eq!(edges_after_first.get(&(a.thread.id.clone(), b.thread.id.clone())), Some(&2));
    assert_eq!(edges_after_first.get(&(b.thread.id.clone(), a.thread.id.clone())), Some(&2));
    assert_eq!(lexicon_after_first.get("borrow"), Some(&1));
    assert_eq!(lexicon_after_first.get("rust"), Some(&2));
}

#[tokio::test]
async fn test_incremental_doc_freq_matches_recompute() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    store
        .ingest_normalized_thread(&conversation("claude", "one.json", "One", &[("user", "alpha beta gamma")]))
        .await
        .unwrap();
    store
        .ingest_normalized_thread(&conversation("claude", "two.json", "Two", &[("user", "beta gamma delta")]))
        .await
        .unwrap();
    // Re-ingest with a different term set.
    store
        .ingest_normalized_thread(&conversation("claude", "one.json", "One", &[("user", "delta epsilon alpha alpha")]))
        .await
        .unwrap();

    assert_eq!(doc_freq(&store, "alpha").await, Some(1));
    assert_eq!(doc_freq(&store, "beta").await, Some(1));
    assert_eq!(doc_freq(&store, "delta").await, Some(2));
    assert_eq!(doc_freq(&store, "epsilon").await, Some(1));

    assert_eq!(store.recompute_document_frequencies().await.unwrap(), 0);

    sqlx::query("UPDATE term_lexicon SET doc_freq = 7 WHERE normalized_term = 'delta'")
        .execute(store.pool())
        .await
        .unwrap();
    assert_eq!(store.recompute_document_frequencies().await.unwrap(), 1);
    assert_eq!(doc_freq(&store, "delta").await, Some(2));
}

#[tokio::test]
async fn test_empty_turns_clear_derived_rows() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let first = store
        .ingest_normalized_thread(&conversation("copilot", "x.json", "X", &[("user", "kubernetes ingress")]))
        .await
        .unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM units").await, 1);

    let second = store
        .ingest_normalized_thread(&conversation("copilot", "x.json", "X", &[]))
        .await
        .unwrap();
    assert_eq!(first.thread.id, second.thread.id);
    assert!(second.turns.is_empty());

    assert_eq!(count(&store, "SELECT COUNT(*) FROM chat_turns").await, 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM term_occurrences").await, 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM units").await, 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM units_fts").await, 0);
    assert_eq!(doc_freq(&store, "kubernetes").await, Some(0));

    let chat = store.get_chat(&first.thread.id).await.unwrap().unwrap();
    assert_eq!(chat.turn_count, 0);
}

#[tokio::test]
async fn test_replace_thread_turns_is_repeatable() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let ingested = store
        .ingest_normalized_thread(&conversation("claude", "alpha.json", "Alpha", &[]))
        .await
        .unwrap();
    let thread = ingested.thread;
    let expected = vec![
        ("alpha".to_string(), 0),
        ("beta".to_string(), 1),
        ("alpha".to_string(), 2),
    ];

    for _ in 0..2 {
        let turns = store
            .replace_thread_turns(
                &thread.id,
                &thread.provider_ref_id,
                vec![turn_input(0, TurnRole::User, "Alpha beta, alpha!")],
            )
            .await
            .unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(occurrence_positions(&store).await, expected);
        assert_eq!(doc_freq(&store, "alpha").await, Some(1));
        assert_eq!(doc_freq(&store, "beta").await, Some(1));
        assert_eq!(count(&store, "SELECT COUNT(*) FROM units").await, 1);
    }

    let cleared = store
        .replace_thread_turns(&thread.id, &thread.provider_ref_id, Vec::new())
        .await
        .unwrap();
    assert!(cleared.is_empty());
    assert_eq!(count(&store, "SELECT COUNT(*) FROM chat_turns").await, 0);
    assert!(occurrence_positions(&store).await.is_empty());
    assert_eq!(count(&store, "SELECT COUNT(*) FROM units").await, 0);
    assert_eq!(doc_freq(&store, "alpha").await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_replace_on_two_threads() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let a = store
        .ingest_normalized_thread(&conversation("claude", "a.json", "A", &[("user", "nebula")]))
        .await
        .unwrap()
        .thread;
    let b = store
        .ingest_normalized_thread(&conversation("chatgpt", "b.json", "B", &[("user", "nebula")]))
        .await
        .unwrap()
        .thread;

    let mut handles = Vec::new();
    for (thread, words) in [(a, "nebula orbit comet"), (b, "nebula sourdough starter")] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..25 {
                let content = format!("{} round{}", words, round);
                store
                    .replace_thread_turns(
                        &thread.id,
                        &thread.provider_ref_id,
                        vec![
                            turn_input(0, TurnRole::User, &content),
                            turn_input(1, TurnRole::Assistant, "noted"),
                        ],
                    )
                    .await?;
            }
            anyhow::Ok(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(count(&store, "SELECT COUNT(*) FROM chat_turns").await, 4);
    assert_eq!(doc_freq(&store, "nebula").await, Some(2));
    assert_eq!(doc_freq(&store, "round24").await, Some(2));
    assert_eq!(doc_freq(&store, "round3").await, Some(0));
    assert_eq!(store.recompute_document_frequencies().await.unwrap(), 0);
}

#[tokio::test]
async fn test_turn_pairing_and_ordering() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let ingested = store
        .ingest_normalized_thread(&conversation(
            "chatgpt",
            "pairs.json",
            "Pairs",
            &[
                ("system", "be concise"),
                ("user", "first question"),
                ("tool", "lookup result"),
                ("assistant", "first answer"),
                ("user", "unanswered"),
                ("user", "second question"),
                ("assistant", "second answer"),
            ],
        ))
        .await
        .unwrap();

    let turns = &ingested.turns;
    assert_eq!(turns.len(), 7);
    assert_eq!(turns[0].role, TurnRole::System);
    assert!(turns[0].pair_turn_id.is_none());
    assert_eq!(turns[1].pair_turn_id.as_deref(), Some(turns[3].id.as_str()));
    assert_eq!(turns[3].pair_turn_id.as_deref(), Some(turns[1].id.as_str()));
    assert!(turns[2].pair_turn_id.is_none());
    assert!(turns[4].pair_turn_id.is_none());
    assert_eq!(turns[5].pair_turn_id.as_deref(), Some(turns[6].id.as_str()));

    let page = store
        .list_chat_turns(&ingested.thread.id, 0, -5)
        .await
        .unwrap();
    assert_eq!(page.limit, 50);
    assert_eq!(page.offset, 0);
    assert_eq!(page.total, 7);
    let indexes: Vec<i64> = page.items.iter().map(|t| t.turn_index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_thread_matches_by_external_id() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let mut first = conversation("gemini", "exports/2024/chat.json", "Draft", &[("user", "hello there")]);
    first.external_thread_id = Some("g-123".to_string());
    let mut moved = conversation("gemini", "exports/2025/chat.json", "Final", &[("user", "hello again")]);
    moved.external_thread_id = Some("g-123".to_string());

    let a = store.ingest_normalized_thread(&first).await.unwrap();
    let b = store.ingest_normalized_thread(&moved).await.unwrap();

    assert_eq!(a.thread.id, b.thread.id);
    assert_eq!(b.thread.title, "Final");
    assert_eq!(b.thread.source_path, "exports/2025/chat.json");
    assert_eq!(count(&store, "SELECT COUNT(*) FROM chat_threads").await, 1);

    // Same source path under another provider is a different thread.
    store
        .ingest_normalized_thread(&conversation("claude", "exports/2025/chat.json", "Other", &[]))
        .await
        .unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM chat_threads").await, 2);
}

#[tokio::test]
async fn test_account_null_key_collapses() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let provider = store
        .upsert_provider(ProviderId::Claude, None, Some(&json!({ "plan": "pro" })))
        .await
        .unwrap();
    assert_eq!(provider.display_name, "Claude");

    let default_a = store
        .upsert_provider_account(
            &provider.id,
            &AccountInput {
                display_name: Some("Me".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let default_b = store
        .upsert_provider_account(
            &provider.id,
            &AccountInput {
                email: Some("me@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(default_a.id, default_b.id);
    assert_eq!(default_b.display_name.as_deref(), Some("Me"));
    assert_eq!(default_b.email.as_deref(), Some("me@example.com"));

    let keyed = AccountInput {
        external_account_id: Some("acct-1".to_string()),
        ..Default::default()
    };
    let keyed_a = store.upsert_provider_account(&provider.id, &keyed).await.unwrap();
    let keyed_b = store.upsert_provider_account(&provider.id, &keyed).await.unwrap();
    assert_eq!(keyed_a.id, keyed_b.id);
    assert_ne!(keyed_a.id, default_a.id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM provider_accounts").await, 2);

    // Upserting without metadata keeps what was stored.
    let again = store.upsert_provider(ProviderId::Claude, None, None).await.unwrap();
    assert_eq!(again.id, provider.id);
    assert_eq!(again.metadata, json!({ "plan": "pro" }));
}

#[tokio::test]
async fn test_failed_ingest_rolls_back() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let original = store
        .ingest_normalized_thread(&conversation("claude", "keep.json", "Keep", &[("user", "original words")]))
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER fail_occurrences BEFORE INSERT ON term_occurrences \
         BEGIN SELECT RAISE(ABORT, 'forced failure'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let replaced = store
        .ingest_normalized_thread(&conversation("claude", "keep.json", "Renamed", &[("user", "replacement words")]))
        .await;
    assert!(replaced.is_err());

    let fresh = store
        .ingest_normalized_thread(&conversation("grok", "new.json", "New", &[("user", "never stored")]))
        .await;
    assert!(fresh.is_err());

    let chat = store.get_chat(&original.thread.id).await.unwrap().unwrap();
    assert_eq!(chat.thread.title, "Keep");
    let turns = store.list_chat_turns(&original.thread.id, 10, 0).await.unwrap();
    assert_eq!(turns.items.len(), 1);
    assert_eq!(turns.items[0].content, "original words");

    assert_eq!(count(&store, "SELECT COUNT(*) FROM chat_threads").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM providers").await, 1);
    assert_eq!(doc_freq(&store, "original").await, Some(1));
    assert_eq!(doc_freq(&store, "replacement").await, None);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM term_occurrences").await, 2);
}

#[tokio::test]
async fn test_failed_reindex_rolls_back() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    store
        .ingest_normalized_thread(&conversation("claude", "a.json", "A", &[("user", "rust lifetimes")]))
        .await
        .unwrap();
    store
        .ingest_normalized_thread(&conversation("gemini", "b.json", "B", &[("user", "rust traits")]))
        .await
        .unwrap();
    store.reindex_universe().await.unwrap();

    let lexicon = lexicon_snapshot(&store).await;
    let occurrences = occurrence_positions(&store).await;
    let edges = edge_weights(&store).await;
    assert_eq!(edges.len(), 2);

    // Edges are written in the last pass, after the lexicon and occurrences
    // have already been rebuilt.
    sqlx::query(
        "CREATE TRIGGER fail_edges BEFORE INSERT ON thematic_edges \
         BEGIN SELECT RAISE(ABORT, 'forced failure'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    assert!(store.reindex_universe().await.is_err());

    assert_eq!(lexicon_snapshot(&store).await, lexicon);
    assert_eq!(occurrence_positions(&store).await, occurrences);
    assert_eq!(edge_weights(&store).await, edges);
}

#[tokio::test]
async fn test_ingest_runs_complete_once() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let run = store.create_ingest_run("/exports", &json!({})).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);

    let running = store
        .complete_ingest_run(
            &run.id,
            &IngestCompletion {
                status: RunStatus::Running,
                counts: IngestCounts::default(),
                policy_report_path: None,
                error: None,
            },
        )
        .await;
    assert!(running.is_err());

    let completion = IngestCompletion {
        status: RunStatus::Completed,
        counts: IngestCounts {
            files_scanned: 3,
            chats_ingested: 2,
            ..Default::default()
        },
        policy_report_path: None,
        error: None,
    };
    let done = store.complete_ingest_run(&run.id, &completion).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.counts.files_scanned, 3);
    assert!(done.completed_at.is_some());

    let again = store.complete_ingest_run(&run.id, &completion).await.unwrap_err();
    assert!(again.to_string().contains("already completed"));

    let missing = store.complete_ingest_run("nope", &completion).await.unwrap_err();
    assert!(missing.to_string().contains("not found"));

    let runs = store.list_ingest_runs(10, 0).await.unwrap();
    assert_eq!(runs.total, 1);
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_import_quarantines_bad_files() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = IndexingStore::open(&config).await.unwrap();

    let root = tmp.path().join("exports");
    write(
        &root.join("claude/one.json"),
        r#"{"provider":"claude","sourcePath":"claude/one.json","title":"One",
            "turns":[{"turnIndex":0,"role":"user","content":"tidal locking"},
                     {"turnIndex":1,"role":"assistant","content":"tidal forces"}]}"#,
    );
    write(
        &root.join("chatgpt/batch.json"),
        r#"[{"provider":"chatgpt","sourcePath":"","title":"A","turns":[]},
            {"provider":"chatgpt","sourcePath":"","title":"B","turns":[]}]"#,
    );
    write(&root.join("broken.json"), "{ this is not json");
    write(&root.join("notes.md"), "# not an export");

    let run = import_directory(&store, &root, &ImportConfig::default(), &config.db.reports_dir())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counts.files_scanned, 3);
    assert_eq!(run.counts.files_ingested, 2);
    assert_eq!(run.counts.files_quarantined, 1);
    assert_eq!(run.counts.chats_ingested, 3);
    assert_eq!(run.counts.turns_ingested, 2);
    assert!(run.completed_at.is_some());

    let report_path = run.policy_report_path.clone().unwrap();
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["quarantined"][0]["path"], "broken.json");
    assert_eq!(report["runId"], run.id.as_str());

    // Array members without a source path get distinct ones.
    let paths: Vec<String> = sqlx::query_scalar(
        "SELECT source_path FROM chat_threads WHERE title IN ('A', 'B') ORDER BY title",
    )
    .fetch_all(store.pool())
    .await
    .unwrap();
    assert_eq!(paths, vec!["chatgpt/batch.json#0", "chatgpt/batch.json#1"]);
}

#[tokio::test]
async fn test_import_thread_failure_keeps_committed_threads() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = IndexingStore::open(&config).await.unwrap();

    let root = tmp.path().join("exports");
    write(
        &root.join("a_good.json"),
        r#"{"provider":"grok","sourcePath":"good","title":"Good",
            "turns":[{"turnIndex":0,"role":"user","content":"fine"}]}"#,
    );
    // Duplicate turn indexes violate the per-thread uniqueness constraint.
    write(
        &root.join("b_dup.json"),
        r#"{"provider":"grok","sourcePath":"dup","title":"Dup",
            "turns":[{"turnIndex":0,"role":"user","content":"one"},
                     {"turnIndex":0,"role":"assistant","content":"two"}]}"#,
    );

    let run = import_directory(&store, &root, &ImportConfig::default(), &config.db.reports_dir())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.counts.chats_ingested, 1);
    assert!(run.error.is_some());
    assert!(run.policy_report_path.is_some());

    let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM chat_threads")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(titles, vec!["Good"]);
}

#[tokio::test]
async fn test_background_reindex_job() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    store
        .ingest_normalized_thread(&conversation("claude", "j1.json", "J1", &[("user", "orbital mechanics")]))
        .await
        .unwrap();
    store
        .ingest_normalized_thread(&conversation("gemini", "j2.json", "J2", &[("user", "orbital resonance")]))
        .await
        .unwrap();

    let run_id = start_reindex(&store).await.unwrap();
    let run = wait_for_reindex(&store, &run_id, Duration::from_millis(20))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let stats = run.stats.unwrap();
    assert_eq!(stats.threads, 2);
    assert_eq!(stats.edges, 2);
    assert!(run.completed_at.is_some());

    assert!(get_reindex_run(&store, "missing").await.unwrap().is_none());

    let summary = store.get_universe_summary().await.unwrap();
    assert_eq!(summary.threads, 2);
    assert_eq!(summary.edges, 2);
    assert_eq!(summary.providers, 2);
}

#[tokio::test]
async fn test_provider_listing() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let mut with_account = conversation("claude", "p1.json", "P1", &[("user", "hi there")]);
    with_account.account_display_name = Some("Work".to_string());
    store.ingest_normalized_thread(&with_account).await.unwrap();
    store
        .ingest_normalized_thread(&conversation("claude", "p2.json", "P2", &[("user", "yo"), ("assistant", "hey")]))
        .await
        .unwrap();
    store
        .ingest_normalized_thread(&conversation("chatgpt", "p3.json", "P3", &[]))
        .await
        .unwrap();

    let providers = store.list_providers(10, 0).await.unwrap();
    assert_eq!(providers.total, 2);
    let claude = providers
        .items
        .iter()
        .find(|p| p.provider.provider_id == ProviderId::Claude)
        .unwrap();
    assert_eq!(claude.thread_count, 2);
    assert_eq!(claude.turn_count, 3);
    assert_eq!(claude.account_count, 1);

    let chats = store
        .list_provider_chats(ProviderId::Claude, 1, 0)
        .await
        .unwrap();
    assert_eq!(chats.total, 2);
    assert_eq!(chats.items.len(), 1);

    let none = store
        .list_provider_chats(ProviderId::Copilot, 10, 0)
        .await
        .unwrap();
    assert_eq!(none.total, 0);
}
