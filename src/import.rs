//! Batch import of normalized conversation exports.
//!
//! Walks a source root, selects files with the `[import]` include/exclude
//! globs and ingests every conversation they hold. A file may contain one
//! `NormalizedConversation` object or an array of them.
//!
//! Files that cannot be parsed are quarantined: they are counted, skipped,
//! and listed in a JSON policy report under `<db dir>/reports/`. A
//! conversation that fails to ingest marks the run `failed`, but every
//! thread committed before or after it stays indexed.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use walkdir::WalkDir;

use chat_universe_core::models::{
    IngestCompletion, IngestCounts, IngestRun, NormalizedConversation, RunStatus,
};

use crate::config::{Config, ImportConfig};
use crate::store::IndexingStore;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuarantinedFile {
    path: String,
    reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailedConversation {
    path: String,
    title: String,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyReport<'a> {
    run_id: &'a str,
    source_root: &'a str,
    quarantined: &'a [QuarantinedFile],
    failed: &'a [FailedConversation],
}

/// Export files under `root` matching the import globs, sorted by path.
pub fn scan_export_files(root: &Path, import: &ImportConfig) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Import root does not exist: {}", root.display());
    }

    let include_set = build_globset(&import.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/reports/**".to_string()];
    excludes.extend(import.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(import.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Parse one export file. Any malformed conversation rejects the file.
pub fn parse_export_file(path: &Path) -> Result<Vec<NormalizedConversation>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw).context("Invalid JSON")?;

    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item)
                    .with_context(|| format!("Conversation #{} is not a normalized conversation", i))
            })
            .collect(),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)
            .context("Not a normalized conversation")?]),
        _ => bail!("Expected a conversation object or an array of conversations"),
    }
}

/// Import every export file under `root`, recording one ingest run.
pub async fn import_directory(
    store: &IndexingStore,
    root: &Path,
    import: &ImportConfig,
    reports_dir: &Path,
) -> Result<IngestRun> {
    let source_root = root.display().to_string();
    let run = store
        .create_ingest_run(
            &source_root,
            &serde_json::json!({
                "includeGlobs": import.include_globs,
                "excludeGlobs": import.exclude_globs,
            }),
        )
        .await?;

    let files = match scan_export_files(root, import) {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "import scan failed");
            return store
                .complete_ingest_run(
                    &run.id,
                    &IngestCompletion {
                        status: RunStatus::Failed,
                        counts: IngestCounts::default(),
                        policy_report_path: None,
                        error: Some(format!("{:#}", e)),
                    },
                )
                .await;
        }
    };

    let mut counts = IngestCounts::default();
    let mut quarantined: Vec<QuarantinedFile> = Vec::new();
    let mut failed: Vec<FailedConversation> = Vec::new();

    for path in &files {
        counts.files_scanned += 1;
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        let conversations = match parse_export_file(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %relative, error = %e, "quarantined export file");
                counts.files_quarantined += 1;
                quarantined.push(QuarantinedFile {
                    path: relative,
                    reason: format!("{:#}", e),
                });
                continue;
            }
        };

        let multiple = conversations.len() > 1;
        let mut ingested_any = false;
        for (i, mut conversation) in conversations.into_iter().enumerate() {
            if conversation.source_path.trim().is_empty() {
                conversation.source_path = if multiple {
                    format!("{}#{}", relative, i)
                } else {
                    relative.clone()
                };
            }

            match store.ingest_normalized_thread(&conversation).await {
                Ok(ingested) => {
                    counts.chats_ingested += 1;
                    counts.turns_ingested += ingested.turns.len() as i64;
                    ingested_any = true;
                }
                Err(e) => {
                    warn!(path = %relative, title = %conversation.title, error = %e, "conversation failed to ingest");
                    failed.push(FailedConversation {
                        path: relative.clone(),
                        title: conversation.title.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        if ingested_any {
            counts.files_ingested += 1;
        }
    }

    let policy_report_path = if quarantined.is_empty() && failed.is_empty() {
        None
    } else {
        let report = PolicyReport {
            run_id: &run.id,
            source_root: &source_root,
            quarantined: &quarantined,
            failed: &failed,
        };
        Some(write_policy_report(reports_dir, &run.id, &report)?)
    };

    let (status, error) = if failed.is_empty() {
        (RunStatus::Completed, None)
    } else {
        (
            RunStatus::Failed,
            Some(format!("{} conversation(s) failed to ingest", failed.len())),
        )
    };

    info!(
        run_id = %run.id,
        status = %status,
        files = counts.files_scanned,
        quarantined = counts.files_quarantined,
        chats = counts.chats_ingested,
        "import finished"
    );

    store
        .complete_ingest_run(
            &run.id,
            &IngestCompletion {
                status,
                counts,
                policy_report_path,
                error,
            },
        )
        .await
}

fn write_policy_report(dir: &Path, run_id: &str, report: &PolicyReport<'_>) -> Result<String> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory {}", dir.display()))?;
    let path = dir.join(format!("ingest-{}.json", run_id));
    std::fs::write(&path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write policy report {}", path.display()))?;
    Ok(path.display().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// `chatu import <root>`.
pub async fn run_import(config: &Config, root: &Path) -> Result<()> {
    let store = IndexingStore::open(config).await?;
    let run = import_directory(&store, root, &config.import, &config.db.reports_dir()).await;
    store.close().await;
    let run = run?;

    println!("import {}", run.source_root);
    println!("  run: {}", run.id);
    println!("  status: {}", run.status);
    println!("  files scanned: {}", run.counts.files_scanned);
    println!("  files ingested: {}", run.counts.files_ingested);
    println!("  files quarantined: {}", run.counts.files_quarantined);
    println!("  chats ingested: {}", run.counts.chats_ingested);
    println!("  turns ingested: {}", run.counts.turns_ingested);
    if let Some(ref report) = run.policy_report_path {
        println!("  policy report: {}", report);
    }
    if let Some(ref error) = run.error {
        println!("  error: {}", error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_single_and_array_files() {
        let tmp = TempDir::new().unwrap();
        let single = tmp.path().join("one.json");
        fs::write(
            &single,
            r#"{"provider":"claude","sourcePath":"a.json","title":"A","turns":[]}"#,
        )
        .unwrap();
        let array = tmp.path().join("many.json");
        fs::write(
            &array,
            r#"[{"provider":"chatgpt","sourcePath":"b","turns":[]},{"provider":"grok","sourcePath":"c","turns":[]}]"#,
        )
        .unwrap();

        assert_eq!(parse_export_file(&single).unwrap().len(), 1);
        let many = parse_export_file(&array).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].provider.as_str(), "grok");
    }

    #[test]
    fn malformed_files_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(parse_export_file(&bad).is_err());

        let wrong_shape = tmp.path().join("wrong.json");
        fs::write(&wrong_shape, r#"[{"provider":"claude"}]"#).unwrap();
        assert!(parse_export_file(&wrong_shape).is_err());

        let scalar = tmp.path().join("scalar.json");
        fs::write(&scalar, "42").unwrap();
        assert!(parse_export_file(&scalar).is_err());
    }

    #[test]
    fn scan_applies_globs() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("claude")).unwrap();
        fs::create_dir_all(tmp.path().join("skip")).unwrap();
        fs::write(tmp.path().join("claude/a.json"), "{}").unwrap();
        fs::write(tmp.path().join("skip/b.json"), "{}").unwrap();
        fs::write(tmp.path().join("notes.txt"), "hi").unwrap();

        let import = ImportConfig {
            exclude_globs: vec!["skip/**".to_string()],
            ..Default::default()
        };
        let files = scan_export_files(tmp.path(), &import).unwrap();
        assert_eq!(files, vec![tmp.path().join("claude/a.json")]);
    }
}
