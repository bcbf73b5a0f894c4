//! Core data models shared by the indexing store and the search engine.
//!
//! Timestamps are Unix seconds (`i64`) everywhere except on the
//! [`NormalizedConversation`] input, which carries RFC 3339 datetimes as
//! produced by provider parsers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Assistant provider a conversation was exported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Chatgpt,
    Claude,
    Gemini,
    Grok,
    Copilot,
    Unknown,
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Chatgpt,
        ProviderId::Claude,
        ProviderId::Gemini,
        ProviderId::Grok,
        ProviderId::Copilot,
        ProviderId::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Chatgpt => "chatgpt",
            ProviderId::Claude => "claude",
            ProviderId::Gemini => "gemini",
            ProviderId::Grok => "grok",
            ProviderId::Copilot => "copilot",
            ProviderId::Unknown => "unknown",
        }
    }

    /// Human-facing name used when a provider row is first created.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Chatgpt => "ChatGPT",
            ProviderId::Claude => "Claude",
            ProviderId::Gemini => "Gemini",
            ProviderId::Grok => "Grok",
            ProviderId::Copilot => "Copilot",
            ProviderId::Unknown => "Unknown",
        }
    }

    /// Lenient parse: unrecognized values map to [`ProviderId::Unknown`].
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(ProviderId::Unknown)
    }
}

impl FromStr for ProviderId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chatgpt" | "openai" => Ok(ProviderId::Chatgpt),
            "claude" | "anthropic" => Ok(ProviderId::Claude),
            "gemini" | "bard" => Ok(ProviderId::Gemini),
            "grok" | "xai" => Ok(ProviderId::Grok),
            "copilot" => Ok(ProviderId::Copilot),
            "unknown" => Ok(ProviderId::Unknown),
            other => anyhow::bail!("unknown provider id: '{}'", other),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }

    /// Maps exporter-specific role names onto the four stored roles.
    /// Anything unrecognized is treated as a user turn.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" | "developer" => TurnRole::System,
            "assistant" | "model" | "bot" | "ai" => TurnRole::Assistant,
            "tool" | "function" => TurnRole::Tool,
            _ => TurnRole::User,
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn deserialize_role<'de, D>(deserializer: D) -> Result<TurnRole, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(TurnRole::parse_lenient(&raw))
}

fn deserialize_provider<'de, D>(deserializer: D) -> Result<ProviderId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(ProviderId::parse_lenient(&raw))
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

// ============ Normalizer contract ============

/// Provider-agnostic conversation emitted by the per-provider export parsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedConversation {
    #[serde(deserialize_with = "deserialize_provider")]
    pub provider: ProviderId,
    #[serde(default)]
    pub external_thread_id: Option<String>,
    #[serde(default)]
    pub external_account_id: Option<String>,
    #[serde(default)]
    pub account_display_name: Option<String>,
    #[serde(default)]
    pub account_email: Option<String>,
    #[serde(default)]
    pub title: String,
    pub source_path: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(default)]
    pub turns: Vec<NormalizedTurn>,
}

impl NormalizedConversation {
    /// Whether an account row should be upserted for this conversation.
    pub fn has_account_details(&self) -> bool {
        self.external_account_id.is_some()
            || self.account_display_name.is_some()
            || self.account_email.is_some()
    }
}

/// One turn of a [`NormalizedConversation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTurn {
    pub turn_index: i64,
    #[serde(deserialize_with = "deserialize_role")]
    pub role: TurnRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

/// A turn handed to `replace_thread_turns`.
///
/// `id` and `pair_turn_id` are generated/inferred when absent.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub id: Option<String>,
    pub turn_index: i64,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: Option<i64>,
    pub pair_turn_id: Option<String>,
    pub metadata: Value,
}

impl From<&NormalizedTurn> for TurnInput {
    fn from(turn: &NormalizedTurn) -> Self {
        Self {
            id: None,
            turn_index: turn.turn_index,
            role: turn.role,
            content: turn.content.clone(),
            timestamp: turn.timestamp.map(|t| t.timestamp()),
            pair_turn_id: None,
            metadata: turn.metadata.clone(),
        }
    }
}

// ============ Stored entities ============

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub provider_id: ProviderId,
    pub display_name: String,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Account within a provider.
///
/// `external_account_id == None` is the provider's single default
/// ("unidentified") account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAccount {
    pub id: String,
    pub provider_ref_id: String,
    pub external_account_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: String,
    pub provider_ref_id: String,
    pub provider_id: ProviderId,
    pub account_ref_id: Option<String>,
    pub external_thread_id: Option<String>,
    pub title: String,
    pub source_path: String,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub ingested_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub id: String,
    pub thread_id: String,
    pub turn_index: i64,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: Option<i64>,
    pub pair_turn_id: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LexiconEntry {
    pub id: i64,
    pub term: String,
    pub normalized_term: String,
    pub doc_freq: i64,
}

/// Edge type written by the co-occurrence graph builder.
pub const EDGE_TYPE_COOCCURRENCE: &str = "cooccurrence";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThematicEdge {
    pub source_thread_id: String,
    pub target_thread_id: String,
    pub edge_type: String,
    pub weight: i64,
    pub evidence: Value,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status: '{}'", other),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters reported when an ingest run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestCounts {
    pub files_scanned: i64,
    pub files_ingested: i64,
    pub files_quarantined: i64,
    pub chats_ingested: i64,
    pub turns_ingested: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRun {
    pub id: String,
    pub source_root: String,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: IngestCounts,
    pub policy_report_path: Option<String>,
    pub metadata: Value,
    pub error: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

/// Final state handed to `complete_ingest_run`.
#[derive(Debug, Clone)]
pub struct IngestCompletion {
    pub status: RunStatus,
    pub counts: IngestCounts,
    pub policy_report_path: Option<String>,
    pub error: Option<String>,
}

// ============ Read models ============

/// Paginated list envelope returned by every listing read.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseSummary {
    pub providers: i64,
    pub accounts: i64,
    pub threads: i64,
    pub turns: i64,
    pub terms: i64,
    pub occurrences: i64,
    pub edges: i64,
    pub units: i64,
    pub ingest_runs: i64,
}

/// Aggregate counts produced by a full reindex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexStats {
    pub threads: i64,
    pub turns: i64,
    pub terms: i64,
    pub occurrences: i64,
    pub edges: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    #[serde(flatten)]
    pub provider: Provider,
    pub account_count: i64,
    pub thread_count: i64,
    pub turn_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThreadSummary {
    #[serde(flatten)]
    pub thread: ChatThread,
    pub account_display_name: Option<String>,
    pub turn_count: i64,
}

/// A thematic edge joined with both endpoint threads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEdge {
    pub source_thread_id: String,
    pub source_title: String,
    pub source_provider: ProviderId,
    pub target_thread_id: String,
    pub target_title: String,
    pub target_provider: ProviderId,
    pub edge_type: String,
    pub weight: i64,
    pub evidence: Value,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermOccurrenceHit {
    pub id: i64,
    pub lexicon_id: i64,
    pub term: String,
    pub normalized_term: String,
    pub provider_id: ProviderId,
    pub thread_id: String,
    pub thread_title: String,
    pub turn_id: String,
    pub turn_index: i64,
    pub role: TurnRole,
    pub position: i64,
    pub context_before: String,
    pub context_after: String,
}

// ============ Defensive JSON decoding ============

/// Decode a stored JSON object; anything malformed or non-object is `{}`.
pub fn json_object_or_empty(raw: Option<&str>) -> Value {
    match raw.and_then(|s| serde_json::from_str::<Value>(s).ok()) {
        Some(v @ Value::Object(_)) => v,
        _ => empty_object(),
    }
}

/// Decode a stored JSON array; anything malformed or non-array is `[]`.
pub fn json_array_or_empty(raw: Option<&str>) -> Value {
    match raw.and_then(|s| serde_json::from_str::<Value>(s).ok()) {
        Some(v @ Value::Array(_)) => v,
        _ => Value::Array(Vec::new()),
    }
}

/// String elements of a stored JSON array, skipping non-strings.
pub fn json_string_list(raw: Option<&str>) -> Vec<String> {
    match json_array_or_empty(raw) {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
