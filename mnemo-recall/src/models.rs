//! Shared data shapes for the recall pipeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which path produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    Fts,
    Fulltext,
    Sql,
    LinkedDoc,
}

impl BlockSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSource::Fts => "fts",
            BlockSource::Fulltext => "fulltext",
            BlockSource::Sql => "sql",
            BlockSource::LinkedDoc => "linked_doc",
        }
    }

    /// Base score weight per source.
    pub fn base_weight(&self) -> f64 {
        match self {
            BlockSource::Fts => 1.0,
            BlockSource::Fulltext => 0.9,
            BlockSource::Sql => 0.75,
            BlockSource::LinkedDoc => 1.0,
        }
    }
}

/// The unit returned by any search path, normalized across path vocabularies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    /// Owning document id.
    pub root_id: String,
    pub hpath: String,
    pub content: String,
    pub updated_at: String,
    pub source: BlockSource,
    pub score: f64,
    /// Native FTS rank when the block came from the local index
    /// (smaller is better).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,
}

/// Raw block row from the remote API or local index, before normalization.
///
/// Remote responses spell the same fields several ways across versions;
/// aliases coalesce them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBlock {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "root_id", alias = "rootID", alias = "docID", alias = "docId")]
    pub root_id: Option<String>,
    #[serde(default, alias = "hPath", alias = "h_path")]
    pub hpath: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "updated_at", alias = "updatedAt")]
    pub updated: Option<String>,
    #[serde(default)]
    pub rank: Option<f64>,
}

impl RemoteBlock {
    /// Coalesce into the common block shape.
    pub fn into_block(self, source: BlockSource) -> Option<Block> {
        if self.id.is_empty() {
            return None;
        }
        let root_id = self
            .root_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.id.clone());
        Some(Block {
            id: self.id,
            root_id,
            hpath: self.hpath.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            updated_at: self.updated.unwrap_or_default(),
            source,
            score: 0.0,
            rank: self.rank,
        })
    }
}

/// Keyword coverage of a recalled document.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordCoverage {
    pub matched_count: usize,
    pub matched_keywords: Vec<String>,
}

/// One document surfaced by recall, with its contributing blocks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalledDoc {
    pub doc_id: String,
    pub title: String,
    pub hpath: String,
    pub updated_at: String,
    pub score: f64,
    pub source: BlockSource,
    /// Full markdown for linked docs; search-path docs carry blocks instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    pub blocks: Vec<Block>,
    pub coverage: KeywordCoverage,
}

/// Search-path retrieval output.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub docs: Vec<RecalledDoc>,
    /// Set when every path failed and nothing was found.
    pub error: Option<String>,
}

/// Notebook descriptor from the note store.
#[derive(Debug, Clone, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
}

/// Health probe result; never an error.
#[derive(Debug, Clone, Default)]
pub struct HealthStatus {
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Gate decision for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub should: bool,
    pub reason: String,
}

impl GateDecision {
    pub fn go(reason: &str) -> Self {
        Self {
            should: true,
            reason: reason.to_string(),
        }
    }

    pub fn skip(reason: &str) -> Self {
        Self {
            should: false,
            reason: reason.to_string(),
        }
    }
}

/// Coarse prompt intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentType {
    Chat,
    Command,
    Review,
    Search,
    Query,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Chat => "chat",
            IntentType::Command => "command",
            IntentType::Review => "review",
            IntentType::Search => "search",
            IntentType::Query => "query",
        }
    }
}

/// Detected time window for the SQL path.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub days: i64,
    pub since: DateTime<Utc>,
}

/// Analyzed prompt intent.
#[derive(Debug, Clone)]
pub struct Intent {
    /// Normalized query (force phrase stripped, punctuation removed).
    pub query: String,
    pub keywords: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub intent_type: IntentType,
    /// True when an explicit force phrase was present.
    pub forced: bool,
}

impl Intent {
    pub fn cjk_keyword_count(&self) -> usize {
        self.keywords.iter().filter(|k| contains_cjk(k)).count()
    }
}

/// Whether a string contains any CJK ideograph.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

pub fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{F900}'..='\u{FAFF}'
    )
}

/// Parse a note-store timestamp: RFC-3339 or the compact `YYYYMMDDHHMMSS`
/// form used by block rows.
pub fn parse_updated(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a timestamp in the note store's compact form.
pub fn compact_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S").to_string()
}
