//! Settings structs shared between the TOML file and the gateway overlay.
//!
//! Keys are camelCase on the wire because the gateway hands its plugin
//! config over as JSON; the TOML file uses the same spelling so one set of
//! structs covers both sources.

use serde::{Deserialize, Serialize};

/// Root settings for the sidecar.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Note-store connection settings.
    #[serde(default)]
    pub siyuan: SiyuanSettings,

    /// Local index & sync settings.
    #[serde(default)]
    pub index: IndexSettings,

    /// Recall (retrieval) settings.
    #[serde(default)]
    pub recall: RecallSettings,

    /// Linked-doc resolution settings. Also accepted under `recall.linkedDoc`
    /// for older config files; `Config::load` folds that spelling in here.
    #[serde(default)]
    pub linked_doc: Option<LinkedDocSettings>,
}

/// Connection settings for the SiYuan HTTP API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiyuanSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token. Usually supplied via `SIYUAN_API_TOKEN`.
    #[serde(default)]
    pub api_token: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Local index & sync settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Notebook names never mirrored into the local index.
    #[serde(default)]
    pub skip_notebook_names: Vec<String>,

    /// Convenience aliases merged into `skip_notebook_names`.
    #[serde(default)]
    pub privacy_notebook: Option<String>,
    #[serde(default)]
    pub archive_notebook: Option<String>,

    /// Heading levels that begin a section (1..=6).
    #[serde(default = "default_section_heading_levels")]
    pub section_heading_levels: Vec<u8>,

    #[serde(default = "default_max_sections_to_index")]
    pub max_sections_to_index: usize,

    #[serde(default = "default_section_max_chars")]
    pub section_max_chars: usize,

    #[serde(default = "default_true")]
    pub section_dedup_lines: bool,

    #[serde(default = "default_section_dedup_window")]
    pub section_dedup_window_size: usize,

    #[serde(default = "default_true")]
    pub doc_content_dedup_lines: bool,

    #[serde(default = "default_doc_dedup_window")]
    pub doc_content_dedup_window_size: usize,

    #[serde(default = "default_sql_page_size")]
    pub sql_page_size: usize,

    /// Concurrency cap on per-doc markdown fetches during sync.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Soft-deleted rows older than this are hard-removed by cleanup.
    #[serde(default = "default_cleanup_age_days")]
    pub cleanup_age_days: i64,
}

/// Recall settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_min_prompt_length")]
    pub min_prompt_length: usize,

    /// Context budget; approximated as `maxContextTokens * 4` characters.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_max_docs")]
    pub max_docs: usize,

    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,

    /// Enabled search paths; any subset of `fts`, `fulltext`, `sql`.
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<String>,

    /// Keywords that trigger topic narrowing when present in the query.
    #[serde(default)]
    pub topic_keywords: Vec<String>,

    /// Intent types that skip recall entirely.
    #[serde(default = "default_skip_intent_types")]
    pub skip_intent_types: Vec<String>,

    #[serde(default = "default_block_excerpt_max_chars")]
    pub block_excerpt_max_chars: usize,

    #[serde(default)]
    pub two_stage: TwoStageSettings,

    /// Legacy location for linked-doc settings.
    #[serde(default)]
    pub linked_doc: Option<LinkedDocSettings>,
}

/// Two-stage retrieval tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoStageSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_candidate_limit_per_path")]
    pub candidate_limit_per_path: usize,

    #[serde(default = "default_final_block_limit")]
    pub final_block_limit: usize,

    #[serde(default = "default_per_doc_block_cap")]
    pub per_doc_block_cap: usize,

    #[serde(default)]
    pub fulltext_options: FulltextOptions,
}

/// Pass-through options for the remote full-text endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulltextOptions {
    #[serde(default)]
    pub sort: Option<i64>,
    #[serde(default)]
    pub method: Option<i64>,
}

/// Linked-doc resolution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedDocSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Substring allowlist matched case-insensitively against URL host/href.
    /// Empty means every URL (and bare ids) are accepted.
    #[serde(default)]
    pub host_keywords: Vec<String>,

    #[serde(default = "default_linked_doc_max_count")]
    pub max_count: usize,
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "http://127.0.0.1:6806".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_db_path() -> String {
    "data/recall-index.db".to_string()
}

fn default_sync_interval_ms() -> u64 {
    300_000
}

fn default_section_heading_levels() -> Vec<u8> {
    vec![2]
}

fn default_max_sections_to_index() -> usize {
    50
}

fn default_section_max_chars() -> usize {
    1200
}

fn default_section_dedup_window() -> usize {
    200
}

fn default_doc_dedup_window() -> usize {
    400
}

fn default_sql_page_size() -> usize {
    200
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_cleanup_age_days() -> i64 {
    30
}

fn default_min_prompt_length() -> usize {
    6
}

fn default_max_context_tokens() -> usize {
    2000
}

fn default_max_docs() -> usize {
    5
}

fn default_max_keywords() -> usize {
    12
}

fn default_search_paths() -> Vec<String> {
    vec!["fts".to_string(), "fulltext".to_string(), "sql".to_string()]
}

fn default_skip_intent_types() -> Vec<String> {
    vec!["chat".to_string(), "command".to_string()]
}

fn default_block_excerpt_max_chars() -> usize {
    540
}

fn default_candidate_limit_per_path() -> usize {
    100
}

fn default_final_block_limit() -> usize {
    40
}

fn default_per_doc_block_cap() -> usize {
    6
}

fn default_linked_doc_max_count() -> usize {
    3
}

impl Default for SiyuanSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_token: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            sync_interval_ms: default_sync_interval_ms(),
            skip_notebook_names: Vec::new(),
            privacy_notebook: None,
            archive_notebook: None,
            section_heading_levels: default_section_heading_levels(),
            max_sections_to_index: default_max_sections_to_index(),
            section_max_chars: default_section_max_chars(),
            section_dedup_lines: true,
            section_dedup_window_size: default_section_dedup_window(),
            doc_content_dedup_lines: true,
            doc_content_dedup_window_size: default_doc_dedup_window(),
            sql_page_size: default_sql_page_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            cleanup_age_days: default_cleanup_age_days(),
        }
    }
}

impl Default for RecallSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_prompt_length: default_min_prompt_length(),
            max_context_tokens: default_max_context_tokens(),
            max_docs: default_max_docs(),
            max_keywords: default_max_keywords(),
            search_paths: default_search_paths(),
            topic_keywords: Vec::new(),
            skip_intent_types: default_skip_intent_types(),
            block_excerpt_max_chars: default_block_excerpt_max_chars(),
            two_stage: TwoStageSettings::default(),
            linked_doc: None,
        }
    }
}

impl Default for TwoStageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            candidate_limit_per_path: default_candidate_limit_per_path(),
            final_block_limit: default_final_block_limit(),
            per_doc_block_cap: default_per_doc_block_cap(),
            fulltext_options: FulltextOptions::default(),
        }
    }
}

impl Default for LinkedDocSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host_keywords: Vec::new(),
            max_count: default_linked_doc_max_count(),
        }
    }
}

impl IndexSettings {
    /// All excluded notebook names, aliases folded in.
    pub fn excluded_notebook_names(&self) -> Vec<String> {
        let mut names = self.skip_notebook_names.clone();
        if let Some(privacy) = &self.privacy_notebook {
            names.push(privacy.clone());
        }
        if let Some(archive) = &self.archive_notebook {
            names.push(archive.clone());
        }
        names.retain(|name| !name.trim().is_empty());
        names.dedup();
        names
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
