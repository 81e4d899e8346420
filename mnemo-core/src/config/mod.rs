//! Configuration management for the mnemo sidecar.
//!
//! Settings merge from four sources, later sources winning:
//! 1. Built-in defaults
//! 2. TOML file (camelCase keys, same shape as the gateway overlay)
//! 3. Gateway overlay (the JSON blob the gateway hands to its plugins)
//! 4. Environment (`SIYUAN_API_URL`, `SIYUAN_API_TOKEN`)

mod settings;

use std::fs;
use std::path::Path;

pub use settings::{
    FulltextOptions, IndexSettings, LinkedDocSettings, RecallSettings, Settings, SiyuanSettings,
    TwoStageSettings,
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("gateway overlay is not valid settings: {0}")]
    Overlay(#[from] serde_json::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Merged, validated configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: Settings,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// `file` is optional; a missing path falls through to defaults.
    /// `gateway_overlay` is the plugin-config JSON from the gateway, if any.
    pub fn load(
        file: Option<&Path>,
        gateway_overlay: Option<&serde_json::Value>,
    ) -> Result<Self, ConfigError> {
        let mut settings = match file {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path)?;
                Settings::from_toml(&content)?
            }
            _ => Settings::default(),
        };

        if let Some(overlay) = gateway_overlay {
            settings = apply_overlay(settings, overlay)?;
        }

        apply_env(&mut settings);
        fold_linked_doc(&mut settings);

        let config = Self { settings };
        config.validate()?;
        Ok(config)
    }

    /// Build directly from settings (gateway-only deployments, tests).
    pub fn from_settings(mut settings: Settings) -> Result<Self, ConfigError> {
        apply_env(&mut settings);
        fold_linked_doc(&mut settings);
        let config = Self { settings };
        config.validate()?;
        Ok(config)
    }

    /// Effective linked-doc settings after the legacy-location fold.
    pub fn linked_doc(&self) -> LinkedDocSettings {
        self.settings.linked_doc.clone().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for level in &self.settings.index.section_heading_levels {
            if !(1..=6).contains(level) {
                return Err(ConfigError::Invalid {
                    key: "index.sectionHeadingLevels",
                    reason: format!("heading level {level} outside 1..=6"),
                });
            }
        }
        if self.settings.index.sql_page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "index.sqlPageSize",
                reason: "must be positive".to_string(),
            });
        }
        if self.settings.index.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid {
                key: "index.maxConcurrentFetches",
                reason: "must be positive".to_string(),
            });
        }
        if self.settings.recall.max_docs == 0 {
            return Err(ConfigError::Invalid {
                key: "recall.maxDocs",
                reason: "must be positive".to_string(),
            });
        }
        for path in &self.settings.recall.search_paths {
            if !matches!(path.as_str(), "fts" | "fulltext" | "sql") {
                return Err(ConfigError::Invalid {
                    key: "recall.searchPaths",
                    reason: format!("unknown search path '{path}'"),
                });
            }
        }
        Ok(())
    }
}

/// Deep-merge the gateway overlay onto the current settings.
fn apply_overlay(settings: Settings, overlay: &serde_json::Value) -> Result<Settings, ConfigError> {
    let mut base = serde_json::to_value(&settings)?;
    merge_value(&mut base, overlay);
    Ok(serde_json::from_value(base)?)
}

fn merge_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_value(slot, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn apply_env(settings: &mut Settings) {
    if let Ok(url) = std::env::var("SIYUAN_API_URL") {
        if !url.trim().is_empty() {
            settings.siyuan.api_url = url;
        }
    }
    if let Ok(token) = std::env::var("SIYUAN_API_TOKEN") {
        if !token.trim().is_empty() {
            settings.siyuan.api_token = token;
        }
    }
}

/// `recall.linkedDoc` is the legacy spelling; top-level wins when both exist.
fn fold_linked_doc(settings: &mut Settings) {
    if settings.linked_doc.is_none() {
        settings.linked_doc = settings.recall.linked_doc.take();
    }
}

/// Load a .env file if present (development convenience).
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    // Env-mutating tests must not interleave.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        unsafe {
            std::env::remove_var("SIYUAN_API_URL");
            std::env::remove_var("SIYUAN_API_TOKEN");
        }
    }

    #[test]
    fn overlay_wins_over_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let overlay = json!({
            "recall": {"maxDocs": 3, "twoStage": {"finalBlockLimit": 10}},
            "index": {"skipNotebookNames": ["Private"]}
        });
        let config = Config::load(None, Some(&overlay)).unwrap();
        assert_eq!(config.settings.recall.max_docs, 3);
        assert_eq!(config.settings.recall.two_stage.final_block_limit, 10);
        // Sibling keys keep defaults.
        assert_eq!(config.settings.recall.two_stage.per_doc_block_cap, 6);
        assert_eq!(config.settings.index.skip_notebook_names, vec!["Private"]);
    }

    #[test]
    fn env_wins_over_overlay() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var("SIYUAN_API_URL", "http://env:6806");
            std::env::set_var("SIYUAN_API_TOKEN", "env-token");
        }

        let overlay = json!({"siyuan": {"apiUrl": "http://overlay:6806", "apiToken": "o"}});
        let config = Config::load(None, Some(&overlay)).unwrap();
        assert_eq!(config.settings.siyuan.api_url, "http://env:6806");
        assert_eq!(config.settings.siyuan.api_token, "env-token");

        clear_env();
    }

    #[test]
    fn legacy_linked_doc_location_folds_up() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let overlay = json!({
            "recall": {"linkedDoc": {"maxCount": 1, "hostKeywords": ["note.local"]}}
        });
        let config = Config::load(None, Some(&overlay)).unwrap();
        let linked = config.linked_doc();
        assert_eq!(linked.max_count, 1);
        assert_eq!(linked.host_keywords, vec!["note.local"]);
    }

    #[test]
    fn invalid_heading_level_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let overlay = json!({"index": {"sectionHeadingLevels": [0]}});
        let err = Config::load(None, Some(&overlay)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unknown_search_path_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let overlay = json!({"recall": {"searchPaths": ["vector"]}});
        assert!(Config::load(None, Some(&overlay)).is_err());
    }
}
