//! Shared configuration for the mnemo sidecar.

pub mod config;

pub use config::{
    Config, ConfigError, FulltextOptions, IndexSettings, LinkedDocSettings, RecallSettings,
    Settings, SiyuanSettings, TwoStageSettings,
};
