//! Recall & indexing subsystem for the mnemo sidecar.
//!
//! Bridges a chat gateway to a SiYuan note store: keeps a local FTS mirror in
//! sync, gates prompts, runs multi-path retrieval with two-stage re-ranking,
//! resolves inline note links, and renders a budgeted context block.

pub mod client;
pub mod context;
pub mod errors;
pub mod intent;
pub mod linked;
pub mod markdown;
pub mod models;
pub mod retrieval;
pub mod sync;

pub use client::{BlockInfo, BlockKramdown, CreatedId, SiyuanClient};
pub use context::{CONTEXT_CLOSE_MARKER, CONTEXT_OPEN_MARKER, format_context};
pub use errors::{RecallError, RecallResult};
pub use intent::{Analysis, IntentAnalyzer};
pub use linked::{LinkedDocResolver, merge_linked_docs};
pub use models::{
    Block, BlockSource, GateDecision, HealthStatus, Intent, IntentType, KeywordCoverage,
    Notebook, RecalledDoc, RetrievedContext, TimeRange,
};
pub use retrieval::RetrievalEngine;
pub use sync::{SyncReport, SyncService};
