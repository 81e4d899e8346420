//! Gateway event shapes consumed and produced by the sidecar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mnemo_recall::RecalledDoc;

/// Payload of `before_agent_start`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptEvent {
    #[serde(default)]
    pub prompt: String,
    /// Opaque gateway context, passed through untouched.
    #[serde(default)]
    pub context: Value,
}

/// Payload of `agent_end`. Consumed by the (external) conversation writer;
/// the sidecar only acknowledges it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentEndEvent {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub context: Value,
}

/// What `before_agent_start` hands back to the gateway.
///
/// The hook never fails; an internal error collapses into the default value.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallOutcome {
    /// Context block to prepend to the agent prompt; empty means none.
    pub prepend_context: String,
    pub recalled_docs: Vec<RecalledDoc>,
    pub skipped: bool,
    pub reason: String,
}

impl RecallOutcome {
    pub fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            reason: reason.to_string(),
            ..Self::default()
        }
    }
}
