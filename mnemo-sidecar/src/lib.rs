//! Chat-gateway sidecar wiring for mnemo.
//!
//! Exposes the gateway hook surface (`before_agent_start`, `agent_end`,
//! session reset) over the recall subsystem, plus the process lifecycle:
//! background initialization, periodic sync, reconnect policy, shutdown.

mod events;
mod hooks;
mod state;

pub use events::{AgentEndEvent, PromptEvent, RecallOutcome};
pub use state::{Sidecar, SidecarError};

/// Install a tracing subscriber for standalone runs. Hosts that already
/// initialize tracing can skip this; a second call is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
