//! Gateway event hooks.
//!
//! Handlers never throw into the gateway: any internal failure collapses
//! into an empty outcome.

use tracing::{debug, info};

use mnemo_recall::{format_context, merge_linked_docs, RecalledDoc, RetrievedContext};

use crate::events::{AgentEndEvent, PromptEvent, RecallOutcome};
use crate::state::Sidecar;

impl Sidecar {
    /// Recall entrypoint: analyze the prompt, run retrieval and linked-doc
    /// resolution, and return a context block to prepend.
    pub async fn before_agent_start(&self, event: &PromptEvent) -> RecallOutcome {
        self.ensure_initialized().await;
        self.handle_prompt(&event.prompt).await
    }

    /// Write entrypoint placeholder; conversation routing lives in the
    /// writer plugin.
    pub async fn agent_end(&self, event: &AgentEndEvent) {
        debug!(
            success = event.success,
            channel = %event.channel,
            "agent_end acknowledged"
        );
    }

    /// Session reset; nothing to clear yet.
    pub async fn on_new_session(&self) {
        debug!("session reset acknowledged");
    }

    async fn handle_prompt(&self, prompt: &str) -> RecallOutcome {
        let recall_enabled = self.inner.config.settings.recall.enabled;
        let linked_enabled = self.inner.linked.enabled();
        if !recall_enabled && !linked_enabled {
            return RecallOutcome::skipped("disabled");
        }

        let linked_ids = if linked_enabled {
            self.inner.linked.extract_ids(prompt)
        } else {
            Vec::new()
        };

        let analysis = self.inner.analyzer.analyze(prompt, !linked_ids.is_empty());
        if !analysis.decision.should {
            debug!(reason = %analysis.decision.reason, "recall gated off");
            return RecallOutcome::skipped(&analysis.decision.reason);
        }
        let intent = analysis.intent;
        let reason = analysis.decision.reason;

        // Remote needed for linked docs and for the remote search paths; the
        // local FTS path survives an unreachable store.
        let needs_remote = !linked_ids.is_empty()
            || self
                .inner
                .config
                .settings
                .recall
                .search_paths
                .iter()
                .any(|path| path == "fulltext" || path == "sql");
        let remote_ok = if needs_remote {
            self.ensure_remote().await
        } else {
            false
        };

        let linked_fut = async {
            if linked_ids.is_empty() || !remote_ok {
                Vec::new()
            } else {
                self.inner.linked.resolve(prompt).await
            }
        };

        let search_fut = async {
            if recall_enabled {
                self.inner.engine.retrieve(&intent, remote_ok).await
            } else {
                RetrievedContext::default()
            }
        };

        let (linked_docs, retrieved) = tokio::join!(linked_fut, search_fut);

        if let Some(error) = &retrieved.error {
            if linked_docs.is_empty() {
                debug!("recall found nothing: {error}");
            }
        }

        let docs: Vec<RecalledDoc> = merge_linked_docs(linked_docs, retrieved.docs);
        if docs.is_empty() {
            return RecallOutcome {
                reason,
                ..RecallOutcome::default()
            };
        }

        let prepend_context = format_context(&docs, &self.inner.config.settings.recall);
        if prepend_context.is_empty() {
            return RecallOutcome {
                reason,
                ..RecallOutcome::default()
            };
        }

        info!(
            docs = docs.len(),
            chars = prepend_context.chars().count(),
            reason = %reason,
            "recalled context attached"
        );

        RecallOutcome {
            prepend_context,
            recalled_docs: docs,
            skipped: false,
            reason,
        }
    }
}
