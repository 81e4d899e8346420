//! Index synchronization against the remote note store.
//!
//! Initial sync walks every non-excluded notebook page by page; incremental
//! sync re-materializes only documents whose blocks changed since the last
//! stamp. The stamp for an incremental run is sampled before the remote
//! query and persisted only on success, so an interrupted run retries the
//! same window (at-least-once).

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use mnemo_core::IndexSettings;
use mnemo_db::{IndexStore, IndexedDocument, SectionRecord};

use crate::client::SiyuanClient;
use crate::errors::{RecallError, RecallResult};
use crate::markdown::{dedup_lines, sanitize_kramdown, split_sections};
use crate::models::{compact_timestamp, parse_updated};

/// Counters from one sync run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.deleted += other.deleted;
    }
}

/// Document row as returned by the store's SQL endpoint (`type = 'd'` rows
/// carry the title in `content`).
#[derive(Debug, Clone, Deserialize)]
struct DocRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    hpath: String,
    #[serde(default, rename = "box")]
    box_id: String,
    #[serde(default)]
    updated: String,
    #[serde(default)]
    tag: String,
}

#[derive(Debug, Default)]
struct NotebookCache {
    excluded_ids: HashSet<String>,
    names_by_id: HashMap<String, String>,
}

/// Keeps the local index in step with the remote store.
pub struct SyncService {
    client: Arc<SiyuanClient>,
    store: Arc<IndexStore>,
    settings: IndexSettings,
    notebooks: RwLock<NotebookCache>,
}

impl SyncService {
    pub fn new(
        client: Arc<SiyuanClient>,
        store: Arc<IndexStore>,
        settings: IndexSettings,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            notebooks: RwLock::new(NotebookCache::default()),
        }
    }

    /// Re-read the notebook list and recompute the excluded-id set; also
    /// purges local rows of any notebook that became excluded.
    pub async fn refresh_notebooks(&self) -> RecallResult<()> {
        let notebooks = self.client.ls_notebooks().await?;
        let excluded_names = self.store.excluded_names();

        let mut cache = NotebookCache::default();
        for notebook in notebooks {
            if excluded_names.contains(notebook.name.trim()) {
                cache.excluded_ids.insert(notebook.id.clone());
            }
            cache.names_by_id.insert(notebook.id, notebook.name);
        }
        *self.notebooks.write().await = cache;

        let purged = self.store.purge_excluded_notebooks().await?;
        if purged > 0 {
            info!(purged, "removed documents of newly excluded notebooks");
        }
        Ok(())
    }

    /// Run whichever sync mode applies: initial when no stamp exists yet,
    /// incremental otherwise. Old soft-deleted rows are hard-removed on the
    /// way out.
    pub async fn sync_once(&self) -> RecallResult<SyncReport> {
        let report = if self.store.last_sync_time().await?.is_none() {
            self.initial_sync().await?
        } else {
            self.incremental_sync().await?
        };

        let removed = self
            .store
            .cleanup_old_deleted(self.settings.cleanup_age_days)
            .await?;
        if removed > 0 {
            info!(removed, "cleaned up old deleted documents");
        }

        Ok(report)
    }

    /// Full walk of every non-excluded notebook.
    pub async fn initial_sync(&self) -> RecallResult<SyncReport> {
        self.refresh_notebooks().await?;

        let notebooks: Vec<(String, String)> = {
            let cache = self.notebooks.read().await;
            cache
                .names_by_id
                .iter()
                .filter(|(id, _)| !cache.excluded_ids.contains(*id))
                .map(|(id, name)| (id.clone(), name.clone()))
                .collect()
        };

        let mut report = SyncReport::default();
        for (notebook_id, notebook_name) in notebooks {
            debug!(notebook = %notebook_name, "initial sync: walking notebook");
            report.absorb(self.sync_notebook(&notebook_id).await?);
        }

        self.store
            .update_sync_time(&Utc::now().to_rfc3339())
            .await?;
        info!(
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            "initial sync complete"
        );
        Ok(report)
    }

    async fn sync_notebook(&self, notebook_id: &str) -> RecallResult<SyncReport> {
        let mut report = SyncReport::default();
        let page_size = self.settings.sql_page_size;
        let mut offset = 0usize;

        loop {
            let stmt = format!(
                "SELECT id, content, hpath, box, updated, tag FROM blocks \
                 WHERE type = 'd' AND box = '{}' \
                 ORDER BY updated DESC LIMIT {} OFFSET {}",
                sql_quote(notebook_id),
                page_size,
                offset
            );
            let rows = self.client.sql(&stmt).await?;
            let row_count = rows.len();

            let page: Vec<DocRow> = rows
                .into_iter()
                .filter_map(|row| serde_json::from_value(row).ok())
                .filter(|row: &DocRow| !row.id.is_empty())
                .collect();

            report.absorb(self.materialize_and_write(page).await?);

            if row_count < page_size {
                break;
            }
            offset += page_size;
        }

        Ok(report)
    }

    /// Pull changes newer than the last stamp.
    pub async fn incremental_sync(&self) -> RecallResult<SyncReport> {
        // Sampled before the remote query; persisted only on success.
        let sync_start = Utc::now();

        if let Err(err) = self.refresh_notebooks().await {
            warn!("notebook refresh failed, using cached set: {err}");
        }

        let last = self
            .store
            .last_sync_time()
            .await?
            .and_then(|iso| parse_updated(&iso))
            .map(|dt| compact_timestamp(&dt))
            .unwrap_or_else(|| "19700101000000".to_string());

        let stmt = format!(
            "SELECT DISTINCT root_id FROM blocks WHERE updated > '{}' AND root_id != ''",
            sql_quote(&last)
        );
        let rows = self.client.sql(&stmt).await?;
        let doc_ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("root_id").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect();

        if doc_ids.is_empty() {
            self.store.update_sync_time(&sync_start.to_rfc3339()).await?;
            return Ok(SyncReport::default());
        }
        debug!(changed = doc_ids.len(), "incremental sync: changed documents");

        let excluded_ids = self.notebooks.read().await.excluded_ids.clone();

        let mut report = SyncReport::default();
        let mut to_materialize: Vec<DocRow> = Vec::new();
        for doc_id in &doc_ids {
            let stmt = format!(
                "SELECT id, content, hpath, box, updated, tag FROM blocks \
                 WHERE id = '{}' AND type = 'd' LIMIT 1",
                sql_quote(doc_id)
            );
            // One failed doc never aborts the batch.
            let rows = match self.client.sql(&stmt).await {
                Ok(rows) => rows,
                Err(err) => {
                    report.failed += 1;
                    warn!(doc_id = %doc_id, "deletion check failed: {err}");
                    continue;
                }
            };
            let Some(row) = rows
                .into_iter()
                .filter_map(|row| serde_json::from_value::<DocRow>(row).ok())
                .next()
            else {
                // The document is gone from the remote store.
                match self.store.mark_deleted(doc_id).await {
                    Ok(()) => report.deleted += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(doc_id = %doc_id, "failed to mark document deleted: {err}");
                    }
                }
                continue;
            };

            if excluded_ids.contains(&row.box_id) {
                report.skipped += 1;
                continue;
            }
            to_materialize.push(row);
        }

        report.absorb(self.materialize_and_write(to_materialize).await?);

        self.store.update_sync_time(&sync_start.to_rfc3339()).await?;
        info!(
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            deleted = report.deleted,
            "incremental sync complete"
        );
        Ok(report)
    }

    /// Fetch markdown for a batch of doc rows under the concurrency cap and
    /// write the batch in one transaction. One failed doc never aborts the
    /// batch.
    async fn materialize_and_write(&self, rows: Vec<DocRow>) -> RecallResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut docs: Vec<IndexedDocument> = Vec::new();

        let concurrency = self.settings.max_concurrent_fetches.max(1);
        for chunk in rows.chunks(concurrency) {
            let results = join_all(chunk.iter().map(|row| self.materialize_doc(row))).await;
            for (row, result) in chunk.iter().zip(results) {
                match result {
                    Ok(doc) => docs.push(doc),
                    Err(err) => {
                        report.failed += 1;
                        warn!(doc_id = %row.id, "failed to materialize document: {err}");
                    }
                }
            }
        }

        let write = self.store.sync_documents(&docs).await?;
        report.synced += write.indexed;
        report.skipped += write.skipped;
        Ok(report)
    }

    /// Fetch and prepare one document: sanitize kramdown, build the deduped
    /// doc-level content, and split sections.
    async fn materialize_doc(&self, row: &DocRow) -> RecallResult<IndexedDocument> {
        let kramdown = self.fetch_kramdown_with_retry(&row.id).await?;
        let markdown = sanitize_kramdown(&kramdown);

        let content = if self.settings.doc_content_dedup_lines {
            dedup_lines(&markdown, self.settings.doc_content_dedup_window_size)
        } else {
            markdown.clone()
        };

        let section_window = if self.settings.section_dedup_lines {
            self.settings.section_dedup_window_size
        } else {
            0
        };
        let sections = split_sections(
            &markdown,
            &self.settings.section_heading_levels,
            self.settings.max_sections_to_index,
            self.settings.section_max_chars,
            section_window,
        )
        .into_iter()
        .map(|section| SectionRecord {
            block_id: format!("{}::h{}::{}", row.id, section.level, section.line_index),
            content: section.content,
        })
        .collect();

        let notebook_name = self
            .notebooks
            .read()
            .await
            .names_by_id
            .get(&row.box_id)
            .cloned();

        let updated_at = parse_updated(&row.updated)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| row.updated.clone());

        Ok(IndexedDocument {
            doc_id: row.id.clone(),
            title: row.content.clone(),
            hpath: row.hpath.clone(),
            notebook_id: Some(row.box_id.clone()),
            notebook_name,
            updated_at,
            tags: parse_tags(&row.tag),
            content,
            sections,
        })
    }

    /// One retry with a small deterministic jitter keeps a flaky store from
    /// failing whole batches.
    async fn fetch_kramdown_with_retry(&self, id: &str) -> RecallResult<String> {
        match self.client.get_block_kramdown(id).await {
            Ok(payload) => Ok(payload.kramdown),
            Err(RecallError::NotFound(id)) => Err(RecallError::NotFound(id)),
            Err(first) => {
                let jitter = backoff_jitter_ms(id);
                debug!(id, jitter, "kramdown fetch failed, retrying: {first}");
                tokio::time::sleep(Duration::from_millis(200 + jitter)).await;
                Ok(self.client.get_block_kramdown(id).await?.kramdown)
            }
        }
    }
}

fn backoff_jitter_ms(id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish() % 300
}

fn sql_quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Tag column format: `#a# #b#`.
fn parse_tags(tag: &str) -> Vec<String> {
    tag.split('#')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
