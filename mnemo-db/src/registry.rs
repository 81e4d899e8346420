//! Document registry writes: indexing, soft delete, cleanup, sync bookkeeping.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::db::IndexDb;
use crate::error::DbResult;

/// A fully materialized document ready for indexing.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub doc_id: String,
    pub title: String,
    pub hpath: String,
    pub notebook_id: Option<String>,
    pub notebook_name: Option<String>,
    pub updated_at: String,
    pub tags: Vec<String>,
    /// Dedup-compressed markdown, indexed as the doc-level FTS row.
    pub content: String,
    pub sections: Vec<SectionRecord>,
}

/// One section row for the FTS index.
#[derive(Debug, Clone)]
pub struct SectionRecord {
    /// Synthetic id: `"<docId>::h<level>::<lineIndex>"`.
    pub block_id: String,
    pub content: String,
}

/// What `index_document` did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    /// Notebook is excluded; nothing was written.
    Skipped,
}

/// Counters from a `sync_documents` batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncWriteReport {
    pub indexed: usize,
    pub skipped: usize,
}

/// Aggregate index statistics.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub total_docs: i64,
    pub total_blocks: i64,
    pub last_sync: Option<String>,
    pub db_path: String,
}

const LAST_SYNC_KEY: &str = "last_sync_time";

/// The local index store: document registry plus section-level FTS.
///
/// Caches the excluded notebook names at construction; documents from those
/// notebooks never touch either table.
#[derive(Debug, Clone)]
pub struct IndexStore {
    db: IndexDb,
    excluded_names: HashSet<String>,
}

impl IndexStore {
    pub fn new(db: IndexDb, excluded_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            db,
            excluded_names: excluded_names
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    pub fn db(&self) -> &IndexDb {
        &self.db
    }

    pub fn excluded_names(&self) -> &HashSet<String> {
        &self.excluded_names
    }

    /// Whether a document belongs to an excluded notebook.
    ///
    /// Prefers the explicit notebook name; falls back to the first hpath
    /// segment.
    pub fn is_excluded(&self, notebook_name: Option<&str>, hpath: &str) -> bool {
        let name = notebook_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| first_hpath_segment(hpath));

        match name {
            Some(name) => self.excluded_names.contains(&name),
            None => false,
        }
    }

    /// Upsert a document and rewrite its FTS rows.
    ///
    /// Re-indexing is delete-all-sections-then-insert, so the call is
    /// idempotent. Excluded notebooks are a no-op.
    pub async fn index_document(&self, doc: &IndexedDocument) -> DbResult<IndexOutcome> {
        if self.is_excluded(doc.notebook_name.as_deref(), &doc.hpath) {
            debug!(doc_id = %doc.doc_id, hpath = %doc.hpath, "skipping excluded notebook");
            return Ok(IndexOutcome::Skipped);
        }

        let mut tx = self.db.pool().begin().await?;
        write_document(&mut tx, doc).await?;
        tx.commit().await?;
        Ok(IndexOutcome::Indexed)
    }

    /// Index a batch of documents inside a single transaction.
    pub async fn sync_documents(&self, docs: &[IndexedDocument]) -> DbResult<SyncWriteReport> {
        let mut report = SyncWriteReport::default();
        let mut tx = self.db.pool().begin().await?;

        for doc in docs {
            if self.is_excluded(doc.notebook_name.as_deref(), &doc.hpath) {
                debug!(doc_id = %doc.doc_id, hpath = %doc.hpath, "skipping excluded notebook");
                report.skipped += 1;
                continue;
            }
            write_document(&mut tx, doc).await?;
            report.indexed += 1;
        }

        tx.commit().await?;
        Ok(report)
    }

    /// Soft-delete: the doc disappears from search but its rows remain until
    /// cleanup.
    pub async fn mark_deleted(&self, doc_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE doc_registry SET deleted = 1, deleted_at = ? WHERE doc_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(doc_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Hard-delete a document from both tables. Used when a notebook becomes
    /// excluded after its docs were already indexed.
    pub async fn remove_from_index(&self, doc_id: &str) -> DbResult<()> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM block_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM doc_registry WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Hard-delete every indexed doc belonging to an excluded notebook.
    ///
    /// Covers notebooks that were indexed before their name entered the
    /// exclusion set, restoring the no-traces property.
    pub async fn purge_excluded_notebooks(&self) -> DbResult<u64> {
        let mut removed = 0u64;
        for name in &self.excluded_names {
            let mut tx = self.db.pool().begin().await?;
            sqlx::query(
                "DELETE FROM block_fts WHERE doc_id IN \
                 (SELECT doc_id FROM doc_registry WHERE notebook_name = ? \
                  OR hpath LIKE '/' || ? || '/%')",
            )
            .bind(name)
            .bind(name)
            .execute(&mut *tx)
            .await?;
            removed += sqlx::query(
                "DELETE FROM doc_registry WHERE notebook_name = ? \
                 OR hpath LIKE '/' || ? || '/%'",
            )
            .bind(name)
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tx.commit().await?;
        }
        Ok(removed)
    }

    /// Hard-remove soft-deleted rows older than `days_old` days.
    pub async fn cleanup_old_deleted(&self, days_old: i64) -> DbResult<u64> {
        let cutoff = (Utc::now() - Duration::days(days_old)).to_rfc3339();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "DELETE FROM block_fts WHERE doc_id IN \
             (SELECT doc_id FROM doc_registry WHERE deleted = 1 AND deleted_at < ?)",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

        let removed = sqlx::query("DELETE FROM doc_registry WHERE deleted = 1 AND deleted_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    pub async fn stats(&self) -> DbResult<IndexStats> {
        let (total_docs,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM doc_registry WHERE deleted = 0")
                .fetch_one(self.db.pool())
                .await?;
        let (total_blocks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM block_fts")
            .fetch_one(self.db.pool())
            .await?;
        let last_sync = self.last_sync_time().await?;

        Ok(IndexStats {
            total_docs,
            total_blocks,
            last_sync,
            db_path: self.db.db_path().display().to_string(),
        })
    }

    pub async fn last_sync_time(&self) -> DbResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ? LIMIT 1")
                .bind(LAST_SYNC_KEY)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn update_sync_time(&self, iso: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO sync_metadata (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(LAST_SYNC_KEY)
        .bind(iso)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

async fn write_document(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc: &IndexedDocument,
) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();
    let tags = serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"INSERT INTO doc_registry (
            doc_id, title, hpath, notebook_id, notebook_name,
            updated_at, indexed_at, deleted, deleted_at, tags
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
        ON CONFLICT(doc_id) DO UPDATE SET
            title = excluded.title,
            hpath = excluded.hpath,
            notebook_id = excluded.notebook_id,
            notebook_name = excluded.notebook_name,
            updated_at = excluded.updated_at,
            indexed_at = excluded.indexed_at,
            deleted = 0,
            deleted_at = NULL,
            tags = excluded.tags"#,
    )
    .bind(&doc.doc_id)
    .bind(&doc.title)
    .bind(&doc.hpath)
    .bind(&doc.notebook_id)
    .bind(&doc.notebook_name)
    .bind(&doc.updated_at)
    .bind(&now)
    .bind(&tags)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM block_fts WHERE doc_id = ?")
        .bind(&doc.doc_id)
        .execute(&mut **tx)
        .await?;

    insert_fts_row(tx, &doc.doc_id, &doc.doc_id, &doc.content).await?;
    for section in &doc.sections {
        insert_fts_row(tx, &section.block_id, &doc.doc_id, &section.content).await?;
    }

    Ok(())
}

async fn insert_fts_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    block_id: &str,
    doc_id: &str,
    content: &str,
) -> DbResult<()> {
    sqlx::query("INSERT INTO block_fts (block_id, doc_id, content) VALUES (?, ?, ?)")
        .bind(block_id)
        .bind(doc_id)
        .bind(content)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn first_hpath_segment(hpath: &str) -> Option<String> {
    hpath
        .split('/')
        .map(str::trim)
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}
