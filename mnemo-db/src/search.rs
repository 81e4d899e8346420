//! Full-text reads over the local index.

use crate::error::DbResult;
use crate::registry::IndexStore;

/// One FTS hit joined with its registry row.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub block_id: String,
    pub doc_id: String,
    pub content: String,
    pub title: String,
    pub hpath: String,
    pub updated_at: String,
    /// FTS5 bm25 rank; smaller is better.
    pub rank: f64,
}

impl IndexStore {
    /// FTS MATCH joined to the registry; soft-deleted docs are invisible.
    pub async fn search(&self, query: &str, limit: usize) -> DbResult<Vec<FtsHit>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String, f64)>(
            r#"SELECT block_fts.block_id, block_fts.doc_id, block_fts.content,
                      doc_registry.title, doc_registry.hpath, doc_registry.updated_at,
                      bm25(block_fts) AS rank
               FROM block_fts
               JOIN doc_registry ON doc_registry.doc_id = block_fts.doc_id
               WHERE block_fts MATCH ? AND doc_registry.deleted = 0
               ORDER BY rank ASC
               LIMIT ?"#,
        )
        .bind(query)
        .bind(limit as i64)
        .fetch_all(self.db().pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(block_id, doc_id, content, title, hpath, updated_at, rank)| FtsHit {
                    block_id,
                    doc_id,
                    content,
                    title,
                    hpath,
                    updated_at,
                    rank,
                },
            )
            .collect())
    }
}
