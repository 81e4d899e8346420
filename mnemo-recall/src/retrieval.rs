//! Multi-path candidate recall, scoring, and document aggregation.
//!
//! Stage 1 fans out over the enabled search paths (local FTS, remote
//! full-text, remote SQL) with an all-settled join; stage 2 re-ranks the
//! merged candidates under a per-document diversity cap and aggregates them
//! into scored documents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use mnemo_core::RecallSettings;
use mnemo_db::IndexStore;

use crate::client::SiyuanClient;
use crate::errors::RecallResult;
use crate::models::{
    Block, BlockSource, Intent, KeywordCoverage, RecalledDoc, RemoteBlock, RetrievedContext,
    compact_timestamp, parse_updated,
};

/// Runs stage-1 recall and stage-2 aggregation for one query.
#[derive(Clone)]
pub struct RetrievalEngine {
    client: Arc<SiyuanClient>,
    store: Option<Arc<IndexStore>>,
    settings: RecallSettings,
}

impl RetrievalEngine {
    pub fn new(
        client: Arc<SiyuanClient>,
        store: Option<Arc<IndexStore>>,
        settings: RecallSettings,
    ) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    /// Retrieve documents for an analyzed prompt.
    ///
    /// Path failures are isolated: a failed path contributes zero candidates.
    /// When every attempted path fails and nothing was found the result still
    /// succeeds, carrying an error string instead.
    pub async fn retrieve(&self, intent: &Intent, remote_available: bool) -> RetrievedContext {
        let fts_enabled = self.path_enabled("fts") && self.store.is_some();
        let fulltext_enabled = self.path_enabled("fulltext") && remote_available;
        let sql_enabled = self.path_enabled("sql") && remote_available;

        let fts_fut = async {
            if fts_enabled {
                Some(self.fts_path(intent).await)
            } else {
                None
            }
        };
        let fulltext_fut = async {
            if fulltext_enabled {
                Some(self.fulltext_path(intent).await)
            } else {
                None
            }
        };
        let sql_fut = async {
            if sql_enabled {
                Some(self.sql_path(intent).await)
            } else {
                None
            }
        };

        let (fts_res, fulltext_res, sql_res) = tokio::join!(fts_fut, fulltext_fut, sql_fut);

        let mut candidates = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;
        for (path, result) in [
            ("fts", fts_res),
            ("fulltext", fulltext_res),
            ("sql", sql_res),
        ] {
            let Some(result) = result else { continue };
            attempted += 1;
            match result {
                Ok(blocks) => {
                    debug!(path, count = blocks.len(), "search path settled");
                    candidates.extend(blocks);
                }
                Err(err) => {
                    failed += 1;
                    warn!(path, "search path failed: {err}");
                }
            }
        }

        let query_lower = intent.query.to_lowercase();
        let keywords_lower: Vec<String> =
            intent.keywords.iter().map(|k| k.to_lowercase()).collect();

        for block in &mut candidates {
            block.score = score_block(block, &query_lower, &keywords_lower);
        }

        let deduped = dedup_by_id(candidates);
        let selected = self.two_stage_select(deduped);
        let docs = self.aggregate_docs(selected, intent);

        let error = if attempted > 0 && failed == attempted && docs.is_empty() {
            Some("No results found".to_string())
        } else {
            None
        };

        RetrievedContext { docs, error }
    }

    fn path_enabled(&self, path: &str) -> bool {
        self.settings.search_paths.iter().any(|p| p == path)
    }

    async fn fts_path(&self, intent: &Intent) -> RecallResult<Vec<Block>> {
        let store = self.store.as_ref().expect("fts path requires a store");
        let query = build_fts_query(intent);
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let hits = store
            .search(&query, self.settings.two_stage.candidate_limit_per_path)
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| Block {
                id: hit.block_id,
                root_id: hit.doc_id,
                hpath: hit.hpath,
                content: hit.content,
                updated_at: hit.updated_at,
                source: BlockSource::Fts,
                score: 0.0,
                rank: Some(hit.rank),
            })
            .collect())
    }

    async fn fulltext_path(&self, intent: &Intent) -> RecallResult<Vec<Block>> {
        let options = &self.settings.two_stage.fulltext_options;
        let blocks = self
            .client
            .search_full_text(
                &intent.query,
                1,
                self.settings.two_stage.candidate_limit_per_path,
                options.sort,
                options.method,
            )
            .await?;
        Ok(blocks
            .into_iter()
            .filter_map(|raw| raw.into_block(BlockSource::Fulltext))
            .collect())
    }

    async fn sql_path(&self, intent: &Intent) -> RecallResult<Vec<Block>> {
        let stmt = build_sql_query(
            intent,
            self.settings.two_stage.candidate_limit_per_path,
        );
        let rows = self.client.sql(&stmt).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<RemoteBlock>(row).ok())
            .filter_map(|raw| raw.into_block(BlockSource::Sql))
            .collect())
    }

    /// Stage 2: sort by score, walk under the per-doc cap, stop at the final
    /// block limit.
    fn two_stage_select(&self, mut blocks: Vec<Block>) -> Vec<Block> {
        blocks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let two_stage = &self.settings.two_stage;
        if !two_stage.enabled {
            blocks.truncate(two_stage.final_block_limit);
            return blocks;
        }

        let mut per_doc: HashMap<String, usize> = HashMap::new();
        let mut selected = Vec::with_capacity(two_stage.final_block_limit);
        for block in blocks {
            if selected.len() >= two_stage.final_block_limit {
                break;
            }
            let count = per_doc.entry(block.root_id.clone()).or_insert(0);
            if *count >= two_stage.per_doc_block_cap {
                continue;
            }
            *count += 1;
            selected.push(block);
        }
        selected
    }

    /// Group blocks into documents, score them, and apply the coverage,
    /// topic, and anchor filters.
    fn aggregate_docs(&self, blocks: Vec<Block>, intent: &Intent) -> Vec<RecalledDoc> {
        let keywords_lower: Vec<String> =
            intent.keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Block>> = HashMap::new();
        for block in blocks {
            if !groups.contains_key(&block.root_id) {
                order.push(block.root_id.clone());
            }
            groups.entry(block.root_id.clone()).or_default().push(block);
        }

        let mut docs: Vec<RecalledDoc> = Vec::new();
        for doc_id in order {
            let group = groups.remove(&doc_id).unwrap_or_default();
            // Blocks arrive globally score-sorted, so the first holder of a
            // content prefix is the highest-scored copy.
            let mut seen_prefixes: HashSet<String> = HashSet::new();
            let mut kept: Vec<Block> = Vec::new();
            for block in group {
                let prefix = content_prefix(&block.content);
                if seen_prefixes.insert(prefix) {
                    kept.push(block);
                }
            }
            if kept.is_empty() {
                continue;
            }

            let hpath = kept
                .iter()
                .map(|b| b.hpath.as_str())
                .find(|h| !h.is_empty())
                .unwrap_or_default()
                .to_string();
            let hpath_lower = hpath.to_lowercase();

            let top_scores: Vec<f64> = kept.iter().take(5).map(|b| b.score).collect();
            let avg = top_scores.iter().sum::<f64>() / top_scores.len() as f64;
            let matched_path_keywords = keywords_lower
                .iter()
                .filter(|k| hpath_lower.contains(k.as_str()))
                .count();
            let score = (1.0 - (-avg).exp()) + 0.1 * matched_path_keywords as f64;

            let mut matched_keywords = Vec::new();
            for (keyword, keyword_lower) in intent.keywords.iter().zip(&keywords_lower) {
                let in_path = hpath_lower.contains(keyword_lower.as_str());
                let in_blocks = kept
                    .iter()
                    .any(|b| b.content.to_lowercase().contains(keyword_lower.as_str()));
                if in_path || in_blocks {
                    matched_keywords.push(keyword.clone());
                }
            }

            let updated_at = kept
                .iter()
                .map(|b| b.updated_at.clone())
                .max()
                .unwrap_or_default();
            let source = kept[0].source;

            docs.push(RecalledDoc {
                doc_id,
                title: title_from_hpath(&hpath),
                hpath,
                updated_at,
                score,
                source,
                markdown: None,
                coverage: KeywordCoverage {
                    matched_count: matched_keywords.len(),
                    matched_keywords,
                },
                blocks: kept,
            });
        }

        let docs = self.apply_coverage_filter(docs, intent);
        let docs = self.apply_topic_narrowing(docs, intent);
        let docs = self.apply_anchor_narrowing(docs, intent);

        let mut docs = docs;
        docs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        docs.truncate(self.settings.max_docs);
        docs
    }

    fn apply_coverage_filter(&self, docs: Vec<RecalledDoc>, intent: &Intent) -> Vec<RecalledDoc> {
        if intent.keywords.is_empty() {
            return docs;
        }
        let required = if intent.cjk_keyword_count() >= 2 && intent.keywords.len() <= 4 {
            2
        } else {
            1
        };
        let filtered: Vec<RecalledDoc> = docs
            .iter()
            .filter(|doc| doc.coverage.matched_count >= required)
            .cloned()
            .collect();
        if filtered.is_empty() { docs } else { filtered }
    }

    fn apply_topic_narrowing(&self, docs: Vec<RecalledDoc>, intent: &Intent) -> Vec<RecalledDoc> {
        let query_lower = intent.query.to_lowercase();
        let active_topics: Vec<String> = self
            .settings
            .topic_keywords
            .iter()
            .filter(|topic| query_lower.contains(&topic.to_lowercase()))
            .map(|topic| topic.to_lowercase())
            .collect();
        if active_topics.is_empty() {
            return docs;
        }

        let narrowed: Vec<RecalledDoc> = docs
            .iter()
            .filter(|doc| {
                let hpath_lower = doc.hpath.to_lowercase();
                if active_topics.iter().any(|t| hpath_lower.contains(t.as_str())) {
                    return true;
                }
                doc.blocks.iter().any(|block| {
                    let first = first_line(&block.content);
                    first.trim_start().starts_with('#')
                        && active_topics
                            .iter()
                            .any(|t| first.to_lowercase().contains(t.as_str()))
                })
            })
            .cloned()
            .collect();
        if narrowed.is_empty() { docs } else { narrowed }
    }

    fn apply_anchor_narrowing(&self, docs: Vec<RecalledDoc>, intent: &Intent) -> Vec<RecalledDoc> {
        let topics_lower: Vec<String> = self
            .settings
            .topic_keywords
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        // Anchors: the two longest keywords that are not topic keywords.
        let mut non_topic: Vec<&String> = intent
            .keywords
            .iter()
            .filter(|k| !topics_lower.contains(&k.to_lowercase()))
            .collect();
        non_topic.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        let anchors: Vec<String> = non_topic
            .into_iter()
            .take(2)
            .map(|k| k.to_lowercase())
            .collect();
        if anchors.is_empty() {
            return docs;
        }

        let narrowed: Vec<RecalledDoc> = docs
            .iter()
            .filter(|doc| {
                doc.coverage
                    .matched_keywords
                    .iter()
                    .any(|k| anchors.contains(&k.to_lowercase()))
            })
            .cloned()
            .collect();
        if narrowed.is_empty() { docs } else { narrowed }
    }
}

/// Build the stage-1 local FTS query.
///
/// CJK-heavy intents intersect quoted keywords; long multi-keyword queries
/// union them for recall; everything else passes the normalized query
/// through.
pub fn build_fts_query(intent: &Intent) -> String {
    let keywords = &intent.keywords;
    let quoted = |k: &String| format!("\"{}\"", k.replace('"', ""));

    if intent.cjk_keyword_count() >= 2 && keywords.len() <= 4 && !keywords.is_empty() {
        keywords.iter().map(quoted).collect::<Vec<_>>().join(" ")
    } else if intent.query.chars().count() >= 18 && keywords.len() >= 2 {
        keywords.iter().map(quoted).collect::<Vec<_>>().join(" OR ")
    } else {
        intent.query.clone()
    }
}

/// Build the remote SQL statement for keyword LIKE recall.
pub fn build_sql_query(intent: &Intent, limit: usize) -> String {
    let mut terms: Vec<String> = intent
        .keywords
        .iter()
        .map(|k| format!("content LIKE '%{}%' ESCAPE '\\'", escape_like(k)))
        .collect();
    if terms.is_empty() {
        terms.push(format!(
            "content LIKE '%{}%' ESCAPE '\\'",
            escape_like(&intent.query)
        ));
    }

    let mut stmt = format!("SELECT * FROM blocks WHERE ({})", terms.join(" OR "));
    if let Some(range) = &intent.time_range {
        stmt.push_str(&format!(" AND updated > '{}'", compact_timestamp(&range.since)));
    }
    stmt.push_str(" AND type != 'd' AND content IS NOT NULL AND TRIM(content) != ''");
    stmt.push_str(&format!(" ORDER BY updated DESC LIMIT {limit}"));
    stmt
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('\'', "''")
}

/// Score one block against the query and keywords.
pub fn score_block(block: &Block, query_lower: &str, keywords_lower: &[String]) -> f64 {
    let content_lower = block.content.to_lowercase();
    let hpath_lower = block.hpath.to_lowercase();
    let mut sum = 0.0;

    if query_lower.chars().count() >= 3 {
        if content_lower.contains(query_lower) {
            sum += 1.2;
        }
        if hpath_lower.contains(query_lower) {
            sum += 0.6;
        }
    }

    for keyword in keywords_lower {
        if content_lower.contains(keyword.as_str()) {
            sum += 0.35;
        }
        if hpath_lower.contains(keyword.as_str()) {
            sum += 0.15;
        }
    }

    if let Some(updated) = parse_updated(&block.updated_at) {
        let days = (Utc::now() - updated).num_seconds() as f64 / 86_400.0;
        sum += (0.3 - days.max(0.0) * 0.01).max(0.0);
    }

    if let Some(rank) = block.rank {
        sum += rank_bonus(rank);
    }

    sum * block.source.base_weight()
}

/// Bounded bonus from a native FTS rank.
///
/// SQLite's bm25() reports stronger matches as more negative values with no
/// lower bound; the magnitude is scaled and clamped into the 0..=0.8 band so
/// it stays commensurate with the other additive terms. Non-negative ranks
/// use the plain smaller-is-better mapping.
fn rank_bonus(rank: f64) -> f64 {
    if rank < 0.0 {
        (-rank * 0.1).min(0.8)
    } else {
        (0.8 - rank.min(0.8)).max(0.0)
    }
}

/// Keep the highest-scored copy per block id.
fn dedup_by_id(blocks: Vec<Block>) -> Vec<Block> {
    let mut best: HashMap<String, Block> = HashMap::new();
    for block in blocks {
        match best.get(&block.id) {
            Some(existing) if existing.score >= block.score => {}
            _ => {
                best.insert(block.id.clone(), block);
            }
        }
    }
    best.into_values().collect()
}

fn content_prefix(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(800)
        .collect()
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or_default()
}

fn title_from_hpath(hpath: &str) -> String {
    hpath
        .rsplit('/')
        .find(|segment| !segment.trim().is_empty())
        .unwrap_or(hpath)
        .trim()
        .to_string()
}
