//! Inline note-link resolution.
//!
//! Prompts may carry note-store URLs or bare block ids; those documents are
//! fetched in full and prepended to the recall result, independently of the
//! gate. A host-keyword allowlist bounds which URLs are honored.

use std::sync::{Arc, OnceLock};

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use mnemo_core::LinkedDocSettings;

use crate::client::SiyuanClient;
use crate::markdown::sanitize_kramdown;
use crate::models::{Block, BlockSource, KeywordCoverage, RecalledDoc};

fn doc_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{14}-[a-z0-9]{7}").expect("valid regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).expect("valid regex"))
}

/// Extracts and fetches documents referenced inline in a prompt.
#[derive(Clone)]
pub struct LinkedDocResolver {
    client: Arc<SiyuanClient>,
    settings: LinkedDocSettings,
}

impl LinkedDocResolver {
    pub fn new(client: Arc<SiyuanClient>, settings: LinkedDocSettings) -> Self {
        Self { client, settings }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Pull document ids out of a prompt.
    ///
    /// URLs are checked against the host-keyword allowlist; ids come from the
    /// `id` query parameter and from path segments. Bare ids in the prompt
    /// text count only when the allowlist is empty or an allowed URL was
    /// already seen.
    pub fn extract_ids(&self, prompt: &str) -> Vec<String> {
        if !self.settings.enabled {
            return Vec::new();
        }

        let mut ids: Vec<String> = Vec::new();
        let mut push = |id: &str, ids: &mut Vec<String>| {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        };

        let mut saw_allowed_url = false;
        for matched in url_re().find_iter(prompt) {
            let href = matched.as_str();
            let Ok(parsed) = Url::parse(href) else { continue };
            if !self.url_allowed(&parsed, href) {
                debug!(url = href, "linked doc url rejected by host allowlist");
                continue;
            }
            saw_allowed_url = true;

            for (key, value) in parsed.query_pairs() {
                if key == "id" {
                    if let Some(found) = doc_id_re().find(&value) {
                        push(found.as_str(), &mut ids);
                    }
                }
            }
            if let Some(segments) = parsed.path_segments() {
                for segment in segments {
                    if let Some(found) = doc_id_re().find(segment) {
                        push(found.as_str(), &mut ids);
                    }
                }
            }
        }

        if self.settings.host_keywords.is_empty() || saw_allowed_url {
            for found in doc_id_re().find_iter(prompt) {
                push(found.as_str(), &mut ids);
            }
        }

        ids.truncate(self.settings.max_count);
        ids
    }

    fn url_allowed(&self, parsed: &Url, href: &str) -> bool {
        if self.settings.host_keywords.is_empty() {
            return true;
        }
        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let href_lower = href.to_lowercase();
        self.settings.host_keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            host.contains(&keyword) || href_lower.contains(&keyword)
        })
    }

    /// Fetch every referenced document, best effort; a failed id does not
    /// block the others.
    pub async fn resolve(&self, prompt: &str) -> Vec<RecalledDoc> {
        let ids = self.extract_ids(prompt);
        if ids.is_empty() {
            return Vec::new();
        }

        let fetches = ids.iter().map(|id| self.fetch_doc(id.clone()));
        join_all(fetches).await.into_iter().flatten().collect()
    }

    async fn fetch_doc(&self, id: String) -> Option<RecalledDoc> {
        let kramdown = match self.client.get_block_kramdown(&id).await {
            Ok(payload) => payload.kramdown,
            Err(err) => {
                warn!(id = %id, "linked doc fetch failed: {err}");
                return None;
            }
        };
        let markdown = sanitize_kramdown(&kramdown);

        // hpath/updated are decoration; failure falls back to a placeholder.
        let (hpath, updated_at) = match self.client.get_block_info(&id).await {
            Ok(info) => (
                info.hpath.unwrap_or_else(|| format!("[linked:{id}]")),
                info.updated.unwrap_or_default(),
            ),
            Err(_) => (format!("[linked:{id}]"), String::new()),
        };

        let block = Block {
            id: id.clone(),
            root_id: id.clone(),
            hpath: hpath.clone(),
            content: markdown.clone(),
            updated_at: updated_at.clone(),
            source: BlockSource::LinkedDoc,
            score: 1.0,
            rank: None,
        };

        Some(RecalledDoc {
            doc_id: id,
            title: hpath
                .rsplit('/')
                .find(|segment| !segment.trim().is_empty())
                .unwrap_or(&hpath)
                .to_string(),
            hpath,
            updated_at,
            score: 1.0,
            source: BlockSource::LinkedDoc,
            markdown: Some(markdown),
            blocks: vec![block],
            coverage: KeywordCoverage::default(),
        })
    }
}

/// Prepend linked docs to search results, deduping by doc id.
pub fn merge_linked_docs(
    linked: Vec<RecalledDoc>,
    searched: Vec<RecalledDoc>,
) -> Vec<RecalledDoc> {
    let mut merged = linked;
    for doc in searched {
        if !merged.iter().any(|existing| existing.doc_id == doc.doc_id) {
            merged.push(doc);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::SiyuanSettings;

    fn resolver(host_keywords: &[&str], max_count: usize) -> LinkedDocResolver {
        let client = Arc::new(SiyuanClient::new(&SiyuanSettings::default()));
        LinkedDocResolver::new(
            client,
            LinkedDocSettings {
                enabled: true,
                host_keywords: host_keywords.iter().map(|s| s.to_string()).collect(),
                max_count,
            },
        )
    }

    #[test]
    fn extracts_id_from_query_parameter() {
        let ids = resolver(&[], 3)
            .extract_ids("see http://127.0.0.1:9081?id=20220802180638-lhtbfty please");
        assert_eq!(ids, vec!["20220802180638-lhtbfty"]);
    }

    #[test]
    fn extracts_id_from_path_segment() {
        let ids = resolver(&[], 3)
            .extract_ids("http://notes.local/app/20220802180638-lhtbfty.html");
        assert_eq!(ids, vec!["20220802180638-lhtbfty"]);
    }

    #[test]
    fn extracts_bare_ids_without_allowlist() {
        let ids = resolver(&[], 3).extract_ids("look at 20220802180638-lhtbfty directly");
        assert_eq!(ids, vec!["20220802180638-lhtbfty"]);
    }

    #[test]
    fn allowlist_blocks_non_matching_hosts() {
        let resolver = resolver(&["allowed.example.com"], 3);
        let ids = resolver.extract_ids("http://127.0.0.1:9081?id=20220802180638-lhtbfty");
        assert!(ids.is_empty());
    }

    #[test]
    fn allowlist_blocks_bare_ids_until_an_allowed_url_appears() {
        let resolver = resolver(&["allowed.example.com"], 3);
        assert!(resolver.extract_ids("bare 20220802180638-lhtbfty").is_empty());

        let ids = resolver.extract_ids(
            "http://allowed.example.com?id=20220802180638-lhtbfty and 20220802180639-aaaaaaa",
        );
        assert_eq!(
            ids,
            vec!["20220802180638-lhtbfty", "20220802180639-aaaaaaa"]
        );
    }

    #[test]
    fn ids_are_deduped_and_capped() {
        let resolver = resolver(&[], 2);
        let ids = resolver.extract_ids(
            "20220802180638-aaaaaaa 20220802180638-aaaaaaa 20220802180638-bbbbbbb 20220802180638-ccccccc",
        );
        assert_eq!(
            ids,
            vec!["20220802180638-aaaaaaa", "20220802180638-bbbbbbb"]
        );
    }

    #[test]
    fn malformed_ids_are_ignored() {
        let resolver = resolver(&[], 3);
        assert!(resolver.extract_ids("2022-lhtbfty 20220802180638_lhtbfty").is_empty());
    }

    #[test]
    fn merge_prepends_and_dedupes() {
        let linked = vec![doc("d1"), doc("d2")];
        let searched = vec![doc("d2"), doc("d3")];
        let merged = merge_linked_docs(linked, searched);
        let ids: Vec<&str> = merged.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "d3"]);
        assert_eq!(merged[0].source, BlockSource::LinkedDoc);
    }

    fn doc(id: &str) -> RecalledDoc {
        RecalledDoc {
            doc_id: id.to_string(),
            title: id.to_string(),
            hpath: format!("/x/{id}"),
            updated_at: String::new(),
            score: 1.0,
            source: BlockSource::LinkedDoc,
            markdown: None,
            blocks: Vec::new(),
            coverage: KeywordCoverage::default(),
        }
    }
}
