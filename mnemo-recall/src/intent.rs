//! Prompt gating and intent analysis.
//!
//! Decides whether a prompt deserves recall at all, and distills it into
//! keywords, an intent type, and an optional time window for the SQL path.

use std::sync::OnceLock;

use chrono::{Duration, Utc};
use regex::Regex;

use mnemo_core::RecallSettings;

use crate::models::{GateDecision, Intent, IntentType, TimeRange, contains_cjk, is_cjk_char};

/// Phrases that force recall to be skipped.
const DEFAULT_SKIP_PHRASES: &[&str] = &[
    "不用回忆",
    "不要回忆",
    "别查笔记",
    "don't recall",
    "do not recall",
    "no recall",
    "no context",
    "skip recall",
];

/// Phrases that force recall to run; stripped before keyword extraction.
const DEFAULT_FORCE_PHRASES: &[&str] = &[
    "查一下我的笔记",
    "查查我的笔记",
    "搜索我的笔记",
    "search my notes",
    "check my notes",
    "look up my notes",
];

/// Words swallowed after a force phrase at the start of a prompt.
const FORCE_CONNECTORS: &[&str] = &["for", "about", "on", "regarding", "关于"];

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "thanks", "thank you", "good morning", "good evening",
    "你好", "您好", "在吗", "早", "早上好", "晚上好", "谢谢",
];

const REVIEW_WORDS: &[&str] = &["回顾", "review", "总结", "summary"];
const SEARCH_WORDS: &[&str] = &["查找", "search", "找", "find"];

const CJK_PARTICLES: &[&str] = &[
    "请问", "告诉我", "帮我", "我想", "我要", "一下", "什么", "怎么", "如何", "的", "了", "吗", "呢",
];

const LATIN_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "with", "is", "are", "was",
    "be", "this", "that", "my", "me", "you", "it", "at", "by", "as", "do", "does", "did",
    "what", "how", "when", "where", "why", "please", "about", "tell", "show",
];

const TIME_PHRASES: &[(&str, i64)] = &[
    ("上周", 7),
    ("last week", 7),
    ("本周", 7),
    ("this week", 7),
    ("今天", 1),
    ("today", 1),
    ("昨天", 2),
    ("yesterday", 2),
    ("上个月", 30),
    ("last month", 30),
    ("最近", 30),
    ("recent", 30),
];

fn greeting_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"^(hi|hello|hey|yo)[\s!,.~]*$",
            r"^good (morning|afternoon|evening)[\s!.]*$",
            r"^(你好|您好|早上好|下午好|晚上好)[呀啊哇！!。.～~]*$",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
    })
}

fn cjk_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\p{Han}{2,}").expect("valid regex"))
}

/// Result of analyzing one prompt.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub decision: GateDecision,
    pub intent: Intent,
}

/// Gating and keyword extraction over raw prompts.
#[derive(Debug, Clone)]
pub struct IntentAnalyzer {
    settings: RecallSettings,
    skip_phrases: Vec<String>,
    force_phrases: Vec<String>,
}

impl IntentAnalyzer {
    pub fn new(settings: RecallSettings) -> Self {
        Self {
            settings,
            skip_phrases: DEFAULT_SKIP_PHRASES.iter().map(|s| s.to_string()).collect(),
            force_phrases: DEFAULT_FORCE_PHRASES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the built-in phrase lists.
    pub fn with_phrases(mut self, skip: Vec<String>, force: Vec<String>) -> Self {
        self.skip_phrases = skip;
        self.force_phrases = force;
        self
    }

    /// Run the gate rules in order, then extract the intent from the
    /// effective (possibly force-stripped) prompt.
    ///
    /// `has_linked_doc` reflects the independent linked-doc scan; a prompt
    /// carrying a note link bypasses the length gate.
    pub fn analyze(&self, prompt: &str, has_linked_doc: bool) -> Analysis {
        let trimmed = prompt.trim();
        let lower = trimmed.to_lowercase();

        if self
            .skip_phrases
            .iter()
            .any(|phrase| lower.contains(&phrase.to_lowercase()))
        {
            return Analysis {
                decision: GateDecision::skip("explicit_skip"),
                intent: self.intent_of(trimmed, false),
            };
        }

        if let Some(stripped) = self.strip_force_phrase(trimmed) {
            return Analysis {
                decision: GateDecision::go("explicit_force"),
                intent: self.intent_of(&stripped, true),
            };
        }

        if has_linked_doc {
            return Analysis {
                decision: GateDecision::go("linked_doc"),
                intent: self.intent_of(trimmed, false),
            };
        }

        if trimmed.chars().count() < self.settings.min_prompt_length {
            return Analysis {
                decision: GateDecision::skip("too_short"),
                intent: self.intent_of(trimmed, false),
            };
        }

        if is_greeting(trimmed) {
            return Analysis {
                decision: GateDecision::skip("greeting"),
                intent: self.intent_of(trimmed, false),
            };
        }

        let intent = self.intent_of(trimmed, false);
        let type_name = intent.intent_type.as_str();
        if self
            .settings
            .skip_intent_types
            .iter()
            .any(|skip| skip == type_name)
        {
            return Analysis {
                decision: GateDecision::skip(&format!("intent_{type_name}")),
                intent,
            };
        }

        Analysis {
            decision: GateDecision::go("default"),
            intent,
        }
    }

    /// Remove a force phrase and any leading connector after it.
    fn strip_force_phrase(&self, prompt: &str) -> Option<String> {
        let lower = prompt.to_lowercase();
        let phrase = self
            .force_phrases
            .iter()
            .find(|phrase| lower.contains(&phrase.to_lowercase()))?;

        let start = lower.find(&phrase.to_lowercase()).unwrap_or(0);
        let mut rest = String::new();
        rest.push_str(&prompt[..start]);
        rest.push(' ');
        rest.push_str(&prompt[start + phrase.len()..]);
        let mut rest = rest.trim().to_string();

        if start == 0 {
            // Phrase opened the prompt; swallow one connector word.
            let rest_lower = rest.to_lowercase();
            for connector in FORCE_CONNECTORS {
                if let Some(after) = rest_lower.strip_prefix(connector) {
                    if after.is_empty() || after.starts_with(char::is_whitespace) {
                        rest = rest[connector.len()..].trim_start().to_string();
                        break;
                    }
                }
            }
        }

        Some(rest.trim_matches(|c: char| c == ',' || c == ':' || c == '，' || c == '：')
            .trim()
            .to_string())
    }

    fn intent_of(&self, prompt: &str, forced: bool) -> Intent {
        let query = normalize_query(prompt);
        let keywords = extract_keywords(&query, self.settings.max_keywords);
        let time_range = detect_time_range(prompt);
        let intent_type = detect_intent_type(prompt);

        Intent {
            query,
            keywords,
            time_range,
            intent_type,
            forced,
        }
    }
}

/// Collapse whitespace and drop punctuation, keeping CJK and alphanumerics.
pub fn normalize_query(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len());
    for c in prompt.chars() {
        if c.is_alphanumeric() || is_cjk_char(c) {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract keywords from a normalized query.
pub fn extract_keywords(query: &str, max_keywords: usize) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    // CJK: strip framing particles, then harvest runs of >=2 ideographs.
    let mut cjk_source = query.to_string();
    for particle in CJK_PARTICLES {
        cjk_source = cjk_source.replace(particle, " ");
    }
    for run in cjk_run_re().find_iter(&cjk_source) {
        let run = run.as_str();
        candidates.push(run.to_string());
        let chars: Vec<char> = run.chars().collect();
        if chars.len() >= 5 {
            for pair in chars.windows(2).take(20) {
                candidates.push(pair.iter().collect());
            }
        }
    }

    // Latin: lowercase tokens, length > 1, no stopwords, no CJK inside.
    for token in query.to_lowercase().split_whitespace() {
        if token.chars().count() <= 1 || contains_cjk(token) {
            continue;
        }
        if LATIN_STOPWORDS.contains(&token) {
            continue;
        }
        candidates.push(token.to_string());
    }

    // Dedup, longest first, prune non-CJK substrings of longer keepers.
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|keyword| seen.insert(keyword.clone()));
    candidates.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let mut kept: Vec<String> = Vec::new();
    for candidate in candidates {
        let redundant = !contains_cjk(&candidate)
            && kept
                .iter()
                .any(|longer| longer.contains(candidate.as_str()));
        if !redundant {
            kept.push(candidate);
        }
        if kept.len() >= max_keywords {
            break;
        }
    }

    kept
}

/// First matching time phrase wins.
pub fn detect_time_range(prompt: &str) -> Option<TimeRange> {
    let lower = prompt.to_lowercase();
    for (phrase, days) in TIME_PHRASES {
        if lower.contains(phrase) {
            return Some(TimeRange {
                days: *days,
                since: Utc::now() - Duration::days(*days),
            });
        }
    }
    None
}

pub fn detect_intent_type(prompt: &str) -> IntentType {
    let trimmed = prompt.trim();
    if is_greeting(trimmed) {
        return IntentType::Chat;
    }
    if trimmed.starts_with('/') {
        return IntentType::Command;
    }
    let lower = trimmed.to_lowercase();
    if REVIEW_WORDS.iter().any(|word| lower.contains(word)) {
        return IntentType::Review;
    }
    if SEARCH_WORDS.iter().any(|word| lower.contains(word)) {
        return IntentType::Search;
    }
    IntentType::Query
}

fn is_greeting(prompt: &str) -> bool {
    let lower = prompt.trim().to_lowercase();
    if GREETINGS.contains(&lower.as_str()) {
        return true;
    }
    greeting_res().iter().any(|re| re.is_match(&lower))
}
