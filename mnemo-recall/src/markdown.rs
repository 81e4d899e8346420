//! Kramdown sanitization, near-duplicate line removal, and section splitting.

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;

fn inline_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\{:[^}\n]*\}").expect("valid regex"))
}

fn list_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+\.\s+|[-*+]\s+)").expect("valid regex"))
}

/// Strip kramdown attributes from store markdown: standalone `{: …}` lines
/// disappear entirely, inline blobs are cut out of their line.
pub fn sanitize_kramdown(input: &str) -> String {
    let mut out = Vec::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("{:") && trimmed.ends_with('}') {
            continue;
        }
        let cleaned = inline_attr_re().replace_all(line, "");
        out.push(cleaned.into_owned());
    }
    out.join("\n")
}

/// Remove near-duplicate lines within a sliding window.
///
/// Lines are compared after trimming and after normalizing leading list
/// markers, so `1. foo` and `- foo` count as duplicates. Blank lines are
/// never dropped.
pub fn dedup_lines(input: &str, window_size: usize) -> String {
    if window_size == 0 {
        return input.to_string();
    }

    let mut window: VecDeque<String> = VecDeque::with_capacity(window_size);
    let mut out = Vec::new();

    for line in input.lines() {
        let normalized = normalize_line(line);
        if normalized.is_empty() {
            out.push(line.to_string());
            continue;
        }
        if window.contains(&normalized) {
            continue;
        }
        if window.len() == window_size {
            window.pop_front();
        }
        window.push_back(normalized);
        out.push(line.to_string());
    }

    out.join("\n")
}

fn normalize_line(line: &str) -> String {
    let trimmed = line.trim();
    list_marker_re().replace(trimmed, "").trim().to_string()
}

/// A section split out of a document's markdown.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Heading level that opened the section.
    pub level: u8,
    /// Zero-based line index of the heading in the source markdown.
    pub line_index: usize,
    /// Heading line plus body, up to the next selected heading.
    pub content: String,
}

/// Split markdown into sections at the configured heading levels.
///
/// A section runs from its heading line to the next heading at any selected
/// level. Content is deduped (when `dedup_window > 0`) and truncated to
/// `max_chars` with an ellipsis. Markdown with no matching heading yields no
/// sections.
pub fn split_sections(
    markdown: &str,
    levels: &[u8],
    max_sections: usize,
    max_chars: usize,
    dedup_window: usize,
) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<(u8, usize, Vec<&str>)> = None;

    for (index, line) in markdown.lines().enumerate() {
        let level = heading_level(line);
        let starts_section = level.map(|l| levels.contains(&l)).unwrap_or(false);

        if starts_section {
            if let Some(section) = current.take() {
                push_section(&mut sections, section, max_chars, dedup_window);
            }
            if sections.len() >= max_sections {
                current = None;
                break;
            }
            current = Some((level.unwrap_or(0), index, vec![line]));
        } else if let Some((_, _, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some(section) = current.take() {
        if sections.len() < max_sections {
            push_section(&mut sections, section, max_chars, dedup_window);
        }
    }

    sections
}

fn push_section(
    sections: &mut Vec<Section>,
    (level, line_index, lines): (u8, usize, Vec<&str>),
    max_chars: usize,
    dedup_window: usize,
) {
    let raw = lines.join("\n");
    let deduped = if dedup_window > 0 {
        dedup_lines(&raw, dedup_window)
    } else {
        raw
    };
    let content = truncate_chars(deduped.trim_end(), max_chars, "...");
    if content.trim().is_empty() {
        return;
    }
    sections.push(Section {
        level,
        line_index,
        content,
    });
}

/// ATX heading level of a line, if it is one.
pub fn heading_level(line: &str) -> Option<u8> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('#') {
        return None;
    }
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() || rest.starts_with(' ') {
        Some(hashes as u8)
    } else {
        None
    }
}

/// Char-safe truncation with a suffix.
pub fn truncate_chars(input: &str, max_chars: usize, ellipsis: &str) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let keep = max_chars.saturating_sub(ellipsis.chars().count());
    let mut out: String = input.chars().take(keep).collect();
    out.push_str(ellipsis);
    out
}
