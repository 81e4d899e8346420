//! Render recalled documents into a budgeted context block.
//!
//! The open/close marker lines are stable so downstream pipelines can detect
//! (and strip) the injected block.

use mnemo_core::RecallSettings;

use crate::models::RecalledDoc;

/// Opening marker line. Bit-stable; do not edit.
pub const CONTEXT_OPEN_MARKER: &str = "===== RECALLED NOTES BEGIN =====";
/// Closing marker line. Bit-stable; do not edit.
pub const CONTEXT_CLOSE_MARKER: &str = "===== RECALLED NOTES END =====";

const PREAMBLE: &str =
    "The following notes from the user's knowledge base may be relevant to this conversation:";

/// A rendered block needs at least this much room to be worth emitting.
const MIN_USEFUL_ROOM: usize = 60;

/// Blocks rendered per regular document.
const BLOCKS_PER_DOC: usize = 5;

/// Compose the context block under the configured token budget.
///
/// Returns an empty string when there is nothing to render.
pub fn format_context(docs: &[RecalledDoc], settings: &RecallSettings) -> String {
    if docs.is_empty() {
        return String::new();
    }

    let max_chars = settings.max_context_tokens.saturating_mul(4);
    let mut out = Budgeted::new(max_chars);

    if !out.push_line(CONTEXT_OPEN_MARKER) || !out.push_line(PREAMBLE) {
        return String::new();
    }
    // Reserve the closing marker up front so it always fits.
    out.reserve(CONTEXT_CLOSE_MARKER.chars().count() + 1);

    for doc in docs {
        if out.remaining() < MIN_USEFUL_ROOM {
            break;
        }
        if doc.markdown.is_some() {
            render_linked_doc(&mut out, doc);
        } else {
            render_regular_doc(&mut out, doc, settings.block_excerpt_max_chars);
        }
    }

    out.release_reservation();
    out.push_line(CONTEXT_CLOSE_MARKER);
    out.into_string()
}

fn render_linked_doc(out: &mut Budgeted, doc: &RecalledDoc) {
    let header = format!("## 🔗 {} ({})", doc.hpath, doc.updated_at);
    if !out.push_line(&header) {
        return;
    }
    let markdown = doc.markdown.as_deref().unwrap_or_default();

    // Header + fences already spent; the body gets whatever is left.
    let overhead = "```markdown\n".chars().count() + "\n```\n".chars().count();
    if out.remaining() <= overhead + 3 {
        return;
    }
    let room = out.remaining() - overhead;
    let body = if markdown.chars().count() > room {
        truncate(markdown, room)
    } else {
        markdown.to_string()
    };

    out.push_line("```markdown");
    for line in body.lines() {
        out.push_line(line);
    }
    out.push_line("```");
}

fn render_regular_doc(out: &mut Budgeted, doc: &RecalledDoc, excerpt_max_chars: usize) {
    let header = format!("## 📄 {} ({})", doc.hpath, doc.updated_at);
    if !out.push_line(&header) {
        return;
    }

    for block in doc.blocks.iter().take(BLOCKS_PER_DOC) {
        if out.remaining() < MIN_USEFUL_ROOM {
            break;
        }
        let mut lines = block.content.lines();
        let first = lines.next().unwrap_or_default().trim();
        if first.is_empty() {
            continue;
        }
        out.push_line(&format!("- {}", first.trim_start_matches('#').trim()));

        let rest: String = lines.collect::<Vec<_>>().join(" ");
        let rest = rest.trim();
        if !rest.is_empty() {
            let excerpt = if rest.chars().count() > excerpt_max_chars {
                truncate(rest, excerpt_max_chars)
            } else {
                rest.to_string()
            };
            out.push_line(&format!("  {excerpt}"));
        }
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    let keep = max_chars.saturating_sub(3);
    let mut out: String = input.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Line-oriented string builder that refuses writes past its budget.
struct Budgeted {
    buffer: String,
    used: usize,
    max_chars: usize,
    reserved: usize,
}

impl Budgeted {
    fn new(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            used: 0,
            max_chars,
            reserved: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.max_chars
            .saturating_sub(self.used)
            .saturating_sub(self.reserved)
    }

    fn reserve(&mut self, chars: usize) {
        self.reserved = chars;
    }

    fn release_reservation(&mut self) {
        self.reserved = 0;
    }

    /// Append a line (with trailing newline). Returns false if it did not fit.
    fn push_line(&mut self, line: &str) -> bool {
        let cost = line.chars().count() + 1;
        if cost > self.remaining() {
            return false;
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.used += cost;
        true
    }

    fn into_string(self) -> String {
        self.buffer
    }
}
