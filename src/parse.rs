//! Pure extraction of a display title, summary, color, and outgoing
//! reference identifiers from raw document text.
//!
//! No I/O and no graph knowledge live here; the reducer decides what to do
//! with the extracted outline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::paths::NodeId;

/// Title sentinel for documents whose first line is not a heading.
pub const UNTITLED: &str = "Untitled";

/// Double-bracket reference token. The capture is the target identifier.
static WIKILINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("wikilink pattern is valid"));

/// The subset of YAML frontmatter the engine cares about. Unknown keys are
/// ignored rather than rejected, since external tools own the rest.
#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    color: Option<String>,
}

/// Everything the parser can extract from one document body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentOutline {
    pub title: String,
    pub summary: String,
    pub color: Option<String>,
    /// Reference targets in document order. Duplicates are preserved
    /// positionally here; the reducer dedupes on insert.
    pub outgoing_edges: Vec<NodeId>,
}

/// Parse one document body into its outline.
pub fn parse_document(content: &str) -> DocumentOutline {
    let (frontmatter, body) = split_frontmatter(content);
    let color = frontmatter.and_then(|raw| match serde_yaml::from_str::<Frontmatter>(raw) {
        Ok(fm) => fm.color,
        Err(e) => {
            tracing::debug!("[parse] ignoring malformed frontmatter: {e}");
            None
        }
    });

    DocumentOutline {
        title: extract_title(body),
        summary: extract_summary(body),
        color,
        outgoing_edges: extract_edges(body),
    }
}

/// Split a leading `---`-delimited frontmatter block from the body.
/// Returns (frontmatter, body); frontmatter is None when the document does
/// not open with a delimiter line.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, content);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }
    // Unterminated frontmatter: treat the whole document as body.
    (None, content)
}

/// Title: the first line when it is a heading marker followed by text,
/// else the fixed sentinel.
fn extract_title(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or("").trim();
    if let Some(stripped) = first_line.strip_prefix('#') {
        let text = stripped.trim_start_matches('#').trim();
        if !text.is_empty() {
            return text.to_string();
        }
    }
    UNTITLED.to_string()
}

/// Summary: the first `##`-or-deeper heading after the title line, hashes
/// stripped. Empty when absent.
fn extract_summary(body: &str) -> String {
    body.lines()
        .skip(1)
        .map(str::trim)
        .find(|line| line.starts_with("##"))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .unwrap_or_default()
}

/// Every `[[identifier]]` occurrence in document order, captures trimmed.
fn extract_edges(body: &str) -> Vec<NodeId> {
    WIKILINK_RE
        .captures_iter(body)
        .map(|cap| cap[1].trim().to_string())
        .collect()
}
