//! Structured diagnostics for policy source that fails to compile.

use serde::Serialize;
use thiserror::Error;

/// Diagnostic code for a parse failure.
pub const CODE_PARSE: &str = "POLICY_PARSE";
/// Diagnostic code for an I/O failure while reading policy source.
pub const CODE_IO: &str = "POLICY_IO";

/// A compile failure with enough position detail for an editor to render
/// an inline diagnostic.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{summary}")]
pub struct SyntaxError {
    /// One-line human summary, shown in toasts and logs.
    pub summary: String,
    /// Full underlying message.
    pub message: String,
    /// Source identifier (a file path, or `<input>` for in-memory text).
    pub file: String,
    /// 1-based line of the failure; 0 when unknown.
    pub line: usize,
    /// 1-based column of the failure; 0 when unknown.
    pub column: usize,
    /// The offending source line, verbatim.
    pub snippet: String,
    /// 1-based column where the caret underline starts.
    pub caret_start: usize,
    /// 1-based column one past the caret underline end.
    pub caret_end: usize,
    /// Suggested fix, when a heuristic applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable diagnostic code (`POLICY_PARSE`, `POLICY_IO`).
    pub code: &'static str,
}

impl SyntaxError {
    /// Build a parse diagnostic positioned at `line`/`column` (1-based)
    /// within `source`. The snippet and caret range are derived from the
    /// source text; the summary and suggestion from the message.
    #[must_use]
    pub fn parse(source: &str, file: &str, line: usize, column: usize, message: impl Into<String>) -> Self {
        let message = message.into();
        let snippet = source
            .lines()
            .nth(line.saturating_sub(1))
            .unwrap_or_default()
            .to_string();
        let caret_start = column.max(1);
        let caret_end = caret_range_end(&snippet, caret_start);
        Self {
            summary: build_summary(&message),
            suggestion: suggest_fix(&message, &snippet),
            message,
            file: file.to_string(),
            line,
            column,
            snippet,
            caret_start,
            caret_end,
            code: CODE_PARSE,
        }
    }

    /// Build an I/O diagnostic with no position information.
    #[must_use]
    pub fn io(file: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            summary: build_summary(&message),
            message,
            file: file.to_string(),
            line: 0,
            column: 0,
            snippet: String::new(),
            caret_start: 0,
            caret_end: 0,
            suggestion: None,
            code: CODE_IO,
        }
    }
}

/// End of the caret underline: extend over the token under the caret, or
/// one column when the caret sits on whitespace or past the line end.
fn caret_range_end(snippet: &str, caret_start: usize) -> usize {
    let chars: Vec<char> = snippet.chars().collect();
    let start = caret_start - 1;
    if start >= chars.len() {
        return caret_start + 1;
    }
    let mut end = start;
    while end < chars.len() && !chars[end].is_whitespace() {
        end += 1;
    }
    (end + 1).max(caret_start + 1)
}

fn build_summary(message: &str) -> String {
    let first = message.lines().next().unwrap_or(message).trim();
    if first.is_empty() {
        "policy source failed to compile".to_string()
    } else {
        let mut s = first.to_string();
        if s.len() > 120 {
            s.truncate(117);
            s.push_str("...");
        }
        s
    }
}

/// Heuristic fixes for the most common editing mistakes.
fn suggest_fix(message: &str, snippet: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unexpected end") || lower.contains("expected `;`") {
        return Some("terminate the statement with `;`".to_string());
    }
    if lower.contains("unterminated string") {
        return Some("close the string literal with `\"`".to_string());
    }
    if lower.contains("expected `]`") {
        return Some("close the resource list with `]`".to_string());
    }
    if lower.contains("expected `)`") {
        return Some("close the statement head with `)`".to_string());
    }
    if lower.contains("expected `permit` or `forbid`") {
        let token = snippet.split_whitespace().next().unwrap_or_default();
        if !token.is_empty() {
            return Some(format!("replace `{token}` with `permit` or `forbid`"));
        }
    }
    None
}
