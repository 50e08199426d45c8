//! Cursor-context completion over policy source.
//!
//! The engine never rejects malformed source: completion runs while the
//! operator is mid-edit, so context detection is heuristic over the text
//! before the cursor. Only the cursor itself is validated; a position
//! outside the document is an input error.

mod items;

use serde::Serialize;
use thiserror::Error;

use crate::hints::Hints;

/// Default cap on returned items.
pub const DEFAULT_MAX_ITEMS: usize = 75;

/// A 1-based cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

/// The span an accepted completion item should replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaceRange {
    /// Start of the token under the cursor.
    pub start: Position,
    /// End of the token under the cursor.
    pub end: Position,
}

/// Category of a completion item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    /// Grammar keyword.
    Keyword,
    /// Action entity.
    Action,
    /// Entity type name.
    EntityType,
    /// Resource entity.
    Resource,
    /// Context condition key.
    ConditionKey,
    /// Multi-token template.
    Snippet,
    /// MCP tool entity.
    Tool,
    /// MCP server entity.
    Server,
    /// HTTP header literal.
    Header,
}

/// One completion suggestion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Display label.
    pub label: String,
    /// Category.
    pub kind: ItemKind,
    /// Text inserted on accept; may carry `${n:placeholder}` tab stops.
    pub insert_text: String,
    /// Short one-line detail.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    /// Longer documentation.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub documentation: String,
    /// Client-side ordering key, assigned by ranking.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sort_text: String,
    /// Characters that accept the item and are then typed through.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commit_characters: Vec<String>,
}

/// Invalid completion request.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CompleteError {
    /// The cursor lies outside the document.
    #[error("cursor position {line}:{column} is outside the document")]
    InvalidCursor {
        /// Requested line.
        line: usize,
        /// Requested column.
        column: usize,
    },
}

/// Produce completion items and the token range they replace.
///
/// `line` and `column` are 1-based and must address a position inside the
/// document (potentially one past the end of a line). `max_items` of 0
/// means [`DEFAULT_MAX_ITEMS`].
///
/// # Errors
///
/// Returns [`CompleteError::InvalidCursor`] for out-of-bounds positions.
pub fn complete(
    input: &str,
    line: usize,
    column: usize,
    max_items: usize,
    hints: &Hints,
) -> Result<(Vec<Item>, ReplaceRange), CompleteError> {
    let max_items = if max_items == 0 { DEFAULT_MAX_ITEMS } else { max_items };
    let chars: Vec<char> = input.chars().collect();
    let offset = validate_cursor(&chars, line, column)
        .ok_or(CompleteError::InvalidCursor { line, column })?;
    let before: String = chars[..offset].iter().collect();

    if in_comment(&before) {
        let at = Position { line, column };
        return Ok((Vec::new(), ReplaceRange { start: at, end: at }));
    }

    let (start, end) = token_bounds(&chars, offset);
    let prefix: String = chars[start..offset].iter().collect();
    let (prefix, segment) = normalize_prefix(&prefix);

    let context = detect_context(input, &before);
    let candidates = gather_candidates(&context, hints);
    let items = select_and_rank(candidates, &prefix, &segment, max_items);

    let range = ReplaceRange {
        start: offset_to_position(&chars, start),
        end: offset_to_position(&chars, end),
    };
    Ok((items, range))
}

/// Map a 1-based cursor to a char offset, or `None` when out of bounds.
fn validate_cursor(chars: &[char], line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }
    let mut cur_line = 1usize;
    let mut line_start = 0usize;
    let mut idx = 0usize;
    loop {
        let line_end = chars[idx..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(chars.len(), |p| idx + p);
        if cur_line == line {
            let line_len = line_end - line_start;
            if column > line_len + 1 {
                return None;
            }
            return Some(line_start + column - 1);
        }
        if line_end == chars.len() {
            return None;
        }
        cur_line += 1;
        idx = line_end + 1;
        line_start = idx;
    }
}

fn offset_to_position(chars: &[char], offset: usize) -> Position {
    let mut line = 1;
    let mut column = 1;
    for &c in &chars[..offset.min(chars.len())] {
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    Position { line, column }
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ':' | '_' | '"' | '.' | '-' | '/' | '*')
}

fn token_bounds(chars: &[char], offset: usize) -> (usize, usize) {
    let mut start = offset.min(chars.len());
    while start > 0 && is_token_char(chars[start - 1]) {
        start -= 1;
    }
    let mut end = offset.min(chars.len());
    while end < chars.len() && is_token_char(chars[end]) {
        end += 1;
    }
    (start, end)
}

/// The cursor sits inside a `//` line comment or an unclosed `/*` block.
fn in_comment(before: &str) -> bool {
    let line_start = before.rfind('\n').map_or(0, |p| p + 1);
    if before[line_start..].contains("//") {
        return true;
    }
    match (before.rfind("/*"), before.rfind("*/")) {
        (Some(open), Some(close)) => close < open,
        (Some(_), None) => true,
        _ => false,
    }
}

fn normalize_prefix(prefix: &str) -> (String, String) {
    let trimmed = prefix.trim().to_lowercase();
    if trimmed.is_empty() {
        return (String::new(), String::new());
    }
    let mut segment = trimmed.as_str();
    for sep in ["\"", "::", ":", "."] {
        if let Some(idx) = segment.rfind(sep) {
            segment = &segment[idx + sep.len()..];
        }
    }
    (trimmed.clone(), segment.trim_matches('"').to_string())
}

fn remove_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Debug, Default)]
struct DetectedContext {
    start_of_document: bool,
    after_permit_forbid: bool,
    action_comparator: bool,
    resource_list: bool,
    mcp_policy: bool,
    http_rewrite_policy: bool,
    after_context_dot: bool,
    needs_action: bool,
    needs_resource: bool,
    inside_permit_args: bool,
    permit_args_empty: bool,
}

fn detect_context(input: &str, before: &str) -> DetectedContext {
    let before_lower = before.to_lowercase();
    let mut ctx = DetectedContext {
        start_of_document: before.trim().is_empty(),
        after_permit_forbid: after_permit_or_forbid(&before_lower),
        action_comparator: is_action_comparator(&before_lower),
        resource_list: is_resource_list_context(&before_lower),
        after_context_dot: has_context_dot(&before_lower),
        ..DetectedContext::default()
    };

    let (has_keyword, inside_args, args_empty) = permit_invocation_state(&before_lower);
    if has_keyword {
        ctx.after_permit_forbid = true;
    }
    ctx.inside_permit_args = inside_args;
    ctx.permit_args_empty = args_empty;

    let snippet = statement_snippet_around(input, before.len()).unwrap_or_default();
    let snippet_flat = remove_whitespace(&snippet.to_lowercase());
    ctx.needs_action = bare_parameter(&snippet_flat, "action");
    ctx.needs_resource = bare_parameter(&snippet_flat, "resource");
    ctx.mcp_policy = snippet_flat.contains("action::\"mcpcall\"")
        || within_policy_containing(&before_lower, "action::\"mcpcall\"");
    ctx.http_rewrite_policy = snippet_flat.contains("action::\"httprewrite\"")
        || within_policy_containing(&before_lower, "action::\"httprewrite\"");
    ctx
}

/// A head parameter present only in bare form, with no comparator and no
/// membership list anywhere in the statement.
fn bare_parameter(flat: &str, name: &str) -> bool {
    if flat.contains(&format!("{name}==")) || flat.contains(&format!("{name}in[")) {
        return false;
    }
    flat.contains(&format!("{name},")) || flat.contains(&format!("{name})"))
}

fn after_permit_or_forbid(before: &str) -> bool {
    let last = match (before.rfind("permit"), before.rfind("forbid")) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return false,
    };
    let chunk = &before[last..];
    let last_line = chunk.lines().last().unwrap_or(chunk).trim();
    if last_line == "permit" || last_line == "forbid" {
        return true;
    }
    let normalized = remove_whitespace(last_line);
    normalized.starts_with("permit(")
        || normalized.starts_with("forbid(")
        || normalized.ends_with("permit")
        || normalized.ends_with("forbid")
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':'
}

fn permit_invocation_state(before: &str) -> (bool, bool, bool) {
    let last = match (before.rfind("permit"), before.rfind("forbid")) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return (false, false, false),
    };
    if last > 0 {
        if let Some(prev) = before[..last].chars().next_back() {
            if is_identifier_char(prev) {
                return (false, false, false);
            }
        }
    }
    let remainder = before[last + 6..].trim_start();
    if remainder.is_empty() {
        return (true, false, true);
    }
    if !remainder.starts_with('(') {
        return (true, false, false);
    }
    let content: Vec<char> = remainder[1..].chars().collect();
    let mut depth = 1i32;
    for (idx, &c) in content.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let inner: String = content[..idx].iter().collect();
                    return (true, false, inner.trim().is_empty());
                }
            }
            _ => {}
        }
    }
    let inner: String = content.iter().collect();
    (true, true, inner.trim().is_empty())
}

/// The cursor sits after `action ==`, still typing the action entity: no
/// `,` or `)` has ended the comparator yet.
fn is_action_comparator(before: &str) -> bool {
    let flat = remove_whitespace(before);
    match flat.rfind("action==") {
        Some(idx) => {
            let after = &flat[idx + 8..];
            !after.contains(',') && !after.contains(')')
        }
        None => false,
    }
}

fn is_resource_list_context(before: &str) -> bool {
    let Some(idx) = before.rfind("resource") else {
        return false;
    };
    let chunk = remove_whitespace(&before[idx..]);
    if !chunk.contains("resourcein[") {
        return false;
    }
    // an already-closed list is no longer a list context
    let opens = chunk.matches('[').count();
    let closes = chunk.matches(']').count();
    opens > closes
}

fn within_policy_containing(before: &str, needle: &str) -> bool {
    let start = match (before.rfind("permit"), before.rfind("forbid")) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => 0,
    };
    before[start..].contains(needle)
}

fn has_context_dot(before: &str) -> bool {
    if before.trim_end().ends_with("context.") {
        return true;
    }
    // `context.` followed only by a partial key on the same line
    let Some(idx) = before.rfind("context.") else {
        return false;
    };
    let after = &before[idx + 8..];
    !after.contains(char::is_whitespace) && after.chars().all(is_identifier_char)
}

/// The statement the cursor sits in, found heuristically: scan back to
/// the nearest `permit`/`forbid` on a word boundary, then forward to the
/// terminating `;` at depth zero.
fn statement_snippet_around(input: &str, byte_offset: usize) -> Option<String> {
    let offset = byte_offset.min(input.len());
    // ASCII-only lowering keeps byte offsets aligned with `input`;
    // `str::to_lowercase` can change the length of non-ASCII text.
    let mut lower = input[..offset].to_string();
    lower.make_ascii_lowercase();
    let mut search: &str = &lower;
    loop {
        let candidate = match (search.rfind("permit"), search.rfind("forbid")) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => break,
        };
        let boundary_ok = {
            let before_ok = candidate == 0
                || !search[..candidate]
                    .chars()
                    .next_back()
                    .is_some_and(is_identifier_char);
            let after_ok = !search[candidate + 6..]
                .chars()
                .next()
                .is_some_and(is_identifier_char);
            before_ok && after_ok
        };
        if !boundary_ok {
            search = &search[..candidate];
            continue;
        }
        let end = find_statement_end(input, candidate);
        return Some(input[candidate..end].to_string());
    }
    if lower.trim().is_empty() {
        Some(input.to_string())
    } else {
        None
    }
}

fn find_statement_end(input: &str, start: usize) -> usize {
    let bytes = input.as_bytes();
    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0i32;
    let mut i = start;
    while i < bytes.len() {
        let ch = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if ch == b'\\' {
                escape = true;
            } else if ch == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match ch {
            b'"' => in_string = true,
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => depth = (depth - 1).max(0),
            b';' if depth == 0 => return i + 1,
            _ => {}
        }
        i += 1;
    }
    input.len()
}

struct Candidate {
    item: Item,
    priority: i32,
    key: String,
}

fn wrap(items: Vec<Item>, priority: i32) -> Vec<Candidate> {
    items
        .into_iter()
        .map(|item| Candidate { key: item.label.to_lowercase(), item, priority })
        .collect()
}

fn gather_candidates(ctx: &DetectedContext, hints: &Hints) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();

    if ctx.start_of_document {
        out.extend(wrap(items::keyword_items(), 0));
        out.extend(wrap(items::snippet_items(), 1));
    }

    if ctx.after_permit_forbid && !ctx.after_context_dot {
        if ctx.permit_args_empty {
            out.extend(wrap(items::statement_snippet_items(), -2));
            out.extend(wrap(items::snippet_items(), -1));
        } else if !ctx.action_comparator && !ctx.resource_list {
            out.extend(wrap(items::statement_snippet_items(), 1));
            out.extend(wrap(items::snippet_items(), 2));
        }
        if ctx.inside_permit_args && !ctx.action_comparator {
            let priority = if ctx.needs_resource && !ctx.needs_action { -1 } else { 0 };
            out.extend(wrap(items::permit_parameter_items(), priority));
        }
        if !ctx.action_comparator && !ctx.resource_list {
            out.extend(wrap(items::keyword_items(), 3));
        }
    }

    if ctx.action_comparator || ctx.needs_action {
        let priority = if ctx.needs_action && !ctx.action_comparator { -1 } else { 0 };
        out.extend(wrap(items::action_items(), priority));
    }

    if ctx.resource_list || ctx.needs_resource {
        let mut priority = if ctx.needs_resource && !ctx.resource_list { -1 } else { 0 };
        if ctx.mcp_policy {
            out.extend(wrap(items::mcp_resource_items(hints), priority));
            priority += 1;
        }
        out.extend(wrap(items::resource_items(hints), priority));
        if ctx.http_rewrite_policy {
            out.extend(wrap(items::http_rewrite_snippet_items(), priority + 1));
        }
    }

    if ctx.after_context_dot {
        out.extend(wrap(items::context_key_items(), 0));
        if ctx.http_rewrite_policy {
            out.extend(wrap(items::http_rewrite_context_items(hints), 1));
        }
    }

    if out.is_empty() {
        out.extend(wrap(items::keyword_items(), 1));
        out.extend(wrap(items::snippet_items(), 2));
    }

    let mut seen = std::collections::HashSet::new();
    out.retain(|c| seen.insert(c.key.clone()));
    out
}

fn select_and_rank(candidates: Vec<Candidate>, prefix: &str, segment: &str, max_items: usize) -> Vec<Item> {
    let mut ranked: Vec<(i64, Item)> = candidates
        .into_iter()
        .enumerate()
        .map(|(idx, cand)| {
            let mut score = i64::from(cand.priority) * 100;
            if !prefix.is_empty() {
                let label = cand.item.label.to_lowercase();
                let insert = cand.item.insert_text.to_lowercase();
                score += if label.starts_with(prefix) || insert.starts_with(prefix) {
                    0
                } else if !segment.is_empty() && (label.starts_with(segment) || insert.starts_with(segment)) {
                    1
                } else if !segment.is_empty() && (label.contains(segment) || insert.contains(segment)) {
                    5
                } else {
                    15
                };
            }
            (score * 100 + i64::try_from(idx).unwrap_or(i64::MAX), cand.item)
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked
        .into_iter()
        .take(max_items)
        .enumerate()
        .map(|(i, (_, mut item))| {
            item.sort_text = format!("{i:03}");
            item
        })
        .collect()
}
