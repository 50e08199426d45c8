//! Statement splitting and deduplication over raw policy source.

/// Split policy source into individual statements. A statement ends at a
/// `;` that sits outside string literals and outside parentheses,
/// brackets, and braces. Trailing text with no terminator is returned as
/// a final fragment so callers can diagnose it.
#[must_use]
pub fn extract_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for ch in source.chars() {
        current.push(ch);
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ';' if depth <= 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    statements.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => {}
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Drop statements whose trimmed text duplicates an earlier statement,
/// keeping the first occurrence. Line identity and sequence numbering are
/// computed over this deduplicated order.
#[must_use]
pub fn dedupe_statements(statements: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    statements
        .into_iter()
        .filter(|s| seen.insert(s.trim().to_string()))
        .collect()
}

/// Strip `//` line comments outside string literals. Statement text fed
/// to the parser and to identity hashing keeps comments, but context
/// detection for completion wants the bare grammar.
#[must_use]
pub fn strip_line_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            return &line[..i];
        }
        i += 1;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_strings_and_nesting() {
        let src = r#"permit (principal, action, resource) when { resource in [ Host::"a;b" ] };
forbid (principal, action == Action::"NetworkConnect", resource);"#;
        let stmts = extract_statements(src);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("a;b"));
        assert!(stmts[1].starts_with("forbid"));
    }

    #[test]
    fn test_split_keeps_unterminated_tail() {
        let stmts = extract_statements("permit (principal, action, resource);\npermit (principal");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "permit (principal");
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let stmts = dedupe_statements(vec![
            "a;".to_string(),
            "b;".to_string(),
            " a; ".to_string().trim().to_string(),
        ]);
        assert_eq!(stmts, vec!["a;".to_string(), "b;".to_string()]);
    }

    #[test]
    fn test_strip_line_comment_ignores_slashes_in_strings() {
        assert_eq!(strip_line_comment(r#"permit // trailing"#), "permit ");
        assert_eq!(
            strip_line_comment(r#"Host::"http://x" // c"#),
            r#"Host::"http://x" "#
        );
    }
}
