//! Human-readable rendering of policy statements for the operator UI.

use serde::Serialize;

use crate::compiler::PolicyCompiler;
use crate::rules::{Effect, Operation, RuleSet};
use crate::statement::stable_id;

/// One statement of the editable policy, rendered for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyLine {
    /// Stable identity derived from the statement text and its position.
    pub id: String,
    /// Zero-based position in the deduplicated statement order.
    pub sequence: usize,
    /// Grant or refuse.
    pub effect: Effect,
    /// Human-readable description, e.g. `Allow network connect example.com`.
    pub description: String,
    /// The statement source text, trimmed.
    pub source: String,
}

/// Render deduplicated statements as display lines. Sequence numbers are
/// gap free over the deduplicated order; a statement that fails to
/// compile in isolation still gets a line, described by its raw text.
#[must_use]
pub fn render_lines(statements: &[String], compiler: &dyn PolicyCompiler) -> Vec<PolicyLine> {
    statements
        .iter()
        .enumerate()
        .map(|(sequence, statement)| {
            let source = statement.trim().to_string();
            let (effect, description) = match compiler.compile_one(&source) {
                Ok(rules) => describe(&rules, &source),
                Err(_) => (guess_effect(&source), source.clone()),
            };
            PolicyLine {
                id: stable_id(sequence, &source),
                sequence,
                effect,
                description,
                source,
            }
        })
        .collect()
}

fn guess_effect(source: &str) -> Effect {
    if source.trim_start().starts_with("forbid") {
        Effect::Deny
    } else {
        Effect::Allow
    }
}

/// Describe a single compiled statement: effect label, action phrases in
/// a fixed order, then the resource phrase of the dominant family.
fn describe(rules: &RuleSet, source: &str) -> (Effect, String) {
    let effect = first_effect(rules).unwrap_or_else(|| guess_effect(source));
    let mut phrases: Vec<&str> = Vec::new();
    for op in [Operation::FileOpen, Operation::FileOpenReadOnly, Operation::FileOpenReadWrite] {
        if rules.open.iter().any(|r| r.operation == op) {
            phrases.push(match op {
                Operation::FileOpen => "open files",
                Operation::FileOpenReadOnly => "read files",
                _ => "write files",
            });
        }
    }
    if !rules.exec.is_empty() {
        phrases.push("run processes");
    }
    // An MCP statement may carry companion connect denies; the protocol
    // phrase alone describes it.
    if rules.protocol_calls.is_empty() {
        if !rules.connect.is_empty() || rules.connect_default_explicit {
            phrases.push("network connect");
        }
    } else {
        phrases.push("call");
    }
    if !rules.header_rewrites.is_empty() {
        phrases.push("HTTP rewrite");
    }
    if phrases.is_empty() {
        return (effect, source.to_string());
    }
    let resource = resource_phrase(rules);
    let mut description = format!("{} {}", effect.label(), phrases.join(", "));
    if !resource.is_empty() {
        description.push(' ');
        description.push_str(&resource);
    }
    (effect, description)
}

fn first_effect(rules: &RuleSet) -> Option<Effect> {
    rules
        .open
        .first()
        .or_else(|| rules.exec.first())
        .or_else(|| rules.connect.first())
        .map(|r| r.effect)
        .or_else(|| rules.protocol_calls.first().map(|r| r.effect))
        .or_else(|| {
            if rules.header_rewrites.is_empty() {
                if rules.connect_default_explicit {
                    Some(if rules.connect_default_allow { Effect::Allow } else { Effect::Deny })
                } else {
                    None
                }
            } else {
                Some(Effect::Allow)
            }
        })
}

fn resource_phrase(rules: &RuleSet) -> String {
    if let Some(call) = rules.protocol_calls.first() {
        return match &call.tool {
            Some(tool) => format!("MCP tool {tool} on {}", call.server),
            None => format!("MCP server {}", call.server),
        };
    }
    if let Some(rule) = rules.open.first().or_else(|| rules.exec.first()) {
        if let Some(path) = &rule.path {
            if rule.is_directory {
                if path == "/" {
                    return "any directory".to_string();
                }
                return format!("directory {path}");
            }
            // bare values for single files; only directories get a prefix
            return path.clone();
        }
    }
    if let Some(rule) = rules.connect.first() {
        if let Some(host) = &rule.hostname {
            if host == "*" {
                return "any host".to_string();
            }
            if rule.port != 0 {
                return format!("{host}:{}", rule.port);
            }
            return host.clone();
        }
    }
    if rules.connect_default_explicit
        && rules.open.is_empty()
        && rules.exec.is_empty()
        && rules.header_rewrites.is_empty()
    {
        return "any host".to_string();
    }
    if let Some(rewrite) = rules.header_rewrites.first() {
        return format!("header {} for {}", rewrite.header, rewrite.host);
    }
    String::new()
}
