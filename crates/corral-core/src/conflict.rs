//! Contradiction detection across policy statements.
//!
//! Two statements conflict when they attach opposite effects to the exact
//! same resource identity within one operation family. Detection is
//! symmetric in statement order and is applied both to a submission on
//! its own and to a submission against the existing policy.

use std::collections::HashMap;

use thiserror::Error;

use crate::rules::{Effect, RuleSet};

/// A statement paired with its compiled rules, as fed to the detector.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    /// The statement source text.
    pub source: String,
    /// Rules the statement compiles to.
    pub rules: RuleSet,
}

/// Two statements that grant and refuse the same resource.
#[derive(Debug, Clone, Error)]
#[error("conflicting statements for `{resource}`")]
pub struct ConflictError {
    /// Canonical identity of the contested resource, e.g.
    /// `net.send example.com:443`.
    pub resource: String,
    /// The statement seen first.
    pub first: String,
    /// The statement that contradicts it.
    pub second: String,
}

/// Check a set of compiled statements for contradictions.
///
/// # Errors
///
/// Returns the first [`ConflictError`] found, naming both statements.
pub fn detect_conflicts(statements: &[CompiledStatement]) -> Result<(), ConflictError> {
    let mut seen: HashMap<String, (Effect, &str)> = HashMap::new();
    for stmt in statements {
        for (key, effect) in identities(&stmt.rules) {
            match seen.get(&key) {
                Some((prior, first)) if *prior != effect => {
                    return Err(ConflictError {
                        resource: key,
                        first: (*first).to_string(),
                        second: stmt.source.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(key, (effect, stmt.source.as_str()));
                }
            }
        }
    }
    Ok(())
}

/// Resource identities a statement claims, with the effect it attaches.
fn identities(rules: &RuleSet) -> Vec<(String, Effect)> {
    let mut out = Vec::new();
    for rule in rules.open.iter().chain(&rules.exec).chain(&rules.connect) {
        out.push((format!("{} {}", rule.operation.as_str(), rule.target()), rule.effect));
    }
    for call in &rules.protocol_calls {
        let tool = call.tool.as_deref().unwrap_or("*");
        out.push((format!("mcp.call {}/{tool}", call.server), call.effect));
    }
    if rules.connect_default_explicit {
        let effect = if rules.connect_default_allow { Effect::Allow } else { Effect::Deny };
        out.push(("net.send *".to_string(), effect));
    }
    out
}
