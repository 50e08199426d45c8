//! Statement synthesis from observed workload actions.
//!
//! When an operator approves or refuses an intercepted action, the plane
//! turns that decision into a policy statement. Resource extraction is
//! best effort over the free-form action name; structured fields win over
//! anything parsed out of the name.

mod humanize;

pub use humanize::{render_lines, PolicyLine};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::Effect;

/// Fallback host used when no hostname can be recovered from a network
/// action's name.
const FALLBACK_HOST: &str = "example.com";

/// Kind of intercepted action a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Read access to a file or directory listing.
    #[serde(rename = "file/open")]
    FileOpen,
    /// Write access to a file or creation under a directory.
    #[serde(rename = "file/write")]
    FileWrite,
    /// Process execution.
    #[serde(rename = "proc/exec")]
    ProcExec,
    /// Outbound network connection.
    #[serde(rename = "net/connect")]
    NetConnect,
    /// DNS name resolution.
    #[serde(rename = "dns/resolve")]
    DnsResolve,
    /// MCP protocol tool call.
    #[serde(rename = "mcp/call")]
    McpCall,
}

/// An operator decision over an observed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// What kind of action was observed.
    pub action: ActionKind,
    /// Free-form resource name as reported by the interception layer
    /// (a path, a URL, a hostname, or an MCP call descriptor).
    pub name: String,
    /// Structured MCP server, when the interception layer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Structured MCP tool, when the interception layer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Grant or refuse.
    pub effect: Effect,
}

/// A decision that cannot be turned into a statement.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SynthesisError {
    /// What was missing or malformed.
    pub message: String,
}

impl SynthesisError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Escape a value for embedding in a statement string literal.
#[must_use]
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// FNV-64a over the input bytes. Statement identity hashing.
#[must_use]
pub fn fnv64a(data: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Stable identity for the statement at `sequence` in the deduplicated
/// statement order: `policy-<sequence>-<hash>`.
#[must_use]
pub fn stable_id(sequence: usize, statement: &str) -> String {
    format!("policy-{sequence}-{:x}", fnv64a(statement.trim()))
}

/// Build a policy statement from an operator decision.
///
/// # Errors
///
/// Returns [`SynthesisError`] when the decision names no usable resource
/// (for example an empty path on a file action).
pub fn synthesize(request: &ActionRequest) -> Result<String, SynthesisError> {
    let effect = match request.effect {
        Effect::Allow => "permit",
        Effect::Deny => "forbid",
    };
    match request.action {
        ActionKind::FileOpen | ActionKind::FileWrite => {
            let path = request.name.trim();
            if path.is_empty() {
                return Err(SynthesisError::new("file action carries no path"));
            }
            let is_dir = path.ends_with('/');
            let action = match (request.action, is_dir) {
                (ActionKind::FileOpen, false) => "Fs::\"ReadFile\"",
                (ActionKind::FileOpen, true) => "Fs::\"ListDir\"",
                (ActionKind::FileWrite, false) => "Fs::\"WriteFile\"",
                _ => "Fs::\"CreateFileUnder\"",
            };
            let entity = if is_dir { "Fs::Dir" } else { "Fs::File" };
            Ok(format!(
                "{effect} (principal, action == {action}, resource == {entity}::\"{}\");",
                escape_literal(path)
            ))
        }
        ActionKind::ProcExec => {
            let path = request.name.trim();
            if path.is_empty() {
                return Err(SynthesisError::new("exec action carries no program path"));
            }
            Ok(format!(
                "{effect} (principal, action == Proc::\"Exec\", resource == Fs::File::\"{}\");",
                escape_literal(path)
            ))
        }
        ActionKind::NetConnect | ActionKind::DnsResolve => {
            let host = parse_host_from_name(&request.name).unwrap_or_else(|| FALLBACK_HOST.to_string());
            Ok(format!(
                "{effect} (principal, action == Net::\"Connect\", resource == Net::Hostname::\"{}\");",
                escape_literal(&host)
            ))
        }
        ActionKind::McpCall => {
            let server = request
                .server
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .or_else(|| parse_server_host_from_name(&request.name))
                .unwrap_or_else(|| FALLBACK_HOST.to_string());
            let tool = request
                .tool
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .or_else(|| parse_tool_from_name(&request.name));
            let server = escape_literal(&server);
            match tool {
                Some(tool) => Ok(format!(
                    "{effect} (principal, action == Action::\"McpCall\", resource == MCP::Tool::\"{}\") when {{ resource in [ MCP::Server::\"{server}\" ] }};",
                    escape_literal(&tool)
                )),
                None => Ok(format!(
                    "{effect} (principal, action == Action::\"McpCall\", resource) when {{ resource in [ MCP::Server::\"{server}\" ] }};"
                )),
            }
        }
    }
}

/// Recover a hostname from a free-form name: a URL's host, or the name
/// itself when it already looks like a host. Ports are stripped.
#[must_use]
pub fn parse_host_from_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let after_scheme = name.split_once("://").map_or(name, |(_, rest)| rest);
    let host_port = after_scheme.split(['/', '?', '#']).next().unwrap_or(after_scheme);
    let host = strip_port(host_port);
    if is_host_like(host) {
        Some(host.to_string())
    } else {
        None
    }
}

/// Recover an MCP tool name from a `tool=` token in a free-form name.
#[must_use]
pub fn parse_tool_from_name(name: &str) -> Option<String> {
    token_value(name, "tool=")
}

/// Recover an MCP server host from a `server=` token, falling back to a
/// URL host anywhere in the name.
#[must_use]
pub fn parse_server_host_from_name(name: &str) -> Option<String> {
    if let Some(value) = token_value(name, "server=") {
        let host = value.split_once("://").map_or(value.as_str(), |(_, rest)| rest);
        let host = host.split('/').next().unwrap_or(host);
        return Some(strip_port(host).to_string());
    }
    parse_host_from_name(name)
}

fn token_value(name: &str, prefix: &str) -> Option<String> {
    for token in name.split([' ', ',', ';']) {
        if let Some(value) = token.strip_prefix(prefix) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => name,
        _ => host,
    }
}

fn is_host_like(value: &str) -> bool {
    !value.is_empty()
        && value.contains('.')
        && !value.contains('/')
        && !value.contains(char::is_whitespace)
}
