//! Resource hints feeding the completion engine.
//!
//! Hints are merged from four tiers, strongest first: identifiers already
//! committed in the active rule set, the protocol interception layer's
//! recent observations, event telemetry, and finally anything the client
//! supplied with the completion request. Later tiers only add entries the
//! earlier tiers did not already contribute (case-insensitive), and each
//! category is capped.

use serde::{Deserialize, Serialize};

use crate::rules::RuleSet;

/// Known resource identifiers offered as completion candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Hints {
    /// MCP server hosts.
    pub servers: Vec<String>,
    /// MCP tool names.
    pub tools: Vec<String>,
    /// Network hostnames.
    pub hosts: Vec<String>,
    /// HTTP header names.
    pub headers: Vec<String>,
    /// File paths.
    pub files: Vec<String>,
    /// Directory paths.
    pub dirs: Vec<String>,
}

/// Source of recently observed MCP traffic.
pub trait ProtocolObserver: Send + Sync {
    /// Server hosts seen recently, most recent first.
    fn recent_servers(&self) -> Vec<String>;
    /// Tool names seen recently, most recent first.
    fn recent_tools(&self) -> Vec<String>;
}

/// Source of recently observed network telemetry.
pub trait TelemetryObserver: Send + Sync {
    /// Hostnames seen recently, most recent first.
    fn recent_hosts(&self) -> Vec<String>;
    /// Header names seen recently, most recent first.
    fn recent_headers(&self) -> Vec<String>;
}

/// Merges hint tiers under a per-category cap.
#[derive(Debug, Clone, Copy)]
pub struct HintAggregator {
    per_category: usize,
}

impl HintAggregator {
    /// Create an aggregator keeping at most `per_category` entries in
    /// each hint category.
    #[must_use]
    pub const fn new(per_category: usize) -> Self {
        Self { per_category }
    }

    /// Merge all tiers for the given committed rule set.
    #[must_use]
    pub fn aggregate(
        &self,
        committed: &RuleSet,
        protocol: Option<&dyn ProtocolObserver>,
        telemetry: Option<&dyn TelemetryObserver>,
        client: &Hints,
    ) -> Hints {
        let mut out = Hints::default();
        self.merge_committed(&mut out, committed);
        if let Some(protocol) = protocol {
            merge(&mut out.servers, protocol.recent_servers(), self.per_category);
            merge(&mut out.tools, protocol.recent_tools(), self.per_category);
        }
        if let Some(telemetry) = telemetry {
            merge(&mut out.hosts, telemetry.recent_hosts(), self.per_category);
            merge(&mut out.headers, telemetry.recent_headers(), self.per_category);
        }
        merge(&mut out.servers, client.servers.clone(), self.per_category);
        merge(&mut out.tools, client.tools.clone(), self.per_category);
        merge(&mut out.hosts, client.hosts.clone(), self.per_category);
        merge(&mut out.headers, client.headers.clone(), self.per_category);
        merge(&mut out.files, client.files.clone(), self.per_category);
        merge(&mut out.dirs, client.dirs.clone(), self.per_category);
        out
    }

    fn merge_committed(&self, out: &mut Hints, committed: &RuleSet) {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for rule in committed.open.iter().chain(&committed.exec) {
            if let Some(path) = &rule.path {
                if rule.is_directory {
                    dirs.push(path.clone());
                } else {
                    files.push(path.clone());
                }
            }
        }
        let hosts: Vec<String> = committed
            .connect
            .iter()
            .filter_map(|r| r.hostname.clone())
            .filter(|h| h != "*")
            .collect();
        merge(&mut out.files, files, self.per_category);
        merge(&mut out.dirs, dirs, self.per_category);
        merge(&mut out.hosts, hosts, self.per_category);
        merge(
            &mut out.servers,
            committed.protocol_calls.iter().map(|c| c.server.clone()).collect(),
            self.per_category,
        );
        merge(
            &mut out.tools,
            committed.protocol_calls.iter().filter_map(|c| c.tool.clone()).collect(),
            self.per_category,
        );
        merge(
            &mut out.headers,
            committed.header_rewrites.iter().map(|r| r.header.clone()).collect(),
            self.per_category,
        );
    }
}

fn merge(into: &mut Vec<String>, additions: Vec<String>, cap: usize) {
    for value in additions {
        if into.len() >= cap {
            break;
        }
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if into.iter().any(|v| v.eq_ignore_ascii_case(trimmed)) {
            continue;
        }
        into.push(trimmed.to_string());
    }
    into.truncate(cap);
}
