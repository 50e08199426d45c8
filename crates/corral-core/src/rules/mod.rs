//! Rule model for the policy control plane.
//!
//! Rules are the compiled, enforcement-ready form of policy statements.
//! Each rule carries an effect, an operation family, and exactly one
//! resource target (a filesystem path or a network hostname). Protocol
//! call rules and header rewrite rules cover the MCP and HTTP rewrite
//! families, which do not fit the path/hostname shape.

use serde::{Deserialize, Serialize};

/// Whether a rule grants or refuses the operation it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// The operation is refused.
    Deny,
    /// The operation is granted.
    Allow,
}

impl Effect {
    /// Canonical lowercase label (`allow` / `deny`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }

    /// Human-readable label (`Allow` / `Deny`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// Operation family a rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Open a file for any access.
    FileOpen,
    /// Open a file read-only.
    FileOpenReadOnly,
    /// Open a file for writing.
    FileOpenReadWrite,
    /// Execute a process image.
    ProcExec,
    /// Open an outbound network connection.
    NetConnect,
}

impl Operation {
    /// Canonical operation token used in rendered rule lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::FileOpen => "file.open",
            Operation::FileOpenReadOnly => "file.open:ro",
            Operation::FileOpenReadWrite => "file.open:rw",
            Operation::ProcExec => "proc.exec",
            Operation::NetConnect => "net.send",
        }
    }

    /// True for the three file-open variants.
    #[must_use]
    pub const fn is_file_open(self) -> bool {
        matches!(
            self,
            Operation::FileOpen | Operation::FileOpenReadOnly | Operation::FileOpenReadWrite
        )
    }
}

/// A single compiled rule targeting a path or a hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Grant or refuse.
    pub effect: Effect,
    /// Operation family.
    pub operation: Operation,
    /// Filesystem target for `file.open*` and `proc.exec` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether `path` names a directory subtree rather than a single file.
    #[serde(default)]
    pub is_directory: bool,
    /// Network target for `net.send` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Port restriction for `net.send` rules; 0 means any port.
    #[serde(default)]
    pub port: u16,
    /// Whether `hostname` carries a leading wildcard label.
    #[serde(default)]
    pub is_wildcard: bool,
}

impl Rule {
    /// Build a filesystem rule.
    #[must_use]
    pub fn file(effect: Effect, operation: Operation, path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            effect,
            operation,
            path: Some(path.into()),
            is_directory,
            hostname: None,
            port: 0,
            is_wildcard: false,
        }
    }

    /// Build a network connect rule. A `*.` prefix on the hostname marks a
    /// wildcard match over subdomain labels.
    #[must_use]
    pub fn connect(effect: Effect, hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        let is_wildcard = hostname.starts_with("*.") || hostname == "*";
        Self {
            effect,
            operation: Operation::NetConnect,
            path: None,
            is_directory: false,
            hostname: Some(hostname),
            port,
            is_wildcard,
        }
    }

    /// Resource target of this rule as rendered in canonical lines.
    #[must_use]
    pub fn target(&self) -> String {
        if let Some(path) = &self.path {
            return path.clone();
        }
        if let Some(host) = &self.hostname {
            if self.port != 0 {
                return format!("{host}:{}", self.port);
            }
            return host.clone();
        }
        String::new()
    }

    /// Canonical rendering, e.g. `allow file.open:ro /etc/hosts`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{} {} {}", self.effect.as_str(), self.operation.as_str(), self.target())
    }
}

/// A protocol-level call rule (MCP server, optionally a single tool).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolRule {
    /// Grant or refuse.
    pub effect: Effect,
    /// Server the rule applies to.
    pub server: String,
    /// Specific tool on that server; `None` covers every tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl ProtocolRule {
    /// Canonical rendering, e.g. `allow mcp.call server/tool`.
    #[must_use]
    pub fn canonical(&self) -> String {
        match &self.tool {
            Some(tool) => format!("{} mcp.call {}/{}", self.effect.as_str(), self.server, tool),
            None => format!("{} mcp.call {}", self.effect.as_str(), self.server),
        }
    }
}

/// An HTTP header rewrite rule. Rewrites are grant-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderRewriteRule {
    /// Hostname whose outbound requests are rewritten.
    pub host: String,
    /// Header name to set.
    pub header: String,
    /// Replacement header value.
    pub value: String,
}

impl HeaderRewriteRule {
    /// Canonical rendering, e.g. `allow http.rewrite host header`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("allow http.rewrite {} {}", self.host, self.header)
    }
}

/// A full compiled rule set grouped by operation family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// File open rules (all three open variants).
    pub open: Vec<Rule>,
    /// Process execution rules.
    pub exec: Vec<Rule>,
    /// Network connect rules.
    pub connect: Vec<Rule>,
    /// MCP protocol call rules.
    pub protocol_calls: Vec<ProtocolRule>,
    /// HTTP header rewrite rules.
    pub header_rewrites: Vec<HeaderRewriteRule>,
    /// Default posture for connects that match no rule.
    pub connect_default_allow: bool,
    /// Whether the connect default was stated explicitly (a `*` host rule)
    /// rather than implied.
    pub connect_default_explicit: bool,
}

impl RuleSet {
    /// True when no family holds any rule and no explicit connect
    /// default was stated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
            && self.exec.is_empty()
            && self.connect.is_empty()
            && self.protocol_calls.is_empty()
            && self.header_rewrites.is_empty()
            && !self.connect_default_explicit
    }

    /// True when the connect family grants nothing: no allow rule and a
    /// deny default. Committing such a set would cut all egress.
    #[must_use]
    pub fn connect_grants_nothing(&self) -> bool {
        !self.connect_default_allow && !self.connect.iter().any(|r| r.effect == Effect::Allow)
    }

    /// Remove duplicate rules within each family, keeping first occurrence.
    /// Connect rules are additionally reordered so denies precede allows,
    /// matching enforcement evaluation order.
    pub fn dedupe(&mut self) {
        dedupe_rules(&mut self.open);
        dedupe_rules(&mut self.exec);
        dedupe_rules(&mut self.connect);
        self.connect.sort_by_key(|r| match r.effect {
            Effect::Deny => 0u8,
            Effect::Allow => 1u8,
        });
        let mut seen = std::collections::HashSet::new();
        self.protocol_calls.retain(|r| seen.insert(r.clone()));
        let mut seen = std::collections::HashSet::new();
        self.header_rewrites.retain(|r| seen.insert(r.clone()));
    }

    /// Merge another rule set into this one, then dedupe.
    pub fn merge(&mut self, other: RuleSet) {
        self.open.extend(other.open);
        self.exec.extend(other.exec);
        self.connect.extend(other.connect);
        self.protocol_calls.extend(other.protocol_calls);
        self.header_rewrites.extend(other.header_rewrites);
        if other.connect_default_explicit {
            self.connect_default_allow = other.connect_default_allow;
            self.connect_default_explicit = true;
        }
        self.dedupe();
    }

    /// Render the set as ordered canonical lines for display. Within each
    /// family, longer (more specific) targets sort first; ties break
    /// lexicographically. A final line states the connect default.
    #[must_use]
    pub fn canonical_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for family in [&self.open, &self.exec] {
            let mut sorted: Vec<&Rule> = family.iter().collect();
            sort_by_specificity(&mut sorted);
            lines.extend(sorted.iter().map(|r| r.canonical()));
        }
        let mut sorted: Vec<&Rule> = self.connect.iter().filter(|r| !is_star_host(r)).collect();
        sort_by_specificity(&mut sorted);
        lines.extend(sorted.iter().map(|r| r.canonical()));
        lines.extend(self.protocol_calls.iter().map(ProtocolRule::canonical));
        lines.extend(self.header_rewrites.iter().map(HeaderRewriteRule::canonical));
        let default_effect = if self.connect_default_allow { "allow" } else { "deny" };
        lines.push(format!("{default_effect} net.send *"));
        lines
    }

    /// A rule set that grants every operation. Used as the runtime overlay
    /// in permit-all mode.
    #[must_use]
    pub fn permit_all() -> Self {
        Self {
            open: vec![Rule::file(Effect::Allow, Operation::FileOpen, "/", true)],
            exec: vec![Rule::file(Effect::Allow, Operation::ProcExec, "/", true)],
            connect: vec![Rule::connect(Effect::Allow, "*", 0)],
            protocol_calls: Vec::new(),
            header_rewrites: Vec::new(),
            connect_default_allow: true,
            connect_default_explicit: true,
        }
    }
}

fn dedupe_rules(rules: &mut Vec<Rule>) {
    let mut seen = std::collections::HashSet::new();
    rules.retain(|r| seen.insert(r.clone()));
}

fn is_star_host(rule: &Rule) -> bool {
    rule.hostname.as_deref() == Some("*")
}

fn sort_by_specificity(rules: &mut [&Rule]) {
    rules.sort_by(|a, b| {
        let (ta, tb) = (a.target(), b.target());
        tb.len().cmp(&ta.len()).then_with(|| ta.cmp(&tb))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> RuleSet {
        RuleSet {
            open: vec![
                Rule::file(Effect::Allow, Operation::FileOpenReadOnly, "/etc", true),
                Rule::file(Effect::Allow, Operation::FileOpenReadOnly, "/etc/hosts", false),
            ],
            exec: vec![Rule::file(Effect::Allow, Operation::ProcExec, "/usr/bin/git", false)],
            connect: vec![
                Rule::connect(Effect::Allow, "example.com", 443),
                Rule::connect(Effect::Deny, "tracker.example.com", 0),
            ],
            protocol_calls: vec![ProtocolRule {
                effect: Effect::Allow,
                server: "mcp.context7.com".to_string(),
                tool: Some("resolve-library-id".to_string()),
            }],
            header_rewrites: Vec::new(),
            connect_default_allow: false,
            connect_default_explicit: true,
        }
    }

    #[test]
    fn test_canonical_rule_strings() {
        let r = Rule::file(Effect::Allow, Operation::FileOpenReadOnly, "/etc/hosts", false);
        assert_eq!(r.canonical(), "allow file.open:ro /etc/hosts");
        let r = Rule::connect(Effect::Deny, "example.com", 443);
        assert_eq!(r.canonical(), "deny net.send example.com:443");
        let r = Rule::connect(Effect::Allow, "*.example.com", 0);
        assert!(r.is_wildcard);
        assert_eq!(r.canonical(), "allow net.send *.example.com");
    }

    #[test]
    fn test_dedupe_keeps_first_and_orders_connect_denies_first() {
        let mut set = sample_set();
        set.connect.push(Rule::connect(Effect::Allow, "example.com", 443));
        set.open.push(set.open[0].clone());
        set.dedupe();
        assert_eq!(set.open.len(), 2);
        assert_eq!(set.connect.len(), 2);
        assert_eq!(set.connect[0].effect, Effect::Deny);
        assert_eq!(set.connect[1].effect, Effect::Allow);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut set = sample_set();
        let before = {
            let mut s = set.clone();
            s.dedupe();
            s
        };
        set.merge(sample_set());
        assert_eq!(set, before);
    }

    #[test]
    fn test_canonical_lines_sorted_longest_target_first() {
        let lines = sample_set().canonical_lines();
        let etc_hosts = lines.iter().position(|l| l.contains("/etc/hosts")).unwrap();
        let etc = lines.iter().position(|l| l == "allow file.open:ro /etc").unwrap();
        assert!(etc_hosts < etc);
        assert_eq!(lines.last().unwrap(), "deny net.send *");
    }

    #[test]
    fn test_permit_all_grants_connect() {
        let set = RuleSet::permit_all();
        assert!(!set.connect_grants_nothing());
        assert!(!set.is_empty());
    }

    #[test]
    fn test_connect_grants_nothing() {
        let mut set = RuleSet::default();
        set.connect.push(Rule::connect(Effect::Deny, "example.com", 0));
        assert!(set.connect_grants_nothing());
        set.connect.push(Rule::connect(Effect::Allow, "api.example.com", 0));
        assert!(!set.connect_grants_nothing());
    }
}
