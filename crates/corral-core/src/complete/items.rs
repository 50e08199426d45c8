//! Static and hint-derived completion item catalogs.

use crate::hints::Hints;

use super::{Item, ItemKind};

fn item(label: &str, kind: ItemKind, insert: &str, detail: &str, doc: &str) -> Item {
    Item {
        label: label.to_string(),
        kind,
        insert_text: insert.to_string(),
        detail: detail.to_string(),
        documentation: doc.to_string(),
        sort_text: String::new(),
        commit_characters: Vec::new(),
    }
}

fn with_commit(mut it: Item, commit: &[&str]) -> Item {
    it.commit_characters = commit.iter().map(ToString::to_string).collect();
    it
}

const LIST_COMMIT: &[&str] = &[",", "]", ")"];
const PARAM_COMMIT: &[&str] = &[",", ")", ";"];
const ACTION_COMMIT: &[&str] = &[",", ")", ";", "]"];

pub(super) fn keyword_items() -> Vec<Item> {
    vec![
        item("permit", ItemKind::Keyword, "permit", "Allow request when conditions match", "Starts an allow statement."),
        item("forbid", ItemKind::Keyword, "forbid", "Deny request when conditions match", "Starts a deny statement."),
        item("when", ItemKind::Keyword, "when", "Conditional block (positive)", "Adds a positive condition block to a statement."),
        item("unless", ItemKind::Keyword, "unless", "Conditional block (negative)", "Adds a negative condition block to a statement."),
        item("in", ItemKind::Keyword, "in", "Membership operator", "Checks whether a value is a member of a set."),
        item("and", ItemKind::Keyword, "and", "Logical AND", "Combine conditions that must all match."),
        item("or", ItemKind::Keyword, "or", "Logical OR", "Combine conditions where any may match."),
    ]
}

pub(super) fn snippet_items() -> Vec<Item> {
    vec![
        item(
            "permit skeleton",
            ItemKind::Snippet,
            "permit (principal, action, resource) when {\n    ${1:// conditions}\n};",
            "Insert permit skeleton",
            "Creates an allow statement with a placeholder condition block.",
        ),
        item(
            "forbid skeleton",
            ItemKind::Snippet,
            "forbid (principal, action, resource) when {\n    ${1:// conditions}\n};",
            "Insert forbid skeleton",
            "Creates a deny statement template.",
        ),
    ]
}

pub(super) fn statement_snippet_items() -> Vec<Item> {
    vec![
        item(
            "permit statement",
            ItemKind::Snippet,
            "permit (principal, action == ${1:Action::\"NetworkConnect\"}, resource) when {\n    ${2:// conditions}\n};",
            "Insert permit statement",
            "Creates an allow statement with placeholders for the action comparator and conditions.",
        ),
        item(
            "forbid statement",
            ItemKind::Snippet,
            "forbid (principal, action == ${1:Action::\"ProcessExec\"}, resource) when {\n    ${2:// conditions}\n};",
            "Insert forbid statement",
            "Creates a deny statement with placeholders for the action comparator and conditions.",
        ),
    ]
}

pub(super) fn permit_parameter_items() -> Vec<Item> {
    vec![
        with_commit(
            item("principal", ItemKind::Keyword, "principal", "Subject placeholder", "Represents the requesting principal in a statement head."),
            PARAM_COMMIT,
        ),
        with_commit(
            item(
                "action == Action::\"NetworkConnect\"",
                ItemKind::Snippet,
                "action == ${1:Action::\"NetworkConnect\"}",
                "Compare action",
                "Adds an action comparator with a placeholder action identifier.",
            ),
            PARAM_COMMIT,
        ),
        with_commit(
            item("action", ItemKind::Keyword, "action", "Action placeholder", "Represents the action being authorized."),
            PARAM_COMMIT,
        ),
        with_commit(
            item(
                "resource == Host::\"api.example.com\"",
                ItemKind::Snippet,
                "resource == ${1:Host::\"api.example.com\"}",
                "Compare resource",
                "Adds a resource comparator with a placeholder host identifier.",
            ),
            PARAM_COMMIT,
        ),
        with_commit(
            item("resource", ItemKind::Keyword, "resource", "Resource placeholder", "Represents the resource being accessed."),
            PARAM_COMMIT,
        ),
    ]
}

pub(super) fn action_items() -> Vec<Item> {
    let defs: &[(&str, &str, &str)] = &[
        ("Action::\"FileOpen\"", "Allow reading or writing files", "Applies to file open operations."),
        ("Action::\"FileOpenReadOnly\"", "Allow read-only file access", "Restricts the grant to read-only opens."),
        ("Action::\"FileOpenReadWrite\"", "Allow read-write file access", "Enables read and write operations on files."),
        ("Action::\"ProcessExec\"", "Allow process execution", "Controls process execution events."),
        ("Action::\"NetworkConnect\"", "Allow network connections", "Applies to outbound connect operations."),
        ("Action::\"HttpRewrite\"", "Allow HTTP header rewrite", "Applies to HTTP header rewrite rules."),
        ("Action::\"McpCall\"", "Allow or deny MCP call", "Controls MCP tool invocations."),
    ];
    defs.iter()
        .map(|(label, detail, doc)| with_commit(item(label, ItemKind::Action, label, detail, doc), ACTION_COMMIT))
        .collect()
}

pub(super) fn resource_items(hints: &Hints) -> Vec<Item> {
    let mut items = Vec::new();
    for file in &hints.files {
        let file = file.trim();
        if file.is_empty() {
            continue;
        }
        let label = format!("File::\"{file}\"");
        items.push(with_commit(
            item(&label, ItemKind::Resource, &label, "Observed file path", "File observed in active rules or recent events."),
            LIST_COMMIT,
        ));
    }
    for dir in &hints.dirs {
        let dir = dir.trim();
        if dir.is_empty() {
            continue;
        }
        let dir = if dir.ends_with('/') { dir.to_string() } else { format!("{dir}/") };
        let label = format!("Dir::\"{dir}\"");
        items.push(with_commit(
            item(&label, ItemKind::Resource, &label, "Observed directory", "Directory observed in active rules, with trailing slash."),
            LIST_COMMIT,
        ));
    }
    for host in &hints.hosts {
        let host = host.trim();
        if host.is_empty() {
            continue;
        }
        let label = format!("Host::\"{host}\"");
        items.push(with_commit(
            item(&label, ItemKind::Resource, &label, "Observed host", "Host name or host:port observed at runtime."),
            LIST_COMMIT,
        ));
    }
    items.push(with_commit(
        item("File::\"/path\"", ItemKind::Resource, "File::\"/path\"", "Specific file path", "Targets a single file path."),
        LIST_COMMIT,
    ));
    items.push(with_commit(
        item("Dir::\"/path/\"", ItemKind::Resource, "Dir::\"/path/\"", "Directory path (recursive)", "Targets a directory subtree, trailing slash required."),
        LIST_COMMIT,
    ));
    items.push(with_commit(
        item("Host::\"example.com\"", ItemKind::Resource, "Host::\"example.com\"", "Hostname or host:port", "Targets network connections to a host."),
        LIST_COMMIT,
    ));
    items.push(with_commit(
        item("Net::DnsZone::\"example.com\"", ItemKind::Resource, "Net::DnsZone::\"example.com\"", "DNS zone wildcard", "Matches all hosts within the zone; the apex is excluded."),
        LIST_COMMIT,
    ));
    items
}

pub(super) fn mcp_resource_items(hints: &Hints) -> Vec<Item> {
    let mut items = Vec::new();
    for server in &hints.servers {
        let server = server.trim();
        if server.is_empty() {
            continue;
        }
        let label = format!("MCP::Server::\"{server}\"");
        items.push(with_commit(
            item(&label, ItemKind::Server, &label, "Observed MCP server", "MCP server identifier observed at runtime."),
            LIST_COMMIT,
        ));
    }
    for tool in &hints.tools {
        let tool = tool.trim();
        if tool.is_empty() {
            continue;
        }
        let label = format!("MCP::Tool::\"{tool}\"");
        items.push(with_commit(
            item(&label, ItemKind::Tool, &label, "Observed MCP tool", "MCP tool identifier observed at runtime."),
            LIST_COMMIT,
        ));
    }
    items.push(with_commit(
        item("MCP::Server::\"server\"", ItemKind::Server, "MCP::Server::\"$1\"", "Specific MCP server", "Targets an MCP server identifier."),
        LIST_COMMIT,
    ));
    items.push(with_commit(
        item("MCP::Tool::\"tool\"", ItemKind::Tool, "MCP::Tool::\"$1\"", "Specific MCP tool", "Targets an MCP tool identifier."),
        LIST_COMMIT,
    ));
    items
}

pub(super) fn http_rewrite_snippet_items() -> Vec<Item> {
    vec![item(
        "HttpRewrite snippet",
        ItemKind::Snippet,
        "context.header == \"${1:X-Header}\"\n    context.value == \"${2:value}\"",
        "Insert HttpRewrite header/value conditions",
        "Adds context.header and context.value comparisons for rewrite statements.",
    )]
}

pub(super) fn context_key_items() -> Vec<Item> {
    vec![
        item("context.hostname", ItemKind::ConditionKey, "context.hostname", "Hostname from the request context", "Matches against the request hostname."),
        item("context.header", ItemKind::ConditionKey, "context.header", "HTTP header key in rewrite context", "References the header name during rewrite evaluation."),
        item("context.value", ItemKind::ConditionKey, "context.value", "HTTP header value in rewrite context", "References the header value during rewrite evaluation."),
    ]
}

pub(super) fn http_rewrite_context_items(hints: &Hints) -> Vec<Item> {
    let mut items = Vec::new();
    for header in &hints.headers {
        let header = header.trim();
        if header.is_empty() {
            continue;
        }
        let label = format!("\"{header}\"");
        items.push(with_commit(
            item(&label, ItemKind::Header, &label, "Observed header", "Header observed in runtime events."),
            LIST_COMMIT,
        ));
    }
    items.push(with_commit(
        item("\"X-Header\"", ItemKind::Header, "\"${1:X-Header}\"", "Header placeholder", "Specify the header name being rewritten."),
        LIST_COMMIT,
    ));
    items
}
