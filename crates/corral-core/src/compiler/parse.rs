//! Parser and lowering for the policy statement subset.
//!
//! Statements follow the `permit`/`forbid` head form with an optional
//! `when` clause:
//!
//! ```text
//! permit (principal, action == Action::"NetworkConnect", resource)
//! when { resource in [ Host::"example.com" ] };
//! ```
//!
//! Lowering turns each statement into [`RuleSet`] entries. Wildcard host
//! rules (`Host::"*"`) are folded into the connect default posture after
//! all statements are lowered.

use crate::compiler::error::SyntaxError;
use crate::rules::{Effect, HeaderRewriteRule, Operation, ProtocolRule, Rule, RuleSet};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    EqEq,
    AndAnd,
    Dot,
    PathSep,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    col: usize,
}

struct Lexer<'a> {
    source: &'a str,
    file: &'a str,
}

impl<'a> Lexer<'a> {
    fn tokenize(&self) -> Result<Vec<Token>, SyntaxError> {
        let mut out = Vec::new();
        let mut line = 1usize;
        let mut col = 1usize;
        let mut chars = self.source.chars().peekable();
        while let Some(&ch) = chars.peek() {
            let (tline, tcol) = (line, col);
            match ch {
                '\n' => {
                    chars.next();
                    line += 1;
                    col = 1;
                }
                c if c.is_whitespace() => {
                    chars.next();
                    col += 1;
                }
                '/' => {
                    chars.next();
                    col += 1;
                    if chars.peek() == Some(&'/') {
                        // line comment: consume to end of line
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                                col = 1;
                                break;
                            }
                        }
                    } else {
                        return Err(self.err(tline, tcol, "unexpected `/`"));
                    }
                }
                '"' => {
                    chars.next();
                    col += 1;
                    let mut value = String::new();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        col += 1;
                        match c {
                            '\\' => {
                                if let Some(esc) = chars.next() {
                                    col += 1;
                                    match esc {
                                        '"' => value.push('"'),
                                        '\\' => value.push('\\'),
                                        'n' => value.push('\n'),
                                        other => {
                                            value.push('\\');
                                            value.push(other);
                                        }
                                    }
                                }
                            }
                            '"' => {
                                closed = true;
                                break;
                            }
                            '\n' => break,
                            other => value.push(other),
                        }
                    }
                    if !closed {
                        return Err(self.err(tline, tcol, "unterminated string literal"));
                    }
                    out.push(Token { tok: Tok::Str(value), line: tline, col: tcol });
                }
                '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';' | '.' => {
                    chars.next();
                    col += 1;
                    let tok = match ch {
                        '(' => Tok::LParen,
                        ')' => Tok::RParen,
                        '[' => Tok::LBracket,
                        ']' => Tok::RBracket,
                        '{' => Tok::LBrace,
                        '}' => Tok::RBrace,
                        ',' => Tok::Comma,
                        ';' => Tok::Semi,
                        _ => Tok::Dot,
                    };
                    out.push(Token { tok, line: tline, col: tcol });
                }
                '=' => {
                    chars.next();
                    col += 1;
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        col += 1;
                        out.push(Token { tok: Tok::EqEq, line: tline, col: tcol });
                    } else {
                        return Err(self.err(tline, tcol, "expected `==`"));
                    }
                }
                '&' => {
                    chars.next();
                    col += 1;
                    if chars.peek() == Some(&'&') {
                        chars.next();
                        col += 1;
                        out.push(Token { tok: Tok::AndAnd, line: tline, col: tcol });
                    } else {
                        return Err(self.err(tline, tcol, "expected `&&`"));
                    }
                }
                ':' => {
                    chars.next();
                    col += 1;
                    if chars.peek() == Some(&':') {
                        chars.next();
                        col += 1;
                        out.push(Token { tok: Tok::PathSep, line: tline, col: tcol });
                    } else {
                        return Err(self.err(tline, tcol, "expected `::`"));
                    }
                }
                c if c.is_alphanumeric() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            ident.push(c);
                            chars.next();
                            col += 1;
                        } else {
                            break;
                        }
                    }
                    out.push(Token { tok: Tok::Ident(ident), line: tline, col: tcol });
                }
                other => {
                    return Err(self.err(tline, tcol, format!("unexpected `{other}`")));
                }
            }
        }
        Ok(out)
    }

    fn err(&self, line: usize, col: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::parse(self.source, self.file, line, col, message)
    }
}

/// Action family named by an `action` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    Open,
    Read,
    Write,
    Exec,
    Connect,
    Rewrite,
    Protocol,
    Any,
}

/// Resource named in the head or a `when` list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    File(String),
    Dir(String),
    Host(String),
    DnsZone(String),
    McpServer(String),
    McpTool(String),
    Any,
}

#[derive(Debug, Clone)]
struct Statement {
    effect: Effect,
    actions: Vec<ActionKind>,
    resources: Vec<Resource>,
    context: Vec<(String, String)>,
    line: usize,
    col: usize,
}

struct Parser<'a> {
    source: &'a str,
    file: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eof_pos(&self) -> (usize, usize) {
        self.tokens
            .last()
            .map_or((1, 1), |t| (t.line, t.col))
    }

    fn err_here(&self, message: impl Into<String>) -> SyntaxError {
        let (line, col) = self
            .peek()
            .map_or_else(|| self.eof_pos(), |t| (t.line, t.col));
        SyntaxError::parse(self.source, self.file, line, col, message)
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), SyntaxError> {
        if matches!(self.peek(), Some(t) if t.tok == *tok) {
            self.next();
            Ok(())
        } else {
            Err(self.err_here(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), SyntaxError> {
        if matches!(self.peek(), Some(Token { tok: Tok::Ident(w), .. }) if w == word) {
            self.next();
            Ok(())
        } else {
            Err(self.err_here(format!("expected `{word}`")))
        }
    }

    fn parse_all(&mut self) -> Result<Vec<Statement>, SyntaxError> {
        let mut statements = Vec::new();
        while self.peek().is_some() {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let head = self
            .next()
            .ok_or_else(|| self.err_here("unexpected end of input"))?;
        let effect = match &head.tok {
            Tok::Ident(w) if w == "permit" => Effect::Allow,
            Tok::Ident(w) if w == "forbid" => Effect::Deny,
            _ => {
                return Err(SyntaxError::parse(
                    self.source,
                    self.file,
                    head.line,
                    head.col,
                    "expected `permit` or `forbid`",
                ))
            }
        };
        self.expect(&Tok::LParen, "`(`")?;
        self.expect_ident("principal")?;
        self.expect(&Tok::Comma, "`,`")?;
        let actions = self.parse_action_clause()?;
        self.expect(&Tok::Comma, "`,`")?;
        let mut resources = self.parse_resource_clause()?;
        self.expect(&Tok::RParen, "`)`")?;
        let mut context = Vec::new();
        if matches!(self.peek(), Some(Token { tok: Tok::Ident(w), .. }) if w == "when") {
            self.next();
            let (when_resources, when_context) = self.parse_when_block()?;
            if !when_resources.is_empty() {
                resources.retain(|r| *r != Resource::Any);
                resources.extend(when_resources);
            }
            context = when_context;
        }
        self.expect(&Tok::Semi, "`;`")?;
        Ok(Statement {
            effect,
            actions,
            resources,
            context,
            line: head.line,
            col: head.col,
        })
    }

    fn parse_action_clause(&mut self) -> Result<Vec<ActionKind>, SyntaxError> {
        self.expect_ident("action")?;
        match self.peek().map(|t| t.tok.clone()) {
            Some(Tok::EqEq) => {
                self.next();
                Ok(vec![self.parse_action_entity()?])
            }
            Some(Tok::Ident(w)) if w == "in" => {
                self.next();
                self.expect(&Tok::LBracket, "`[`")?;
                let mut kinds = Vec::new();
                loop {
                    kinds.push(self.parse_action_entity()?);
                    match self.peek().map(|t| t.tok.clone()) {
                        Some(Tok::Comma) => {
                            self.next();
                        }
                        Some(Tok::RBracket) => {
                            self.next();
                            break;
                        }
                        _ => return Err(self.err_here("expected `]`")),
                    }
                }
                Ok(kinds)
            }
            _ => Ok(vec![ActionKind::Any]),
        }
    }

    fn parse_entity_path(&mut self) -> Result<(Vec<String>, String), SyntaxError> {
        let mut segments = Vec::new();
        loop {
            match self.next().map(|t| t.tok) {
                Some(Tok::Ident(seg)) => segments.push(seg),
                _ => return Err(self.err_here("expected entity type")),
            }
            self.expect(&Tok::PathSep, "`::`")?;
            match self.peek().map(|t| t.tok.clone()) {
                Some(Tok::Str(value)) => {
                    self.next();
                    return Ok((segments, value));
                }
                Some(Tok::Ident(_)) => {}
                _ => return Err(self.err_here("expected string literal")),
            }
        }
    }

    fn parse_action_entity(&mut self) -> Result<ActionKind, SyntaxError> {
        let at = self.peek().map(|t| (t.line, t.col));
        let (segments, name) = self.parse_entity_path()?;
        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let kind = match (segs.as_slice(), name.as_str()) {
            (["Action"], "FileOpen") => ActionKind::Open,
            (["Action"], "FileOpenReadOnly") | (["Fs"], "ReadFile" | "ListDir") => ActionKind::Read,
            (["Action"], "FileOpenReadWrite") | (["Fs"], "WriteFile" | "CreateFileUnder") => {
                ActionKind::Write
            }
            (["Action"], "ProcessExec") | (["Proc"], "Exec") => ActionKind::Exec,
            (["Action"], "NetworkConnect") | (["Net"], "Connect") => ActionKind::Connect,
            (["Action"], "HttpRewrite") => ActionKind::Rewrite,
            (["Action"], "McpCall") => ActionKind::Protocol,
            _ => {
                let (line, col) = at.unwrap_or((1, 1));
                return Err(SyntaxError::parse(
                    self.source,
                    self.file,
                    line,
                    col,
                    format!("unknown action `{}::\"{name}\"`", segments.join("::")),
                ));
            }
        };
        Ok(kind)
    }

    fn parse_resource_clause(&mut self) -> Result<Vec<Resource>, SyntaxError> {
        self.expect_ident("resource")?;
        if matches!(self.peek(), Some(Token { tok: Tok::EqEq, .. })) {
            self.next();
            return Ok(vec![self.parse_resource_entity()?]);
        }
        Ok(vec![Resource::Any])
    }

    fn parse_resource_entity(&mut self) -> Result<Resource, SyntaxError> {
        let at = self.peek().map(|t| (t.line, t.col));
        let (segments, value) = self.parse_entity_path()?;
        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let resource = match segs.as_slice() {
            ["File"] | ["Fs", "File"] => Resource::File(value),
            ["Dir"] | ["Fs", "Dir"] => Resource::Dir(value),
            ["Host"] | ["Net", "Hostname"] => Resource::Host(value),
            ["Net", "DnsZone"] => Resource::DnsZone(value),
            ["MCP", "Server"] => Resource::McpServer(value),
            ["MCP", "Tool"] => Resource::McpTool(value),
            _ => {
                let (line, col) = at.unwrap_or((1, 1));
                return Err(SyntaxError::parse(
                    self.source,
                    self.file,
                    line,
                    col,
                    format!("unknown resource type `{}`", segments.join("::")),
                ));
            }
        };
        Ok(resource)
    }

    #[allow(clippy::type_complexity)]
    fn parse_when_block(
        &mut self,
    ) -> Result<(Vec<Resource>, Vec<(String, String)>), SyntaxError> {
        self.expect(&Tok::LBrace, "`{`")?;
        let mut resources = Vec::new();
        let mut context = Vec::new();
        loop {
            match self.peek().map(|t| t.tok.clone()) {
                Some(Tok::Ident(w)) if w == "resource" => {
                    self.next();
                    self.expect_ident("in")?;
                    self.expect(&Tok::LBracket, "`[`")?;
                    loop {
                        resources.push(self.parse_resource_entity()?);
                        match self.peek().map(|t| t.tok.clone()) {
                            Some(Tok::Comma) => {
                                self.next();
                            }
                            Some(Tok::RBracket) => {
                                self.next();
                                break;
                            }
                            _ => return Err(self.err_here("expected `]`")),
                        }
                    }
                }
                Some(Tok::Ident(w)) if w == "context" => {
                    self.next();
                    self.expect(&Tok::Dot, "`.`")?;
                    let key = match self.next().map(|t| t.tok) {
                        Some(Tok::Ident(k)) => k,
                        _ => return Err(self.err_here("expected context key")),
                    };
                    self.expect(&Tok::EqEq, "`==`")?;
                    let value = match self.next().map(|t| t.tok) {
                        Some(Tok::Str(v)) => v,
                        _ => return Err(self.err_here("expected string literal")),
                    };
                    context.push((key, value));
                }
                _ => return Err(self.err_here("expected condition")),
            }
            match self.peek().map(|t| t.tok.clone()) {
                Some(Tok::AndAnd) => {
                    self.next();
                }
                Some(Tok::RBrace) => {
                    self.next();
                    break;
                }
                _ => return Err(self.err_here("expected `}`")),
            }
        }
        Ok((resources, context))
    }
}

/// Compile full policy source into a merged rule set.
pub fn compile_source(source: &str, file: &str) -> Result<RuleSet, SyntaxError> {
    let lexer = Lexer { source, file };
    let tokens = lexer.tokenize()?;
    let mut parser = Parser { source, file, tokens, pos: 0 };
    let statements = parser.parse_all()?;
    let mut set = RuleSet::default();
    for stmt in &statements {
        let fragment = lower_statement(source, file, stmt)?;
        merge_fragment(&mut set, fragment);
    }
    apply_connect_defaults(&mut set);
    set.dedupe();
    Ok(set)
}

/// Compile a single statement in isolation. Used for per-line views; the
/// connect default posture is still folded so a lone wildcard statement
/// reads back correctly.
pub fn compile_statement(statement: &str, file: &str) -> Result<RuleSet, SyntaxError> {
    compile_source(statement, file)
}

fn merge_fragment(set: &mut RuleSet, fragment: RuleSet) {
    set.open.extend(fragment.open);
    set.exec.extend(fragment.exec);
    set.connect.extend(fragment.connect);
    set.protocol_calls.extend(fragment.protocol_calls);
    set.header_rewrites.extend(fragment.header_rewrites);
}

fn lower_statement(source: &str, file: &str, stmt: &Statement) -> Result<RuleSet, SyntaxError> {
    let mut set = RuleSet::default();
    let err = |message: String| SyntaxError::parse(source, file, stmt.line, stmt.col, message);

    for action in &stmt.actions {
        match action {
            ActionKind::Rewrite => {
                if stmt.effect == Effect::Deny {
                    return Err(err("header rewrites must be permit statements".to_string()));
                }
                let host = context_value(stmt, "hostname")
                    .ok_or_else(|| err("header rewrite requires `context.hostname`".to_string()))?;
                let header = context_value(stmt, "header")
                    .ok_or_else(|| err("header rewrite requires `context.header`".to_string()))?;
                let value = context_value(stmt, "value")
                    .ok_or_else(|| err("header rewrite requires `context.value`".to_string()))?;
                set.header_rewrites.push(HeaderRewriteRule { host, header, value });
            }
            ActionKind::Protocol => {
                let servers: Vec<&String> = stmt
                    .resources
                    .iter()
                    .filter_map(|r| match r {
                        Resource::McpServer(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                let tools: Vec<&String> = stmt
                    .resources
                    .iter()
                    .filter_map(|r| match r {
                        Resource::McpTool(t) => Some(t),
                        _ => None,
                    })
                    .collect();
                if servers.is_empty() {
                    return Err(err("MCP call statements must name a server".to_string()));
                }
                for server in &servers {
                    if tools.is_empty() {
                        set.protocol_calls.push(ProtocolRule {
                            effect: stmt.effect,
                            server: (*server).clone(),
                            tool: None,
                        });
                    } else {
                        for tool in &tools {
                            set.protocol_calls.push(ProtocolRule {
                                effect: stmt.effect,
                                server: (*server).clone(),
                                tool: Some((*tool).clone()),
                            });
                        }
                    }
                    // Refusing a server's tools also closes its transport.
                    if stmt.effect == Effect::Deny && server.contains('.') {
                        set.connect.push(Rule::connect(Effect::Deny, (*server).clone(), 0));
                    }
                }
            }
            file_or_net => {
                for resource in &stmt.resources {
                    lower_plain(&mut set, stmt.effect, *file_or_net, resource);
                }
            }
        }
    }
    Ok(set)
}

fn context_value(stmt: &Statement, key: &str) -> Option<String> {
    stmt.context
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

fn lower_plain(set: &mut RuleSet, effect: Effect, action: ActionKind, resource: &Resource) {
    let file_ops: &[Operation] = match action {
        ActionKind::Open => &[Operation::FileOpen],
        ActionKind::Read => &[Operation::FileOpenReadOnly],
        ActionKind::Write => &[Operation::FileOpenReadWrite],
        ActionKind::Exec => &[Operation::ProcExec],
        ActionKind::Any => &[Operation::FileOpen, Operation::ProcExec],
        _ => &[],
    };
    match resource {
        Resource::File(path) => {
            push_file_rules(set, effect, file_ops, path, false);
        }
        Resource::Dir(path) => {
            let mut dir = path.clone();
            if !dir.ends_with('/') {
                dir.push('/');
            }
            push_file_rules(set, effect, file_ops, &dir, true);
        }
        Resource::Host(host) => {
            if matches!(action, ActionKind::Connect | ActionKind::Any) {
                let (name, port) = split_host_port(host);
                set.connect.push(Rule::connect(effect, name, port));
            }
        }
        Resource::DnsZone(zone) => {
            if matches!(action, ActionKind::Connect | ActionKind::Any) {
                let host = if zone.starts_with("*.") {
                    zone.clone()
                } else {
                    format!("*.{zone}")
                };
                set.connect.push(Rule::connect(effect, host, 0));
            }
        }
        Resource::Any => {
            push_file_rules(set, effect, file_ops, "/", true);
            if matches!(action, ActionKind::Connect | ActionKind::Any) {
                set.connect.push(Rule::connect(effect, "*", 0));
            }
        }
        Resource::McpServer(_) | Resource::McpTool(_) => {}
    }
}

fn push_file_rules(set: &mut RuleSet, effect: Effect, ops: &[Operation], path: &str, is_dir: bool) {
    for op in ops {
        let rule = Rule::file(effect, *op, path, is_dir);
        if *op == Operation::ProcExec {
            set.exec.push(rule);
        } else {
            set.open.push(rule);
        }
    }
}

fn split_host_port(host: &str) -> (String, u16) {
    if let Some((name, port)) = host.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return (name.to_string(), port);
        }
    }
    (host.to_string(), 0)
}

/// Fold wildcard host rules into the connect default posture. A `*` deny
/// wins over a `*` allow; the wildcard rules themselves are removed from
/// the connect family.
fn apply_connect_defaults(set: &mut RuleSet) {
    let mut saw_allow = false;
    let mut saw_deny = false;
    for rule in &set.connect {
        if rule.hostname.as_deref() == Some("*") && rule.port == 0 {
            match rule.effect {
                Effect::Allow => saw_allow = true,
                Effect::Deny => saw_deny = true,
            }
        }
    }
    set.connect
        .retain(|r| !(r.hostname.as_deref() == Some("*") && r.port == 0));
    if saw_deny {
        set.connect_default_allow = false;
        set.connect_default_explicit = true;
    } else if saw_allow {
        set.connect_default_allow = true;
        set.connect_default_explicit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_connect_statement() {
        let set = compile_source(
            r#"permit (principal, action == Action::"NetworkConnect", resource)
when { resource in [ Host::"example.com:443" ] };"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.connect.len(), 1);
        assert_eq!(set.connect[0].hostname.as_deref(), Some("example.com"));
        assert_eq!(set.connect[0].port, 443);
        assert_eq!(set.connect[0].effect, Effect::Allow);
    }

    #[test]
    fn test_compile_action_list_expands_open_variants() {
        let set = compile_source(
            r#"permit (principal, action in [Action::"FileOpen", Action::"FileOpenReadOnly", Action::"FileOpenReadWrite"], resource)
when { resource in [ Dir::"/workspace" ] };"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.open.len(), 3);
        assert!(set.open.iter().all(|r| r.path.as_deref() == Some("/workspace/")));
        assert!(set.open.iter().all(|r| r.is_directory));
    }

    #[test]
    fn test_compile_head_equality_form() {
        let set = compile_source(
            r#"forbid (principal, action == Proc::"Exec", resource == Fs::File::"/usr/bin/curl");"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.exec.len(), 1);
        assert_eq!(set.exec[0].effect, Effect::Deny);
        assert_eq!(set.exec[0].path.as_deref(), Some("/usr/bin/curl"));
    }

    #[test]
    fn test_dns_zone_becomes_wildcard_host() {
        let set = compile_source(
            r#"permit (principal, action == Action::"NetworkConnect", resource)
when { resource in [ Net::DnsZone::"example.com" ] };"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.connect[0].hostname.as_deref(), Some("*.example.com"));
        assert!(set.connect[0].is_wildcard);
    }

    #[test]
    fn test_star_host_sets_connect_default() {
        let set = compile_source(
            r#"permit (principal, action == Action::"NetworkConnect", resource)
when { resource in [ Host::"*" ] };"#,
            "<input>",
        )
        .unwrap();
        assert!(set.connect.is_empty());
        assert!(set.connect_default_allow);
        assert!(set.connect_default_explicit);
    }

    #[test]
    fn test_star_deny_wins_over_star_allow() {
        let set = compile_source(
            r#"permit (principal, action == Action::"NetworkConnect", resource)
when { resource in [ Host::"*" ] };
forbid (principal, action == Action::"NetworkConnect", resource)
when { resource in [ Host::"*" ] };"#,
            "<input>",
        )
        .unwrap();
        assert!(!set.connect_default_allow);
    }

    #[test]
    fn test_mcp_tool_statement() {
        let set = compile_source(
            r#"permit (principal, action == Action::"McpCall", resource == MCP::Tool::"resolve-library-id")
when { resource in [ MCP::Server::"mcp.context7.com" ] };"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.protocol_calls.len(), 1);
        assert_eq!(set.protocol_calls[0].server, "mcp.context7.com");
        assert_eq!(set.protocol_calls[0].tool.as_deref(), Some("resolve-library-id"));
    }

    #[test]
    fn test_mcp_forbid_also_denies_connect() {
        let set = compile_source(
            r#"forbid (principal, action == Action::"McpCall", resource)
when { resource in [ MCP::Server::"mcp.context7.com" ] };"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.protocol_calls.len(), 1);
        assert_eq!(set.protocol_calls[0].effect, Effect::Deny);
        assert_eq!(set.connect.len(), 1);
        assert_eq!(set.connect[0].hostname.as_deref(), Some("mcp.context7.com"));
        assert_eq!(set.connect[0].effect, Effect::Deny);
    }

    #[test]
    fn test_header_rewrite_statement() {
        let set = compile_source(
            r#"permit (principal, action == Action::"HttpRewrite", resource)
when { context.hostname == "api.example.com" && context.header == "Authorization" && context.value == "Bearer t" };"#,
            "<input>",
        )
        .unwrap();
        assert_eq!(set.header_rewrites.len(), 1);
        assert_eq!(set.header_rewrites[0].header, "Authorization");
    }

    #[test]
    fn test_forbid_rewrite_rejected() {
        let err = compile_source(
            r#"forbid (principal, action == Action::"HttpRewrite", resource)
when { context.hostname == "h" && context.header == "H" && context.value == "v" };"#,
            "<input>",
        )
        .unwrap_err();
        assert!(err.message.contains("permit statements"));
    }

    #[test]
    fn test_missing_semicolon_reports_position() {
        let err = compile_source("permit (principal, action, resource)", "<input>").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("expected `;`"));
        assert!(err.suggestion.is_some());
    }

    #[test]
    fn test_unknown_head_keyword() {
        let err = compile_source("allow (principal, action, resource);", "<input>").unwrap_err();
        assert!(err.message.contains("expected `permit` or `forbid`"));
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_escaped_quote_in_path() {
        let set = compile_source(
            "permit (principal, action == Action::\"FileOpen\", resource)\nwhen { resource in [ File::\"/tmp/we\\\"ird\" ] };",
            "<input>",
        )
        .unwrap();
        assert_eq!(set.open[0].path.as_deref(), Some("/tmp/we\"ird"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let set = compile_source(
            "// baseline\npermit (principal, action == Action::\"ProcessExec\", resource)\nwhen { resource in [ Dir::\"/\" ] };",
            "<input>",
        )
        .unwrap();
        assert_eq!(set.exec.len(), 1);
    }
}
