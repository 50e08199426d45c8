//! Policy compilation: the validator seam between statement text and the
//! compiled [`RuleSet`].
//!
//! The control plane talks to its validator through [`PolicyCompiler`] so
//! the grammar implementation can be swapped; [`StatementCompiler`] is the
//! built-in implementation covering the statement subset the plane emits.

mod error;
mod parse;
mod split;
mod watch;

use std::io::Write as _;
use std::path::Path;

pub use error::{SyntaxError, CODE_IO, CODE_PARSE};
pub use split::{dedupe_statements, extract_statements, strip_line_comment};
pub use watch::{PolicyWatcher, WatchHandle};

use crate::rules::RuleSet;

/// Permissive baseline policy installed when no policy file exists yet.
pub const DEFAULT_POLICY: &str = r#"permit (principal, action in [Action::"FileOpen", Action::"FileOpenReadOnly", Action::"FileOpenReadWrite"], resource)
when { resource in [ Dir::"/" ] };
permit (principal, action == Action::"ProcessExec", resource)
when { resource in [ Dir::"/" ] };
permit (principal, action == Action::"NetworkConnect", resource)
when { resource in [ Host::"*" ] };
"#;

/// Result of compiling policy source.
#[derive(Debug, Clone)]
pub struct Compilation {
    /// The merged, deduplicated rule set.
    pub rules: RuleSet,
    /// Number of distinct statements in the source.
    pub statement_count: usize,
}

/// Validator contract the control plane compiles through.
pub trait PolicyCompiler: Send + Sync {
    /// Compile full policy source. `file` labels diagnostics.
    ///
    /// # Errors
    ///
    /// Returns a [`SyntaxError`] describing the first failure.
    fn compile(&self, source: &str, file: &str) -> Result<Compilation, SyntaxError>;

    /// Compile a single statement in isolation, for per-line views.
    ///
    /// # Errors
    ///
    /// Returns a [`SyntaxError`] describing the first failure.
    fn compile_one(&self, statement: &str) -> Result<RuleSet, SyntaxError>;

    /// The baseline policy source for a fresh installation.
    fn default_source(&self) -> String;

    /// Make sure a policy file exists at `path`, writing the baseline
    /// policy atomically if it does not, and return its contents.
    ///
    /// # Errors
    ///
    /// Returns an I/O-coded [`SyntaxError`] if the file cannot be read or
    /// created.
    fn ensure_default_file(&self, path: &Path) -> Result<String, SyntaxError>;
}

/// Built-in compiler for the emitted statement subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementCompiler;

impl StatementCompiler {
    /// Create a compiler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PolicyCompiler for StatementCompiler {
    fn compile(&self, source: &str, file: &str) -> Result<Compilation, SyntaxError> {
        let rules = parse::compile_source(source, file)?;
        let statement_count = dedupe_statements(extract_statements(source)).len();
        Ok(Compilation { rules, statement_count })
    }

    fn compile_one(&self, statement: &str) -> Result<RuleSet, SyntaxError> {
        parse::compile_statement(statement, "<statement>")
    }

    fn default_source(&self) -> String {
        DEFAULT_POLICY.to_string()
    }

    fn ensure_default_file(&self, path: &Path) -> Result<String, SyntaxError> {
        let label = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_atomic(path, DEFAULT_POLICY)
                    .map_err(|e| SyntaxError::io(&label, e.to_string()))?;
                tracing::debug!(path = %label, "wrote baseline policy file");
                Ok(DEFAULT_POLICY.to_string())
            }
            Err(e) => Err(SyntaxError::io(&label, e.to_string())),
        }
    }
}

/// Atomic write protocol: temp file in the target directory, restrictive
/// permissions, `sync_all`, then rename over the destination.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(temp.path(), perms)?;
    }
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_compiles_permissive() {
        let compiler = StatementCompiler::new();
        let compilation = compiler.compile(DEFAULT_POLICY, "<default>").unwrap();
        assert_eq!(compilation.statement_count, 3);
        assert!(compilation.rules.connect_default_allow);
        assert_eq!(compilation.rules.open.len(), 3);
        assert_eq!(compilation.rules.exec.len(), 1);
        assert!(!compilation.rules.connect_grants_nothing());
    }

    #[test]
    fn test_ensure_default_file_creates_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.txt");
        let compiler = StatementCompiler::new();
        let first = compiler.ensure_default_file(&path).unwrap();
        assert_eq!(first, DEFAULT_POLICY);
        std::fs::write(&path, "forbid (principal, action, resource);").unwrap();
        let second = compiler.ensure_default_file(&path).unwrap();
        assert!(second.starts_with("forbid"));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p");
        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
