//! Control-plane operations over the two-layer policy store.
//!
//! Every mutation runs the same all-or-nothing pipeline: merge the
//! statement text, compile it, check for contradictions, apply the
//! zero-rule and egress guards, persist atomically, swap the in-memory
//! file layer, and notify subscribers. A failure at any stage leaves
//! every prior observable unchanged.

mod error;

pub use error::PlaneError;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::compiler::{
    dedupe_statements, extract_statements, write_atomic, Compilation, PolicyCompiler,
};
use crate::complete::{complete, Item, ReplaceRange, DEFAULT_MAX_ITEMS};
use crate::conflict::{detect_conflicts, CompiledStatement};
use crate::hints::{HintAggregator, Hints, ProtocolObserver, TelemetryObserver};
use crate::rules::RuleSet;
use crate::statement::{render_lines, stable_id, synthesize, ActionRequest, PolicyLine};
use crate::store::{EnforcementMode, PolicyStore, StoreSnapshot};

/// Configuration for a [`ControlPlane`], built once at startup.
#[derive(Debug, Clone)]
pub struct PlaneConfig {
    /// Path of the persisted policy file.
    pub policy_path: PathBuf,
    /// Per-category cap on aggregated completion hints.
    pub hint_cap: usize,
    /// Cap on returned completion items.
    pub max_completion_items: usize,
}

impl PlaneConfig {
    /// Configuration with default caps for the given policy path.
    #[must_use]
    pub fn new(policy_path: impl Into<PathBuf>) -> Self {
        Self {
            policy_path: policy_path.into(),
            hint_cap: 32,
            max_completion_items: DEFAULT_MAX_ITEMS,
        }
    }
}

/// Wire view of the store for clients and subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    /// Current enforcement mode.
    pub mode: EnforcementMode,
    /// Persisted policy source (the file layer's text).
    pub source: String,
    /// Canonical rule lines of the file layer.
    pub file_rules: Vec<String>,
    /// Canonical rule lines of the runtime overlay, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_rules: Option<Vec<String>>,
    /// Canonical rule lines enforcement consults right now.
    pub active_rules: Vec<String>,
}

impl PolicySnapshot {
    fn from_store(snapshot: &StoreSnapshot) -> Self {
        Self {
            mode: snapshot.mode,
            source: snapshot.file_source.clone(),
            file_rules: snapshot.file.canonical_lines(),
            runtime_rules: snapshot.runtime.as_ref().map(RuleSet::canonical_lines),
            active_rules: snapshot.active().canonical_lines(),
        }
    }
}

/// Event name under which snapshot payloads are published.
pub const SNAPSHOT_EVENT: &str = "policy.snapshot";

/// Payload published after every successful mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    /// The post-mutation snapshot.
    pub snapshot: PolicySnapshot,
    /// Humanized statement lines of the file layer.
    pub lines: Vec<PolicyLine>,
}

/// Subscriber notified with the post-change snapshot and lines.
pub trait SnapshotPublisher: Send + Sync {
    /// Deliver a named event payload. Delivery failures are the
    /// publisher's concern; the mutation has already committed.
    fn publish(&self, event: &str, payload: serde_json::Value);
}

/// The policy control plane.
pub struct ControlPlane {
    config: PlaneConfig,
    compiler: Arc<dyn PolicyCompiler>,
    store: PolicyStore,
    aggregator: HintAggregator,
    publisher: Option<Arc<dyn SnapshotPublisher>>,
    protocol: Option<Arc<dyn ProtocolObserver>>,
    telemetry: Option<Arc<dyn TelemetryObserver>>,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    /// Open the plane: make sure the policy file exists (writing the
    /// baseline if not), compile it, and start enforcing it.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::Syntax`] when the existing file does not
    /// compile, [`PlaneError::EmptyRuleSet`] or [`PlaneError::ConnectLockout`]
    /// when it compiles but guards nothing, and a persistence error when
    /// it cannot be read or created.
    pub fn open(config: PlaneConfig, compiler: Arc<dyn PolicyCompiler>) -> Result<Self, PlaneError> {
        let label = config.policy_path.display().to_string();
        let source = compiler.ensure_default_file(&config.policy_path)?;
        let compilation = compiler.compile(&source, &label)?;
        // A hand-edited file that compiles to nothing must not load: the
        // same guards that protect commits protect startup.
        if compilation.rules.is_empty() {
            return Err(PlaneError::EmptyRuleSet);
        }
        if compilation.rules.connect_grants_nothing() {
            return Err(PlaneError::ConnectLockout);
        }
        tracing::info!(path = %label, statements = compilation.statement_count, "policy loaded");
        let aggregator = HintAggregator::new(config.hint_cap);
        Ok(Self {
            config,
            compiler,
            store: PolicyStore::new(compilation.rules, source),
            aggregator,
            publisher: None,
            protocol: None,
            telemetry: None,
        })
    }

    /// Attach a snapshot subscriber.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn SnapshotPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Attach an MCP traffic observer feeding completion hints.
    #[must_use]
    pub fn with_protocol_observer(mut self, observer: Arc<dyn ProtocolObserver>) -> Self {
        self.protocol = Some(observer);
        self
    }

    /// Attach a telemetry observer feeding completion hints.
    #[must_use]
    pub fn with_telemetry_observer(mut self, observer: Arc<dyn TelemetryObserver>) -> Self {
        self.telemetry = Some(observer);
        self
    }

    /// Current snapshot of both layers.
    pub fn snapshot(&self) -> Result<PolicySnapshot, PlaneError> {
        Ok(PolicySnapshot::from_store(&self.store.snapshot()?))
    }

    /// Current enforcement mode.
    pub fn mode(&self) -> Result<EnforcementMode, PlaneError> {
        Ok(self.store.mode()?)
    }

    /// Humanized lines of the persisted policy, one per deduplicated
    /// statement, with stable ids and gap-free sequence numbers.
    pub fn lines(&self) -> Result<Vec<PolicyLine>, PlaneError> {
        let snapshot = self.store.snapshot()?;
        Ok(self.lines_for(&snapshot.file_source))
    }

    fn lines_for(&self, source: &str) -> Vec<PolicyLine> {
        let statements = dedupe_statements(extract_statements(source));
        render_lines(&statements, self.compiler.as_ref())
    }

    /// Replace the entire policy source.
    pub fn replace_source(&self, source: &str) -> Result<PolicySnapshot, PlaneError> {
        let statements = dedupe_statements(extract_statements(source));
        self.commit(statements, None)
    }

    /// Apply a statement patch: remove lines by id, then add statements.
    /// Unknown remove ids are ignored; each `add` entry may carry several
    /// statements. Edits always target the file layer; `apply_mode`
    /// optionally switches the enforcement mode in the same commit, so a
    /// patch written during permit-all can resume enforcement atomically
    /// with a single published event.
    pub fn patch(
        &self,
        add: &[String],
        remove: &[String],
        apply_mode: Option<EnforcementMode>,
    ) -> Result<PolicySnapshot, PlaneError> {
        let snapshot = self.store.snapshot()?;
        let existing = dedupe_statements(extract_statements(&snapshot.file_source));
        let mut kept: Vec<String> = existing
            .iter()
            .enumerate()
            .filter(|(seq, stmt)| !remove.contains(&stable_id(*seq, stmt)))
            .map(|(_, stmt)| stmt.clone())
            .collect();
        for chunk in add {
            kept.extend(extract_statements(chunk));
        }
        self.commit(dedupe_statements(kept), apply_mode)
    }

    /// Turn an operator decision into a statement and add it.
    pub fn add_from_action(&self, request: &ActionRequest) -> Result<PolicySnapshot, PlaneError> {
        let statement = synthesize(request)?;
        self.patch(&[statement], &[], None)
    }

    /// Remove a single line by id. Unlike [`ControlPlane::patch`], an
    /// unknown id is an input error, as is removing the final statement.
    pub fn remove_line(&self, id: &str) -> Result<PolicySnapshot, PlaneError> {
        let snapshot = self.store.snapshot()?;
        let existing = dedupe_statements(extract_statements(&snapshot.file_source));
        let known = existing
            .iter()
            .enumerate()
            .any(|(seq, stmt)| stable_id(seq, stmt) == id);
        if !known {
            return Err(PlaneError::invalid(format!("unknown policy line id `{id}`")));
        }
        if existing.len() == 1 {
            return Err(PlaneError::invalid("cannot remove the final policy statement"));
        }
        self.patch(&[], &[id.to_string()], None)
    }

    /// Enter permit-all: install an allow-everything runtime overlay. The
    /// file layer and its persisted source are untouched.
    pub fn set_permit_all(&self) -> Result<PolicySnapshot, PlaneError> {
        self.store.enter_permit_all(RuleSet::permit_all())?;
        tracing::info!("permit-all mode enabled");
        self.finish()
    }

    /// Resume enforcement of the file layer, dropping the overlay.
    pub fn apply_enforce(&self) -> Result<PolicySnapshot, PlaneError> {
        self.store.resume_enforcement()?;
        tracing::info!("enforcement resumed");
        self.finish()
    }

    /// Context-aware completion over an in-progress editor buffer.
    /// Hints aggregate the committed file-layer rules, the attached
    /// observers, and the client-supplied tier; the permit-all overlay
    /// carries no identifiers worth suggesting.
    pub fn complete(
        &self,
        input: &str,
        line: usize,
        column: usize,
        client_hints: &Hints,
    ) -> Result<(Vec<Item>, ReplaceRange), PlaneError> {
        let snapshot = self.store.snapshot()?;
        let hints = self.aggregator.aggregate(
            &snapshot.file,
            self.protocol.as_deref(),
            self.telemetry.as_deref(),
            client_hints,
        );
        Ok(complete(input, line, column, self.config.max_completion_items, &hints)?)
    }

    /// Shared mutation tail: compile, guard, persist, swap, optionally
    /// switch the enforcement mode, notify.
    fn commit(
        &self,
        statements: Vec<String>,
        apply_mode: Option<EnforcementMode>,
    ) -> Result<PolicySnapshot, PlaneError> {
        let label = self.config.policy_path.display().to_string();
        let mut source = statements.join("\n");
        source.push('\n');

        let compilation: Compilation = self.compiler.compile(&source, &label)?;

        let compiled: Vec<CompiledStatement> = statements
            .iter()
            .map(|stmt| CompiledStatement {
                source: stmt.clone(),
                rules: self.compiler.compile_one(stmt).unwrap_or_default(),
            })
            .collect();
        detect_conflicts(&compiled)?;

        if compilation.rules.is_empty() {
            return Err(PlaneError::EmptyRuleSet);
        }
        if compilation.rules.connect_grants_nothing() {
            return Err(PlaneError::ConnectLockout);
        }

        write_atomic(&self.config.policy_path, &source).map_err(|e| PlaneError::Persistence {
            path: label.clone(),
            message: e.to_string(),
        })?;
        self.store.set_file_layer(compilation.rules, source)?;
        match apply_mode {
            Some(EnforcementMode::Enforce) => self.store.resume_enforcement()?,
            Some(EnforcementMode::PermitAll) => self.store.enter_permit_all(RuleSet::permit_all())?,
            None => {}
        }
        tracing::info!(path = %label, statements = compilation.statement_count, "policy committed");
        self.finish()
    }

    /// Build the post-change snapshot and notify the subscriber.
    fn finish(&self) -> Result<PolicySnapshot, PlaneError> {
        let store_snapshot = self.store.snapshot()?;
        let snapshot = PolicySnapshot::from_store(&store_snapshot);
        if let Some(publisher) = &self.publisher {
            let event = SnapshotEvent {
                snapshot: snapshot.clone(),
                lines: self.lines_for(&store_snapshot.file_source),
            };
            match serde_json::to_value(&event) {
                Ok(payload) => publisher.publish(SNAPSHOT_EVENT, payload),
                Err(err) => tracing::warn!(error = %err, "snapshot event not serializable"),
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::compiler::StatementCompiler;
    use crate::rules::Effect;
    use crate::statement::ActionKind;

    struct CapturePublisher {
        events: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl CapturePublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: Mutex::new(Vec::new()) })
        }

        fn last(&self) -> (String, serde_json::Value) {
            self.events.lock().unwrap().last().cloned().unwrap()
        }

        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl SnapshotPublisher for CapturePublisher {
        fn publish(&self, event: &str, payload: serde_json::Value) {
            self.events.lock().unwrap().push((event.to_string(), payload));
        }
    }

    fn plane_in(dir: &tempfile::TempDir) -> (ControlPlane, Arc<CapturePublisher>) {
        let publisher = CapturePublisher::new();
        let config = PlaneConfig::new(dir.path().join("policy.txt"));
        let plane = ControlPlane::open(config, Arc::new(StatementCompiler::new()))
            .unwrap()
            .with_publisher(Arc::clone(&publisher) as Arc<dyn SnapshotPublisher>);
        (plane, publisher)
    }

    const DENY_FACEBOOK: &str = "forbid (principal, action == Net::\"Connect\", resource == Net::Hostname::\"facebook.com\");";

    #[test]
    fn test_open_installs_baseline_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        let snapshot = plane.snapshot().unwrap();
        assert_eq!(snapshot.mode, EnforcementMode::Enforce);
        assert!(snapshot.active_rules.iter().any(|l| l == "allow net.send *"));
        assert!(dir.path().join("policy.txt").exists());
    }

    #[test]
    fn test_patch_adds_deny_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, publisher) = plane_in(&dir);
        let snapshot = plane.patch(&[DENY_FACEBOOK.to_string()], &[], None).unwrap();
        assert!(snapshot.file_rules.iter().any(|l| l == "deny net.send facebook.com"));
        assert_eq!(snapshot.mode, EnforcementMode::Enforce);

        let (event, payload) = publisher.last();
        assert_eq!(event, SNAPSHOT_EVENT);
        assert_eq!(payload["snapshot"]["mode"], "enforce");
        assert!(payload["lines"]
            .as_array()
            .unwrap()
            .iter()
            .any(|l| l["effect"] == "deny"));

        let on_disk = std::fs::read_to_string(dir.path().join("policy.txt")).unwrap();
        assert!(on_disk.contains("facebook.com"));
    }

    #[test]
    fn test_open_rejects_zero_rule_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.txt");
        std::fs::write(&path, "// all rules removed by hand\n").unwrap();
        let err = ControlPlane::open(PlaneConfig::new(&path), Arc::new(StatementCompiler::new()))
            .unwrap_err();
        assert!(matches!(err, PlaneError::EmptyRuleSet));
    }

    #[test]
    fn test_patch_during_permit_all_keeps_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        plane.set_permit_all().unwrap();
        let overlay_before = plane.snapshot().unwrap().runtime_rules.unwrap();

        let snapshot = plane.patch(&[DENY_FACEBOOK.to_string()], &[], None).unwrap();
        assert_eq!(snapshot.mode, EnforcementMode::PermitAll);
        assert_eq!(snapshot.runtime_rules.as_ref().unwrap(), &overlay_before);
        assert!(snapshot.file_rules.iter().any(|l| l.contains("facebook.com")));
        assert!(snapshot.active_rules.iter().any(|l| l == "allow net.send *"));

        let after = plane.apply_enforce().unwrap();
        assert_eq!(after.mode, EnforcementMode::Enforce);
        assert!(after.active_rules.iter().any(|l| l.contains("facebook.com")));
    }

    #[test]
    fn test_zero_statement_replace_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, publisher) = plane_in(&dir);
        let before = plane.snapshot().unwrap();
        let events_before = publisher.count();
        let err = plane.replace_source("// nothing here\n").unwrap_err();
        assert!(matches!(err, PlaneError::EmptyRuleSet));
        // no partial effect
        assert_eq!(plane.snapshot().unwrap().source, before.source);
        assert_eq!(publisher.count(), events_before);
    }

    #[test]
    fn test_connect_lockout_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        let err = plane
            .replace_source(
                "forbid (principal, action == Action::\"NetworkConnect\", resource)\nwhen { resource in [ Host::\"*\" ] };\npermit (principal, action == Action::\"ProcessExec\", resource)\nwhen { resource in [ Dir::\"/\" ] };",
            )
            .unwrap_err();
        assert!(matches!(err, PlaneError::ConnectLockout));
    }

    #[test]
    fn test_conflicting_patch_rejected_against_existing() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        plane.patch(&[DENY_FACEBOOK.to_string()], &[], None).unwrap();
        let allow = DENY_FACEBOOK.replace("forbid", "permit");
        let err = plane.patch(&[allow], &[], None).unwrap_err();
        match err {
            PlaneError::Conflict(conflict) => {
                assert_eq!(conflict.resource, "net.send facebook.com");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_conflict_inside_single_patch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        let allow = DENY_FACEBOOK.replace("forbid", "permit");
        let err = plane.patch(&[format!("{DENY_FACEBOOK}\n{allow}")], &[], None).unwrap_err();
        assert!(matches!(err, PlaneError::Conflict(_)));
    }

    #[test]
    fn test_add_from_action_and_remove_line() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        let request = ActionRequest {
            action: ActionKind::NetConnect,
            name: "https://api.example.com/v1".to_string(),
            server: None,
            tool: None,
            effect: Effect::Deny,
        };
        plane.add_from_action(&request).unwrap();
        let lines = plane.lines().unwrap();
        let added = lines
            .iter()
            .find(|l| l.description == "Deny network connect api.example.com")
            .unwrap();

        plane.remove_line(&added.id).unwrap();
        assert!(plane
            .lines()
            .unwrap()
            .iter()
            .all(|l| !l.source.contains("api.example.com")));
    }

    #[test]
    fn test_remove_unknown_and_final_line() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        assert!(matches!(plane.remove_line("policy-0-bogus"), Err(PlaneError::InvalidInput { .. })));

        plane
            .replace_source(
                "permit (principal, action == Action::\"NetworkConnect\", resource)\nwhen { resource in [ Host::\"*\" ] };",
            )
            .unwrap();
        let lines = plane.lines().unwrap();
        assert_eq!(lines.len(), 1);
        let err = plane.remove_line(&lines[0].id).unwrap_err();
        assert!(matches!(err, PlaneError::InvalidInput { .. }));
    }

    #[test]
    fn test_patch_with_enforce_mode_is_one_transition() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, publisher) = plane_in(&dir);
        plane.set_permit_all().unwrap();
        let events_before = publisher.count();

        let snapshot = plane
            .patch(&[DENY_FACEBOOK.to_string()], &[], Some(EnforcementMode::Enforce))
            .unwrap();
        assert_eq!(snapshot.mode, EnforcementMode::Enforce);
        assert!(snapshot.runtime_rules.is_none());
        assert!(snapshot.active_rules.iter().any(|l| l == "deny net.send facebook.com"));
        // commit and mode switch publish as a single event
        assert_eq!(publisher.count(), events_before + 1);
        assert_eq!(publisher.last().1["snapshot"]["mode"], "enforce");
    }

    #[test]
    fn test_patch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        let first = plane.patch(&[DENY_FACEBOOK.to_string()], &[], None).unwrap();
        let second = plane.patch(&[DENY_FACEBOOK.to_string()], &[], None).unwrap();
        assert_eq!(first.source, second.source);
        assert_eq!(first.file_rules, second.file_rules);
    }

    #[test]
    fn test_completion_uses_committed_rules_as_hints() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        plane
            .patch(
                &["permit (principal, action == Net::\"Connect\", resource == Net::Hostname::\"api.example.com\");".to_string()],
                &[],
                None,
            )
            .unwrap();
        let input = "permit (principal, action == Action::\"NetworkConnect\", resource)\nwhen { resource in [ ";
        let (items, _) = plane.complete(input, 2, 22, &Hints::default()).unwrap();
        assert!(items.iter().any(|i| i.label == "Host::\"api.example.com\""));
    }

    #[test]
    fn test_completion_rejects_out_of_bounds_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane_in(&dir);
        let err = plane.complete("", 0, 0, &Hints::default()).unwrap_err();
        assert!(matches!(err, PlaneError::InvalidInput { .. }));
    }
}
