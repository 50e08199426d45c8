//! End-to-end tests of the control plane: persistence across restarts,
//! permit-all switching, decision synthesis, completion, and the file
//! watcher observing committed changes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use corral_core::compiler::{PolicyWatcher, StatementCompiler};
use corral_core::hints::{Hints, ProtocolObserver};
use corral_core::plane::{ControlPlane, PlaneConfig, PlaneError, SnapshotPublisher, SNAPSHOT_EVENT};
use corral_core::rules::Effect;
use corral_core::statement::{ActionKind, ActionRequest};
use corral_core::EnforcementMode;

struct Capture {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl Capture {
    fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }

    fn modes(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload["snapshot"]["mode"].as_str().unwrap_or("").to_string())
            .collect()
    }
}

impl SnapshotPublisher for Capture {
    fn publish(&self, event: &str, payload: serde_json::Value) {
        assert_eq!(event, SNAPSHOT_EVENT);
        self.events.lock().unwrap().push((event.to_string(), payload));
    }
}

fn open_plane(dir: &tempfile::TempDir) -> ControlPlane {
    ControlPlane::open(
        PlaneConfig::new(dir.path().join("policy.txt")),
        Arc::new(StatementCompiler::new()),
    )
    .unwrap()
}

#[test]
fn test_policy_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let plane = open_plane(&dir);
    plane
        .add_from_action(&ActionRequest {
            action: ActionKind::NetConnect,
            name: "facebook.com".to_string(),
            server: None,
            tool: None,
            effect: Effect::Deny,
        })
        .unwrap();
    drop(plane);

    let reopened = open_plane(&dir);
    let snapshot = reopened.snapshot().unwrap();
    assert_eq!(snapshot.mode, EnforcementMode::Enforce);
    assert!(snapshot.file_rules.iter().any(|l| l == "deny net.send facebook.com"));
}

#[test]
fn test_permit_all_cycle_publishes_each_transition() {
    let dir = tempfile::tempdir().unwrap();
    let capture = Capture::new();
    let plane = open_plane(&dir).with_publisher(Arc::clone(&capture) as Arc<dyn SnapshotPublisher>);

    plane.set_permit_all().unwrap();
    plane
        .patch(
            &["forbid (principal, action == Net::\"Connect\", resource == Net::Hostname::\"tracker.example.com\");".to_string()],
            &[],
            None,
        )
        .unwrap();
    plane.apply_enforce().unwrap();

    assert_eq!(capture.modes(), vec!["permit-all", "permit-all", "enforce"]);
    let snapshot = plane.snapshot().unwrap();
    assert!(snapshot.runtime_rules.is_none());
    assert!(snapshot.active_rules.iter().any(|l| l.contains("tracker.example.com")));
}

#[test]
fn test_mcp_decision_produces_exact_statement() {
    let dir = tempfile::tempdir().unwrap();
    let plane = open_plane(&dir);
    plane
        .add_from_action(&ActionRequest {
            action: ActionKind::McpCall,
            name: String::new(),
            server: Some("mcp.context7.com".to_string()),
            tool: Some("resolve-library-id".to_string()),
            effect: Effect::Allow,
        })
        .unwrap();

    let on_disk = std::fs::read_to_string(dir.path().join("policy.txt")).unwrap();
    assert!(on_disk.contains(
        "permit (principal, action == Action::\"McpCall\", resource == MCP::Tool::\"resolve-library-id\") when { resource in [ MCP::Server::\"mcp.context7.com\" ] };"
    ));
    let lines = plane.lines().unwrap();
    assert!(lines
        .iter()
        .any(|l| l.description == "Allow call MCP tool resolve-library-id on mcp.context7.com"));
}

#[test]
fn test_conflicting_decisions_rejected_both_ways() {
    for (first, second) in [(Effect::Allow, Effect::Deny), (Effect::Deny, Effect::Allow)] {
        let dir = tempfile::tempdir().unwrap();
        let plane = open_plane(&dir);
        let request = |effect| ActionRequest {
            action: ActionKind::NetConnect,
            name: "api.example.com".to_string(),
            server: None,
            tool: None,
            effect,
        };
        plane.add_from_action(&request(first)).unwrap();
        let err = plane.add_from_action(&request(second)).unwrap_err();
        assert!(matches!(err, PlaneError::Conflict(_)));
        // the rejected decision left no trace
        let on_disk = std::fs::read_to_string(dir.path().join("policy.txt")).unwrap();
        assert_eq!(on_disk.matches("api.example.com").count(), 1);
    }
}

struct RecentMcp;

impl ProtocolObserver for RecentMcp {
    fn recent_servers(&self) -> Vec<String> {
        vec!["mcp.context7.com".to_string()]
    }
    fn recent_tools(&self) -> Vec<String> {
        vec!["resolve-library-id".to_string()]
    }
}

#[test]
fn test_completion_reaches_observer_hints() {
    let dir = tempfile::tempdir().unwrap();
    let plane = open_plane(&dir).with_protocol_observer(Arc::new(RecentMcp));
    let input = "permit (principal, action == Action::\"McpCall\", resource)\nwhen { resource in [ ";
    let (items, range) = plane.complete(input, 2, 22, &Hints::default()).unwrap();
    assert_eq!(items[0].label, "MCP::Server::\"mcp.context7.com\"");
    assert!(items.iter().any(|i| i.label == "MCP::Tool::\"resolve-library-id\""));
    assert_eq!(range.start.line, 2);

    // out-of-bounds cursors are input errors, not clamped
    assert!(matches!(
        plane.complete(input, 0, 1, &Hints::default()),
        Err(PlaneError::InvalidInput { .. })
    ));
    assert!(matches!(
        plane.complete(input, 9, 1, &Hints::default()),
        Err(PlaneError::InvalidInput { .. })
    ));
}

#[test]
fn test_watcher_observes_committed_patch() {
    let dir = tempfile::tempdir().unwrap();
    let plane = open_plane(&dir);

    let (tx, rx) = std::sync::mpsc::channel();
    let watcher = PolicyWatcher::new(
        dir.path().join("policy.txt"),
        Duration::from_millis(10),
        Arc::new(StatementCompiler::new()),
    );
    let handle = watcher.spawn(
        move |compilation, _source| {
            let _ = tx.send(compilation.rules.connect.len());
        },
        |_err| {},
    );

    // initial load
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

    std::thread::sleep(Duration::from_millis(50));
    plane
        .patch(
            &["forbid (principal, action == Net::\"Connect\", resource == Net::Hostname::\"facebook.com\");".to_string()],
            &[],
            None,
        )
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    handle.cancel();
}
