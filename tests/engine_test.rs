mod common;

use std::sync::Arc;

use browserflow::compiler::Compiler;
use browserflow::config::RuntimeConfig;
use browserflow::dsl::builder::WorkflowBuilder;
use browserflow::error::{ActionError, ConnectionError, GraphError, RunError};
use browserflow::runtime::{ConnectionLeases, NodeStatus, RunState, RunStatus, Runtime};
use browserflow::store::InMemoryStore;
use common::{MockConnector, MockPage};
use serde_json::json;

const ENDPOINT: &str = "ws://127.0.0.1:9222/devtools/browser/test";

#[tokio::test]
async fn test_click_then_extract() {
    // 1. Page with a button and a heading
    let page = MockPage::new().with_element("#go", "Go").with_element(".title", "Hello");
    let connector = MockConnector::new(page.clone());

    // 2. A: click #go -> B: extract .title
    let workflow = WorkflowBuilder::new("click-extract")
        .node("A", "page-click")
        .setting("selector", "#go")
        .build()
        .node("B", "data-extract")
        .setting("selector", ".title")
        .build()
        .connect("A", "B")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert_eq!(program.order(), vec!["A", "B"]);
    assert_eq!(program.output_schema, vec!["B"]);

    // 3. Run
    let report = Runtime::new(connector.clone()).run(ENDPOINT, &program).await;

    // 4. Verify
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(
        report.trace,
        vec![
            RunState::Disconnected,
            RunState::Connecting,
            RunState::Connected,
            RunState::Running,
            RunState::Completed,
            RunState::Disconnected,
        ]
    );
    assert_eq!(report.outputs.get("B"), Some(&json!("Hello")));
    assert_eq!(report.node_results.len(), 2);
    assert!(report.node_results.iter().all(|r| r.status == NodeStatus::Succeeded));
    assert_eq!(page.log(), vec!["click x1 #go", "close"]);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_pointer_and_key_hold_nodes() {
    // 1. Reload, pointer gestures and a short key hold in sequence
    let page = MockPage::new().with_element("a.item", "Item");
    let workflow = WorkflowBuilder::new("gestures")
        .node("R", "reload-page")
        .setting("waitUntil", "networkidle2")
        .build()
        .node("M", "mouse-move")
        .setting("x", 10)
        .setting("y", 20)
        .build()
        .node("D", "mouse-drag-drop")
        .setting("startX", 1)
        .setting("startY", 2)
        .setting("endX", 30)
        .setting("endY", 40)
        .build()
        .node("C", "mouse-click-modified")
        .setting("selector", "a.item")
        .setting("modifiers", json!(["Control", "Shift"]))
        .build()
        .node("K", "keyboard-down")
        .setting("duration", 5)
        .build()
        .connect("R", "M")
        .connect("M", "D")
        .connect("D", "C")
        .connect("C", "K")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert!(program.warnings.is_empty(), "{:?}", program.warnings);

    // 2. Run
    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    // 3. Verify the browser saw every gesture in order
    assert_eq!(report.status, RunStatus::Completed, "{:?}", report.error);
    assert_eq!(
        page.log(),
        vec![
            "reload",
            "move 10 20",
            "drag 1 2 -> 30 40",
            "click+Control+Shift a.item",
            "keydown Shift",
            "keyup Shift",
            "close",
        ]
    );
}

#[test]
fn test_modified_click_rejects_unknown_modifier() {
    let workflow = WorkflowBuilder::new("bad-modifier")
        .node("C", "mouse-click-modified")
        .setting("selector", "a")
        .setting("modifiers", json!(["Hyper"]))
        .build()
        .build();
    let err = Compiler::new().compile(&workflow).expect_err("Hyper is not a modifier");
    assert!(matches!(err, GraphError::InvalidSettings { ref node_id, .. } if node_id == "C"));
}

#[tokio::test]
async fn test_unknown_type_is_skipped() {
    let page = MockPage::new().with_element("#go", "Go").with_element("h1", "Hello");
    let workflow = WorkflowBuilder::new("degraded")
        .node("A", "page-click")
        .setting("selector", "#go")
        .build()
        .node("X", "vendor-profile-switch")
        .setting("profile", 7)
        .build()
        .node("B", "data-extract")
        .setting("selector", "h1")
        .build()
        .connect("A", "X")
        .connect("X", "B")
        .build();

    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert!(program.is_degraded());
    assert_eq!(program.unresolved, vec!["X"]);
    assert_eq!(program.order(), vec!["A", "B"]);

    let report = Runtime::new(MockConnector::new(page)).run(ENDPOINT, &program).await;
    assert!(report.is_completed());
    assert_eq!(report.outputs.get("B"), Some(&json!("Hello")));
}

#[tokio::test]
async fn test_lone_unknown_node_is_a_noop() {
    let workflow = WorkflowBuilder::new("unknown")
        .bare("A", "unknown-type")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert!(program.fragments.is_empty());
    assert_eq!(program.warnings.len(), 1);

    let page = MockPage::new();
    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.node_results.is_empty());
    assert!(report.outputs.is_empty());
    assert_eq!(page.log(), vec!["close"]);
}

#[tokio::test]
async fn test_degraded_program_rejected_when_configured() {
    let workflow = WorkflowBuilder::new("degraded")
        .bare("X", "vendor-profile-switch")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let connector = MockConnector::new(MockPage::new());
    let config = RuntimeConfig {
        allow_unresolved_types: false,
        ..RuntimeConfig::default()
    };
    let report = Runtime::new(connector.clone())
        .with_config(config)
        .run(ENDPOINT, &program)
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.trace, vec![RunState::Disconnected]);
    assert!(matches!(
        report.error,
        Some(RunError::Validation(GraphError::Unresolved { ref nodes, .. })) if nodes == &vec!["X".to_string()]
    ));
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn test_failing_node_stops_the_run() {
    let page = MockPage::new().with_element("h1", "Hello");
    let workflow = WorkflowBuilder::new("missing-button")
        .node("A", "page-click")
        .setting("selector", "#missing")
        .setting("timeout", 50)
        .build()
        .node("B", "data-extract")
        .setting("selector", "h1")
        .build()
        .connect("A", "B")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_node(), Some("A"));
    assert_eq!(
        report.trace[report.trace.len() - 3..],
        [RunState::Running, RunState::Failed, RunState::Disconnected]
    );
    assert_eq!(report.node_results.len(), 1);
    assert_eq!(report.node_results[0].status, NodeStatus::Failed);
    assert!(!report.outputs.contains_key("B"));
    match report.error {
        Some(RunError::Node(e)) => assert!(matches!(e.cause, ActionError::Timeout { .. })),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(page.is_closed());
}

#[tokio::test]
async fn test_connection_failure() {
    let workflow = WorkflowBuilder::new("offline")
        .node("A", "page-navigate")
        .setting("url", "example.com")
        .build()
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::unreachable()).run(ENDPOINT, &program).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.trace,
        vec![RunState::Disconnected, RunState::Connecting, RunState::Disconnected]
    );
    assert!(matches!(
        report.error,
        Some(RunError::Connection(ConnectionError::Unreachable { .. }))
    ));
    assert!(report.node_results.is_empty());
}

#[tokio::test]
async fn test_endpoint_lease_is_exclusive() {
    let workflow = WorkflowBuilder::new("leased")
        .node("A", "keyboard-press")
        .setting("key", "Escape")
        .build()
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let leases = ConnectionLeases::new();
    let connector = MockConnector::new(MockPage::new());
    let runtime = Runtime::new(connector.clone()).with_leases(leases.clone());

    // 1. Another run holds the endpoint
    let held = leases.acquire(ENDPOINT, "other-run").expect("lease");
    let report = runtime.run(ENDPOINT, &program).await;
    match report.error {
        Some(RunError::Connection(ConnectionError::InUse { ref holder, .. })) => assert_eq!(holder, "other-run"),
        ref other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(connector.connects(), 0);

    // 2. Released
    drop(held);
    let report = runtime.run(ENDPOINT, &program).await;
    assert!(report.is_completed());
    assert!(!leases.is_held(ENDPOINT));
}

#[tokio::test]
async fn test_bindings_feed_settings() {
    let page = MockPage::new()
        .with_element("h1", "Hello")
        .with_element("input#q", "");

    // extract -> type: the typed text comes from the extract output
    // add -> multiply: (2 + 3) * 4
    let workflow = WorkflowBuilder::new("bindings")
        .node("E", "data-extract")
        .setting("selector", "h1")
        .build()
        .node("T", "page-type")
        .setting("selector", "input#q")
        .setting("text", "fallback")
        .build()
        .node("M1", "math-add")
        .setting("a", 2)
        .setting("b", 3)
        .build()
        .node("M2", "math-multiply")
        .setting("b", 4)
        .build()
        .bind("E", None, "T", "text")
        .connect("T", "M1")
        .bind("M1", Some("result"), "M2", "a")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert_eq!(program.order(), vec!["E", "T", "M1", "M2"]);

    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert!(page.log().contains(&"type Hello".to_string()));
    assert_eq!(report.outputs.get("M1"), Some(&json!({"result": 5})));
    assert_eq!(report.outputs.get("M2"), Some(&json!({"result": 20})));
}

#[tokio::test]
async fn test_missing_binding_uses_fallback() {
    let page = MockPage::new().with_element("input", "");
    let workflow = WorkflowBuilder::new("fallback")
        .bare("X", "vendor-profile-switch")
        .node("T", "page-type")
        .setting("text", "typed anyway")
        .build()
        .bind("X", None, "T", "text")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert!(page.log().contains(&"type typed anyway".to_string()));
}

#[tokio::test]
async fn test_if_branch_and_rejoin() {
    let page = MockPage::new()
        .with_element("h1", "Hello")
        .with_element("#yes", "Yes")
        .with_element("#no", "No");

    let workflow = WorkflowBuilder::new("branch")
        .node("E", "data-extract")
        .setting("selector", "h1")
        .build()
        .node("IF", "flow-if")
        .setting("condition", "${E} == \"Hello\"")
        .build()
        .node("T", "page-click")
        .setting("selector", "#yes")
        .build()
        .node("F", "page-click")
        .setting("selector", "#no")
        .build()
        .node("J", "keyboard-press")
        .build()
        .connect("E", "IF")
        .connect_handle("IF", "then", "T")
        .connect_handle("IF", "else", "F")
        .connect("T", "J")
        .connect("F", "J")
        .build();

    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert_eq!(program.order(), vec!["E", "IF", "J"]);
    let outline = program.outline();
    assert!(outline.contains("[then]\n    T (page-click)"), "{}", outline);
    assert!(outline.contains("[else]\n    F (page-click)"), "{}", outline);

    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.outputs.get("IF"), Some(&json!(true)));
    assert_eq!(page.log(), vec!["click x1 #yes", "key Enter", "close"]);
}

#[tokio::test]
async fn test_loop_times() {
    let workflow = WorkflowBuilder::new("loop-times")
        .node("L", "flow-loop")
        .setting("times", 3)
        .build()
        .node("K", "keyboard-press")
        .setting("key", "Tab")
        .build()
        .node("D", "keyboard-type")
        .setting("text", "done")
        .build()
        .connect_handle("L", "body", "K")
        .connect("K", "L")
        .connect("L", "D")
        .build();

    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert_eq!(program.order(), vec!["L", "D"]);

    let page = MockPage::new();
    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.outputs.get("L"), Some(&json!({"iterations": 3})));
    assert_eq!(
        page.log(),
        vec!["key Tab", "key Tab", "key Tab", "type done", "close"]
    );
}

#[tokio::test]
async fn test_loop_over_table_rows() {
    let store = Arc::new(InMemoryStore::new());

    // write-table -> read-table -> for each row: type the row
    let workflow = WorkflowBuilder::new("loop-items")
        .node("W", "write-table")
        .setting("tableId", "people")
        .setting("data", "[\"ann\", \"bob\"]")
        .build()
        .node("R", "read-table")
        .setting("tableId", "people")
        .build()
        .bare("L", "flow-loop")
        .node("T", "keyboard-type")
        .setting("text", "nobody")
        .build()
        .connect("W", "R")
        .bind("R", None, "L", "items")
        .connect_handle("L", "body", "T")
        .bind("L", Some("item"), "T", "text")
        .build();

    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert_eq!(program.order(), vec!["W", "R", "L"]);

    let page = MockPage::new();
    let report = Runtime::new(MockConnector::new(page.clone()))
        .with_store(store)
        .run(ENDPOINT, &program)
        .await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.outputs.get("W"), Some(&json!(2)));
    assert_eq!(report.outputs.get("R"), Some(&json!(["ann", "bob"])));
    assert_eq!(report.outputs.get("L"), Some(&json!({"iterations": 2})));
    assert_eq!(page.log(), vec!["type ann", "type bob", "close"]);
}

#[tokio::test]
async fn test_loop_limit() {
    let workflow = WorkflowBuilder::new("loop-limit")
        .node("L", "flow-loop")
        .setting("times", 5)
        .setting("maxIterations", 2)
        .build()
        .node("K", "keyboard-press")
        .build()
        .connect_handle("L", "loop", "K")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let page = MockPage::new();
    let report = Runtime::new(MockConnector::new(page.clone())).run(ENDPOINT, &program).await;

    assert_eq!(report.failed_node(), Some("L"));
    match report.error {
        Some(RunError::Node(e)) => assert!(matches!(e.cause, ActionError::LoopLimit(2))),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(page.log(), vec!["close"]);
}

#[tokio::test]
async fn test_nested_failure_reports_inner_node() {
    let workflow = WorkflowBuilder::new("nested")
        .node("IF", "flow-if")
        .setting("condition", "true")
        .build()
        .node("C", "page-click")
        .setting("selector", "#missing")
        .setting("timeout", 50)
        .build()
        .connect_handle("IF", "true", "C")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::new(MockPage::new())).run(ENDPOINT, &program).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_node(), Some("C"));
    let failed: Vec<&str> = report
        .node_results
        .iter()
        .filter(|r| r.status == NodeStatus::Failed)
        .map(|r| r.node_id.as_str())
        .collect();
    assert_eq!(failed, vec!["C", "IF"]);
}

#[tokio::test]
async fn test_panic_releases_connection() {
    let page = MockPage::new().with_element("#boom", "Boom").panicking_on("#boom");
    let workflow = WorkflowBuilder::new("panic")
        .node("P", "page-click")
        .setting("selector", "#boom")
        .build()
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let leases = ConnectionLeases::new();
    let report = Runtime::new(MockConnector::new(page.clone()))
        .with_leases(leases.clone())
        .run(ENDPOINT, &program)
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_node(), Some("P"));
    let message = report.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("panicked"), "{}", message);
    assert!(page.is_closed());
    assert!(!leases.is_held(ENDPOINT));
}

#[tokio::test]
async fn test_report_serialization() {
    let workflow = WorkflowBuilder::new("serialize")
        .node("M", "math-divide")
        .setting("a", 7)
        .setting("b", 2)
        .build()
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::new(MockPage::new())).run(ENDPOINT, &program).await;
    let value = serde_json::to_value(&report).expect("serialize");

    assert_eq!(value["workflow_id"], json!("serialize"));
    assert_eq!(value["status"], json!("completed"));
    assert_eq!(value["trace"][1], json!("connecting"));
    assert_eq!(value["outputs"]["M"], json!({"result": 3.5}));
    assert_eq!(value["node_results"][0]["status"], json!("succeeded"));
    assert!(value["error"].is_null());
}
