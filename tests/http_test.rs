mod common;

use browserflow::compiler::Compiler;
use browserflow::dsl::builder::WorkflowBuilder;
use browserflow::error::GraphError;
use browserflow::runtime::{RunStatus, Runtime};
use common::{MockConnector, MockPage};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "ws://127.0.0.1:9222/devtools/browser/http";

#[tokio::test]
async fn test_api_get() {
    // 1. Mock API
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "1"))
        .and(header("x-token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2, 3]})))
        .expect(1)
        .mount(&server)
        .await;

    // 2. Workflow: GET, headers given as editor JSON text
    let workflow = WorkflowBuilder::new("http-get")
        .node("req", "api-get")
        .setting("url", format!("{}/items?page=1", server.uri()))
        .setting("headers", "{\"x-token\": \"secret\"}")
        .build()
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    // 3. Run
    let report = Runtime::new(MockConnector::new(MockPage::new())).run(ENDPOINT, &program).await;

    // 4. Verify
    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(
        report.outputs.get("req"),
        Some(&json!({"status": 200, "data": {"items": [1, 2, 3]}}))
    );
}

#[tokio::test]
async fn test_api_post_with_bound_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(body_json(json!({"title": "Hello"})))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    // The body is the extract output, parsed from JSON text
    let page = MockPage::new().with_element("#payload", "{\"title\": \"Hello\"}");
    let workflow = WorkflowBuilder::new("http-post")
        .node("payload", "data-extract")
        .setting("selector", "#payload")
        .build()
        .node("post", "api-post")
        .setting("url", format!("{}/echo", server.uri()))
        .build()
        .bind("payload", None, "post", "body")
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::new(page)).run(ENDPOINT, &program).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.outputs.get("post"), Some(&json!({"status": 201, "data": "created"})));
}

#[tokio::test]
async fn test_api_failure_status_fails_the_node() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/items/7"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let workflow = WorkflowBuilder::new("http-delete")
        .node("del", "api-delete")
        .setting("url", format!("{}/items/7", server.uri()))
        .build()
        .build();
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");

    let report = Runtime::new(MockConnector::new(MockPage::new())).run(ENDPOINT, &program).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_node(), Some("del"));
    let message = report.error.map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("404"), "{}", message);
}

#[test]
fn test_malformed_headers_fail_compilation() {
    let workflow = WorkflowBuilder::new("http-bad")
        .node("req", "api-get")
        .setting("url", "http://localhost/")
        .setting("headers", "not json")
        .build()
        .build();
    assert!(Compiler::new().compile(&workflow).is_err());
}

#[test]
fn test_body_on_get_or_delete_fails_compilation() {
    // 1. A GET with a JSON body is rejected
    let workflow = WorkflowBuilder::new("http-get-body")
        .node("req", "api-get")
        .setting("url", "http://localhost/")
        .setting("body", json!({"q": 1}))
        .build()
        .build();
    let err = Compiler::new().compile(&workflow).expect_err("GET has no body");
    assert!(matches!(err, GraphError::InvalidSettings { ref node_id, .. } if node_id == "req"));

    // 2. So is a DELETE whose body is bound to another node
    let workflow = WorkflowBuilder::new("http-delete-body")
        .node("src", "data-extract")
        .setting("selector", "h1")
        .build()
        .node("req", "api-delete")
        .setting("url", "http://localhost/")
        .build()
        .bind("src", None, "req", "body")
        .build();
    assert!(Compiler::new().compile(&workflow).is_err());

    // 3. An empty editor body is the same as none
    let workflow = WorkflowBuilder::new("http-get-empty")
        .node("req", "api-get")
        .setting("url", "http://localhost/")
        .setting("body", "")
        .build()
        .build();
    Compiler::new().compile(&workflow).expect("empty body is ignored");
}
