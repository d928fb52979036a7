use std::fs;

use browserflow::compiler::{Compiler, load_workflow, parse_workflow};
use browserflow::dsl::builder::WorkflowBuilder;

#[test]
fn test_load_simple_yaml_workflow() {
    let yaml_content = r##"
id: "test-yaml-flow"
name: "YAML Test Workflow"
nodes:
  - id: "open"
    type: "page-navigate"
    settings:
      url: "example.com"
  - id: "read"
    type: "data-extract"
    settings:
      selector: "h1"
edges:
  - id: "open->read"
    source: "open"
    target: "read"
"##;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("test_workflow.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let loaded_workflow = load_workflow(&file_path).expect("Failed to load workflow from YAML");

    let expected_workflow = WorkflowBuilder::new("test-yaml-flow")
        .name("YAML Test Workflow")
        .node("open", "page-navigate")
        .setting("url", "example.com")
        .build()
        .node("read", "data-extract")
        .setting("selector", "h1")
        .build()
        .connect("open", "read")
        .build();

    assert_eq!(loaded_workflow, expected_workflow);

    temp_dir.close().expect("Failed to close temp dir");
}

#[test]
fn test_load_editor_json_export() {
    // Editor exports: camelCase handles, settings under data, no workflow id
    let json_content = r##"{
  "name": "Search",
  "nodes": [
    {"id": "q", "type": "data-extract", "position": {"x": 0, "y": 0},
     "data": {"label": "Read query", "settings": {"selector": "#query"}}},
    {"id": "type", "type": "page-type", "position": {"x": 200, "y": 0},
     "data": {"label": "Type", "settings": {"selector": "input[name=q]", "text": "", "pressEnter": true}}}
  ],
  "edges": [
    {"id": "e1", "source": "q", "target": "type", "sourceHandle": null, "targetHandle": "setting-text"}
  ]
}"##;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("search.json");
    fs::write(&file_path, json_content).expect("Failed to write temp file");

    let workflow = load_workflow(&file_path).expect("Failed to load workflow from JSON");

    // 1. File stem becomes the id
    assert_eq!(workflow.id, "search");
    assert_eq!(workflow.name, "Search");
    assert_eq!(workflow.nodes[1].settings["pressEnter"], true);

    // 2. The data edge is a binding
    let bindings = workflow.bindings_for("type");
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].setting_key(), "text");

    // 3. And it compiles
    let program = Compiler::new().compile(&workflow).expect("Compilation failed");
    assert_eq!(program.order(), vec!["q", "type"]);
}

#[test]
fn test_invalid_documents() {
    assert!(parse_workflow("- just\n- a list\n").is_err());
    assert!(parse_workflow("nodes: [ {id: a} ]").is_err());
    assert!(load_workflow("/definitely/not/here.yaml").is_err());
}
