use std::fs;
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result, bail};
use serde_json::{Map, Value};

use crate::dsl::Workflow;

/// Load a workflow from a YAML or JSON file.
///
/// A workflow without an `id` takes the file stem.
pub fn load_workflow(file_path: impl AsRef<Path>) -> Result<Workflow> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read workflow file {}", file_path.display()))?;

    let fallback_id = file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow");

    parse_with_id(&content, fallback_id)
        .with_context(|| format!("Failed to parse workflow file {}", file_path.display()))
}

/// Parse a workflow document. JSON is accepted as YAML.
pub fn parse_workflow(content: &str) -> Result<Workflow> {
    parse_with_id(content, "workflow")
}

fn parse_with_id(content: &str, fallback_id: &str) -> Result<Workflow> {
    let raw: Value = serde_yaml::from_str(content).context("Workflow is not valid YAML/JSON")?;
    let Value::Object(mut doc) = raw else {
        bail!("Workflow document must be a mapping");
    };

    doc.entry("id").or_insert_with(|| Value::String(fallback_id.to_string()));
    if let Some(Value::Array(nodes)) = doc.get_mut("nodes") {
        for node in nodes.iter_mut() {
            if let Value::Object(node) = node {
                lift_editor_settings(node);
            }
        }
    }

    let workflow: Workflow = serde_json::from_value(Value::Object(doc)).context("Workflow has an invalid shape")?;
    Ok(workflow)
}

/// Editor exports keep settings under `data.settings`; lift them to the node.
fn lift_editor_settings(node: &mut Map<String, Value>) {
    if node.contains_key("settings") {
        return;
    }
    let settings = node
        .get_mut("data")
        .and_then(Value::as_object_mut)
        .and_then(|data| data.remove("settings"));
    if let Some(settings) = settings {
        node.insert("settings".to_string(), settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_export_settings_are_lifted() {
        let json = r##"{
            "nodes": [
                {"id": "a", "type": "page-click", "position": {"x": 1, "y": 2},
                 "data": {"label": "Click", "settings": {"selector": "#go"}}}
            ],
            "edges": []
        }"##;
        let workflow = parse_workflow(json).unwrap();
        assert_eq!(workflow.id, "workflow");
        assert_eq!(workflow.nodes[0].settings["selector"], "#go");
    }
}
