use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::browser::Browser;
use crate::config::RuntimeConfig;
use crate::dsl::Binding;
use crate::error::ActionError;
use crate::store::RecordStore;
use crate::tools::{Action, ActionOutput};

/// Collaborators shared by every run of a runtime.
#[derive(Clone)]
pub struct Services {
    pub http: reqwest::Client,
    pub store: Arc<dyn RecordStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
}

/// Outcome of one node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 运行时上下文 (Runtime Context)
/// Created at run start, handed down every fragment, dropped at run end.
pub struct Context<'a> {
    pub run_id: Uuid,
    pub browser: &'a dyn Browser,
    pub services: &'a Services,
    pub config: &'a RuntimeConfig,
    outputs: BTreeMap<String, Value>,
    results: Vec<NodeResult>,
    current: Option<String>,
}

impl<'a> Context<'a> {
    pub fn new(
        run_id: Uuid,
        browser: &'a dyn Browser,
        services: &'a Services,
        config: &'a RuntimeConfig,
    ) -> Self {
        Self {
            run_id,
            browser,
            services,
            config,
            outputs: BTreeMap::new(),
            results: Vec::new(),
            current: None,
        }
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Publish the output of `node_id`; a later invocation of the same node replaces it.
    pub fn set_output(&mut self, node_id: &str, value: Value) {
        self.outputs.insert(node_id.to_string(), value);
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn resolve<T: DeserializeOwned + Clone>(&self, input: &Input<T>) -> Result<T, ActionError> {
        input.resolve(&self.outputs)
    }

    /// Perform a tool action on this run's connection.
    pub async fn perform(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        action
            .perform_within(self.browser, self.config.default_timeout_ms)
            .await
    }

    pub(crate) fn enter(&mut self, node_id: &str) {
        self.current = Some(node_id.to_string());
    }

    /// Innermost node that started executing last.
    pub fn current_node(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub(crate) fn record(&mut self, result: NodeResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[NodeResult] {
        &self.results
    }

    pub(crate) fn finish(self) -> (BTreeMap<String, Value>, Vec<NodeResult>) {
        (self.outputs, self.results)
    }
}

/// A setting that is either a literal or bound to an upstream node's output.
///
/// Bound settings reach the decoder as `{"$ref": Binding, "fallback": literal}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Input<T> {
    Bound {
        #[serde(rename = "$ref")]
        binding: Binding,
        #[serde(default = "none")]
        fallback: Option<T>,
    },
    Literal(T),
}

fn none<T>() -> Option<T> {
    None
}

impl<T> From<T> for Input<T> {
    fn from(value: T) -> Self {
        Input::Literal(value)
    }
}

impl<T: DeserializeOwned + Clone> Input<T> {
    pub fn resolve(&self, outputs: &BTreeMap<String, Value>) -> Result<T, ActionError> {
        let (binding, fallback) = match self {
            Input::Literal(value) => return Ok(value.clone()),
            Input::Bound { binding, fallback } => (binding, fallback),
        };

        let Some(output) = outputs.get(&binding.source) else {
            return fallback
                .clone()
                .ok_or_else(|| ActionError::MissingOutput(binding.source.clone()));
        };

        let value = match (binding.source_handle.as_deref(), output) {
            (Some(handle), Value::Object(map)) if map.contains_key(handle) => &map[handle],
            _ => output,
        };

        coerce(value).map_err(|message| ActionError::BindingType {
            source_node: binding.source.clone(),
            message,
        })
    }
}

/// Decode a bound value, allowing the loose scalar conversions editors rely on.
fn coerce<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    let first = match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => return Ok(v),
        Err(e) => e.to_string(),
    };
    let retry = match value {
        Value::Number(_) | Value::Bool(_) => serde_json::from_value(Value::String(value.to_string())),
        Value::String(s) => serde_json::from_str(s.trim()),
        _ => return Err(first),
    };
    retry.map_err(|_| first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bound(source: &str, handle: Option<&str>) -> Binding {
        Binding {
            source: source.to_string(),
            source_handle: handle.map(str::to_string),
            target_handle: "setting-value".to_string(),
        }
    }

    #[test]
    fn bound_marker_decodes() {
        let input: Input<String> = serde_json::from_value(json!({
            "$ref": {"source": "a", "sourceHandle": "output", "targetHandle": "setting-text"},
            "fallback": "hi"
        }))
        .unwrap();
        assert!(matches!(input, Input::Bound { fallback: Some(ref f), .. } if f == "hi"));

        let literal: Input<String> = serde_json::from_value(json!("plain")).unwrap();
        assert_eq!(literal, Input::Literal("plain".to_string()));
    }

    #[test]
    fn handle_selects_object_field() {
        let mut outputs = BTreeMap::new();
        outputs.insert("sum".to_string(), json!({"result": 5}));
        let input: Input<f64> = Input::Bound {
            binding: bound("sum", Some("result")),
            fallback: None,
        };
        assert_eq!(input.resolve(&outputs).unwrap(), 5.0);
    }

    #[test]
    fn missing_output_uses_fallback() {
        let outputs = BTreeMap::new();
        let input = Input::Bound {
            binding: bound("a", None),
            fallback: Some("fallback".to_string()),
        };
        assert_eq!(input.resolve(&outputs).unwrap(), "fallback");

        let bare: Input<String> = Input::Bound {
            binding: bound("a", None),
            fallback: None,
        };
        assert!(matches!(bare.resolve(&outputs), Err(ActionError::MissingOutput(id)) if id == "a"));
    }

    #[test]
    fn scalars_coerce() {
        let mut outputs = BTreeMap::new();
        outputs.insert("n".to_string(), json!(42));
        outputs.insert("s".to_string(), json!("2.5"));
        let as_text: Input<String> = Input::Bound {
            binding: bound("n", None),
            fallback: None,
        };
        assert_eq!(as_text.resolve(&outputs).unwrap(), "42");
        let as_num: Input<f64> = Input::Bound {
            binding: bound("s", None),
            fallback: None,
        };
        assert_eq!(as_num.resolve(&outputs).unwrap(), 2.5);
    }
}
