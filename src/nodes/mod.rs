//! Node processors: compile one typed node into an executable [`Operation`].

pub mod data;
pub mod flow;
pub mod http;
pub mod page;
pub mod wait;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::dsl::{Binding, Node};
use crate::error::GraphError;
use crate::runtime::program::{Fragment, Operation};

/// A named nested scope of a flow node and the source handles that enter it.
#[derive(Debug, Clone, Copy)]
pub struct ScopeSpec {
    pub name: &'static str,
    pub handles: &'static [&'static str],
}

impl ScopeSpec {
    pub fn accepts(&self, handle: Option<&str>) -> bool {
        handle.is_some_and(|h| self.handles.contains(&h))
    }
}

/// Fragment lists of a flow node's scopes, compiled before the node itself.
#[derive(Debug, Default)]
pub struct CompiledScopes {
    scopes: BTreeMap<&'static str, Vec<Fragment>>,
}

impl CompiledScopes {
    pub fn insert(&mut self, name: &'static str, fragments: Vec<Fragment>) {
        self.scopes.insert(name, fragments);
    }

    /// Fragments of scope `name`; an unconnected scope is empty.
    pub fn take(&mut self, name: &str) -> Vec<Fragment> {
        self.scopes.remove(name).unwrap_or_default()
    }
}

/// 节点编译器接口 (one per node type family)
pub trait Processor: Send + Sync {
    /// Nested scopes compiled into the node instead of the enclosing sequence.
    fn scopes(&self) -> &'static [ScopeSpec] {
        &[]
    }

    /// Edges from the node's scope back to the node are iteration, not cycles.
    fn iterates(&self) -> bool {
        false
    }

    /// Whether the fragment publishes a named output.
    fn produces_output(&self) -> bool {
        false
    }

    fn compile(
        &self,
        node: &Node,
        bindings: &[Binding],
        scopes: CompiledScopes,
    ) -> Result<Box<dyn Operation>, GraphError>;
}

/// Explicit table of node type → processor, with prefix fallbacks as last resort.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    exact: HashMap<String, Arc<dyn Processor>>,
    prefixes: Vec<(String, Arc<dyn Processor>)>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in node types.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        page::register(&mut registry);
        data::register(&mut registry);
        wait::register(&mut registry);
        http::register(&mut registry);
        flow::register(&mut registry);
        registry
    }

    pub fn register(&mut self, node_type: &str, processor: Arc<dyn Processor>) {
        self.exact.insert(node_type.to_string(), processor);
    }

    pub fn register_all(&mut self, node_types: &[&str], processor: Arc<dyn Processor>) {
        for node_type in node_types {
            self.register(node_type, processor.clone());
        }
    }

    /// Catch every type starting with `prefix` that has no exact registration.
    pub fn register_prefix(&mut self, prefix: &str, processor: Arc<dyn Processor>) {
        self.prefixes.retain(|(p, _)| p != prefix);
        self.prefixes.push((prefix.to_string(), processor));
    }

    pub fn resolve(&self, node_type: &str) -> Option<Arc<dyn Processor>> {
        if let Some(processor) = self.exact.get(node_type) {
            return Some(processor.clone());
        }
        self.prefixes
            .iter()
            .filter(|(prefix, _)| node_type.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, processor)| processor.clone())
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.resolve(node_type).is_some()
    }

    /// Exactly registered types, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.exact.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

pub(crate) fn invalid(node: &Node, message: impl Into<String>) -> GraphError {
    GraphError::InvalidSettings {
        node_id: node.id.clone(),
        node_type: node.kind.clone(),
        message: message.into(),
    }
}

/// Decode a node's settings into its typed record.
///
/// Every bound setting is first replaced by a `{"$ref", "fallback"}` marker so
/// the record's `Input` fields see the binding instead of the literal.
pub fn decode<T: DeserializeOwned>(node: &Node, bindings: &[Binding]) -> Result<T, GraphError> {
    let mut settings: Map<String, Value> = node.settings.clone();
    let mut bound: Vec<&str> = Vec::new();
    for binding in bindings {
        let key = binding.setting_key();
        if bound.contains(&key) {
            continue;
        }
        bound.push(key);
        let mut marker = json!({ "$ref": binding });
        if let Some(literal) = settings.remove(key) {
            marker["fallback"] = literal;
        }
        settings.insert(key.to_string(), marker);
    }
    serde_json::from_value(Value::Object(settings)).map_err(|e| invalid(node, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Processor for Named {
        fn compile(&self, node: &Node, _: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
            Err(invalid(node, self.0))
        }
    }

    fn name_of(registry: &ProcessorRegistry, node_type: &str) -> Option<String> {
        let node = Node {
            id: "n".to_string(),
            kind: node_type.to_string(),
            settings: Map::new(),
        };
        let processor = registry.resolve(node_type)?;
        match processor.compile(&node, &[], CompiledScopes::default()) {
            Err(GraphError::InvalidSettings { message, .. }) => Some(message),
            _ => None,
        }
    }

    #[test]
    fn exact_match_beats_prefix() {
        let mut registry = ProcessorRegistry::new();
        registry.register_prefix("page-", Arc::new(Named("generic")));
        registry.register_prefix("page-special-", Arc::new(Named("special")));
        registry.register("page-click", Arc::new(Named("click")));

        assert_eq!(name_of(&registry, "page-click").as_deref(), Some("click"));
        assert_eq!(name_of(&registry, "page-wiggle").as_deref(), Some("generic"));
        assert_eq!(name_of(&registry, "page-special-x").as_deref(), Some("special"));
        assert!(registry.resolve("unknown-type").is_none());
    }

    #[test]
    fn bound_setting_becomes_marker() {
        #[derive(serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        struct S {
            text: crate::runtime::Input<String>,
        }

        let mut settings = Map::new();
        settings.insert("text".to_string(), json!("literal"));
        let node = Node {
            id: "b".to_string(),
            kind: "keyboard-type".to_string(),
            settings,
        };
        let binding = Binding {
            source: "a".to_string(),
            source_handle: Some("email".to_string()),
            target_handle: "setting-text".to_string(),
        };
        let decoded: S = decode(&node, &[binding.clone()]).unwrap();
        assert_eq!(
            decoded.text,
            crate::runtime::Input::Bound {
                binding,
                fallback: Some("literal".to_string())
            }
        );
    }
}
