//! `api-*` nodes: one HTTP request, non-2xx fails the node.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{CompiledScopes, Processor, ProcessorRegistry, decode, invalid};
use crate::dsl::{Binding, Node};
use crate::error::{ActionError, GraphError};
use crate::runtime::context::{Context, Input};
use crate::runtime::program::Operation;

pub fn register(registry: &mut ProcessorRegistry) {
    registry.register("api-get", Arc::new(HttpProcessor { method: Method::GET }));
    registry.register("api-post", Arc::new(HttpProcessor { method: Method::POST }));
    registry.register("api-put", Arc::new(HttpProcessor { method: Method::PUT }));
    registry.register("api-delete", Arc::new(HttpProcessor { method: Method::DELETE }));
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpSettings {
    url: Input<String>,
    /// Object, or a string holding a JSON object.
    headers: Option<Value>,
    body: Option<Input<Value>>,
}

struct HttpProcessor {
    method: Method,
}

impl HttpProcessor {
    fn sends_body(&self) -> bool {
        self.method == Method::POST || self.method == Method::PUT
    }
}

fn parse_headers(raw: Option<Value>) -> Result<Vec<(String, String)>, String> {
    let map: Map<String, Value> = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => match serde_json::from_str(&s) {
            Ok(Value::Object(map)) => map,
            _ => return Err(format!("headers is not a JSON object: {}", s)),
        },
        Some(other) => return Err(format!("headers is not an object: {}", other)),
    };
    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

impl Processor for HttpProcessor {
    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: HttpSettings = decode(node, bindings)?;
        let headers = parse_headers(s.headers).map_err(|e| invalid(node, e))?;
        let body = match s.body {
            Some(Input::Literal(Value::Null)) | None => None,
            Some(Input::Literal(Value::String(raw))) if raw.trim().is_empty() => None,
            Some(_) if !self.sends_body() => {
                return Err(invalid(node, format!("{} requests cannot carry a body", self.method)));
            }
            body => body,
        };
        Ok(Box::new(HttpOp {
            method: self.method.clone(),
            url: s.url,
            headers,
            body,
        }))
    }
}

#[derive(Debug)]
struct HttpOp {
    method: Method,
    url: Input<String>,
    headers: Vec<(String, String)>,
    body: Option<Input<Value>>,
}

#[async_trait]
impl Operation for HttpOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let url = ctx.resolve(&self.url)?;
        let mut builder = ctx.services.http.request(self.method.clone(), &url);

        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }

        if let Some(body) = &self.body {
            let body = match ctx.resolve(body)? {
                // Editors store bodies as JSON text.
                Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                other => other,
            };
            builder = builder.json(&body);
        }

        debug!(method = %self.method, url = %url, "HTTP request");
        let response = builder
            .send()
            .await
            .map_err(|e| ActionError::Http(format!("{} {}: {}", self.method, url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::Http(format!(
                "{} request failed: {}",
                self.method, status
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ActionError::Http(e.to_string()))?;
        // JSON when possible, raw text otherwise.
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(Some(json!({
            "status": status.as_u16(),
            "data": data
        })))
    }
}
