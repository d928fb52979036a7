//! CDP protocol types and message definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CDP request message.
#[derive(Debug, Serialize)]
pub struct CdpRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// CDP response or event message.
#[derive(Debug, Deserialize)]
pub struct CdpResponse {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<CdpErrorResponse>,
    pub method: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CdpErrorResponse {
    pub code: i64,
    pub message: String,
}

/// Target info from `Target.getTargets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
}

/// Browser version info.
///
/// Note: Chrome returns PascalCase field names for this endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Box model from `DOM.getBoxModel`.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxModel {
    pub content: Vec<f64>,
    pub width: i64,
    pub height: i64,
}

impl BoxModel {
    /// Centre of the content quad.
    pub fn center(&self) -> Option<(f64, f64)> {
        if self.content.len() < 8 {
            return None;
        }
        let xs = [self.content[0], self.content[2], self.content[4], self.content[6]];
        let ys = [self.content[1], self.content[3], self.content[5], self.content[7]];
        Some((xs.iter().sum::<f64>() / 4.0, ys.iter().sum::<f64>() / 4.0))
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventType {
    MousePressed,
    MouseReleased,
    MouseMoved,
    MouseWheel,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
}

/// Modifier bit flags for `Input.dispatchKeyEvent`.
pub fn modifier_flags(modifiers: &[&str]) -> i32 {
    let mut flags = 0;
    for m in modifiers {
        match m.to_lowercase().as_str() {
            "alt" => flags |= 1,
            "control" | "ctrl" => flags |= 2,
            "meta" | "command" | "cmd" => flags |= 4,
            "shift" => flags |= 8,
            _ => {}
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_empty_fields() {
        let req = CdpRequest {
            id: 7,
            method: "Page.enable".to_string(),
            params: None,
            session_id: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"id": 7, "method": "Page.enable"}));
    }

    #[test]
    fn response_with_error() {
        let resp: CdpResponse = serde_json::from_str(
            r#"{"id":3,"error":{"code":-32000,"message":"Could not compute box model."}}"#,
        )
        .unwrap();
        assert_eq!(resp.id, Some(3));
        assert_eq!(resp.error.unwrap().code, -32000);
    }

    #[test]
    fn box_model_center() {
        let model = BoxModel {
            content: vec![10.0, 10.0, 30.0, 10.0, 30.0, 20.0, 10.0, 20.0],
            width: 20,
            height: 10,
        };
        assert_eq!(model.center(), Some((20.0, 15.0)));
    }

    #[test]
    fn modifiers() {
        assert_eq!(modifier_flags(&["Control", "Shift"]), 10);
        assert_eq!(modifier_flags(&["cmd"]), 4);
    }
}
