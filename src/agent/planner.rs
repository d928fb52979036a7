//! Turns free-form model output into plan steps and step actions.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::state::AgentStep;
use crate::error::PlanningError;
use crate::tools::Action;

/// `1.`, `1)`, `1:`, `Step 1:`, optionally wrapped in markdown bold.
static NUMBERED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*)?(?:step\s+)?\d+\s*[.):](?:\*\*)?\s+(.*\S)\s*$").ok()
});

static BULLET: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\s*[-*•]\s+(.*\S)\s*$").ok());

fn capture<'t>(pattern: &LazyLock<Option<Regex>>, line: &'t str) -> Option<&'t str> {
    let re = pattern.as_ref()?;
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Parse a planning response into pending steps.
///
/// Numbered items win over bullets; other non-empty lines continue the
/// previous item. With nothing recognised the whole response is one step.
pub fn parse_plan(text: &str, max_steps: usize) -> Result<Vec<AgentStep>, PlanningError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PlanningError::Empty);
    }

    let numbered = trimmed.lines().any(|l| capture(&NUMBERED, l).is_some());
    let marker = if numbered { &NUMBERED } else { &BULLET };

    let mut items: Vec<String> = Vec::new();
    for line in trimmed.lines() {
        if let Some(item) = capture(marker, line) {
            items.push(item.to_string());
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Text before the first item is preamble.
        if let Some(last) = items.last_mut() {
            last.push(' ');
            last.push_str(line.trim_start_matches(['-', '*', '•']).trim());
        }
    }

    if items.is_empty() {
        return Ok(vec![AgentStep::pending(trimmed)]);
    }
    if max_steps > 0 {
        items.truncate(max_steps);
    }
    Ok(items.into_iter().map(AgentStep::pending).collect())
}

/// What the model decided to do for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act(Action),
    /// No browser action; the text is the step result.
    Respond(String),
}

/// Parse a step reply: one JSON object, possibly inside a code fence or prose.
pub fn parse_decision(text: &str) -> Result<Decision, String> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(format!("no JSON action in reply: {}", text.trim())),
    };

    let value: Value = serde_json::from_str(json).map_err(|e| format!("invalid action JSON: {}", e))?;
    if value.get("action").and_then(Value::as_str) == Some("respond") {
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(Decision::Respond(text));
    }
    serde_json::from_value(value)
        .map(Decision::Act)
        .map_err(|e| format!("unknown action: {}", e))
}
