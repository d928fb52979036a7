//! Prompt text sent to the language model.

use std::collections::BTreeMap;

use serde_json::Value;

use super::state::BrowserState;

pub const SYSTEM_PROMPT: &str = "You are an autonomous web agent that helps users accomplish tasks in a web browser.
Your goal is to complete the requested task by breaking it down into smaller steps and executing them in a browser.

You have these capabilities:
1. Navigate to websites and interact with web pages
2. Fill out forms, click buttons, and type text
3. Extract information from web pages
4. Take screenshots of the current page

Break complex tasks into small, concrete steps. If an action fails, report it.";

pub fn planning_prompt(task: &str) -> String {
    format!(
        "I need you to help me with the following task: {task}

Before starting, create a plan with step-by-step instructions.
Each step must be a single browser action or observation.

Return your plan as a numbered list of steps, one per line."
    )
}

/// The action vocabulary the model chooses from, one JSON object per line.
const ACTIONS: &str = r##"{"action": "navigate", "url": "https://example.com"}
{"action": "click", "selector": "#submit"}
{"action": "hover", "selector": ".menu"}
{"action": "focus", "selector": "input[name=q]"}
{"action": "type", "selector": "input[name=q]", "text": "rust", "clear": true, "press_enter": false}
{"action": "press_key", "key": "Enter"}
{"action": "shortcut", "keys": "Control+A"}
{"action": "scroll", "selector": null, "x": 0, "y": 600}
{"action": "extract", "selector": "h1", "attribute": null, "html": false, "all": false}
{"action": "wait", "until": {"kind": "selector", "selector": ".results"}, "timeout_ms": 10000}
{"action": "evaluate", "expression": "document.title"}
{"action": "screenshot"}
{"action": "respond", "text": "answer when no browser action is needed"}"##;

pub fn action_prompt(step: &str, browser: &BrowserState, memory: &BTreeMap<String, Value>) -> String {
    let memory = serde_json::to_string_pretty(memory).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Current step: {step}

The browser is open. The current state is:
- URL: {url}
- Title: {title}

Results of previous steps:
{memory}

Choose exactly one action for this step. Reply with a single JSON object and nothing else, using one of these forms:
{ACTIONS}",
        url = browser.url,
        title = browser.title,
    )
}
