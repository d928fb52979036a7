//! LLM-driven agent: plan a free-text task, then execute it step by step
//! through the shared action vocabulary.

pub mod controller;
pub mod llm;
pub mod planner;
pub mod prompts;
pub mod screenshot;
pub mod state;

pub use controller::{AgentController, AgentRun};
pub use llm::{ChatMessage, LanguageModel, LlmError, Role, build_model};
pub use planner::{Decision, parse_decision, parse_plan};
pub use screenshot::{FileScreenshotSink, ScreenshotSink};
pub use state::{AgentState, AgentStatus, AgentStep, BrowserState, StepStatus};
