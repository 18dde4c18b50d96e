//! Tool/plugin registry used for function calling.
//!
//! Tools are rig [`Tool`](rig::tool::Tool) implementations collected in a
//! [`ToolRegistry`]. The registry advertises OpenAI-style descriptors to the
//! providers and executes calls by name once a stream finishes.
pub mod calculator;
pub mod registry;

pub use calculator::CalculatorTool;
pub use registry::ToolRegistry;

use serde::Serialize;
use serde_json::Value;

/// Common error type for all tools
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Function descriptor as sent in a request's `tools` list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<rig::completion::ToolDefinition> for ToolSpec {
    fn from(definition: rig::completion::ToolDefinition) -> Self {
        Self {
            name: definition.name,
            description: definition.description,
            parameters: definition.parameters,
        }
    }
}
