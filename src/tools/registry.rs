use rig::tool::{ToolDyn, ToolSet};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CalculatorTool, ToolError, ToolSpec};

/// Named tools available to the chat, backed by a rig [`ToolSet`].
#[derive(Default)]
pub struct ToolRegistry {
    tools: ToolSet,
    names: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(CalculatorTool);
        registry
    }

    pub fn register(&mut self, tool: impl ToolDyn + 'static) {
        let name = tool.name();
        if !self.names.contains(&name) {
            self.names.push(name);
        }
        self.tools.add_tool(tool);
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// Descriptors for the registered tools whose names are in `enabled`.
    pub async fn specs_for(&self, enabled: &[String]) -> Result<Vec<ToolSpec>, ToolError> {
        if enabled.is_empty() {
            return Ok(Vec::new());
        }
        let definitions = self
            .tools
            .get_tool_definitions()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(definitions
            .into_iter()
            .filter(|definition| enabled.contains(&definition.name))
            .map(ToolSpec::from)
            .collect())
    }

    pub async fn specs(&self) -> Result<Vec<ToolSpec>, ToolError> {
        self.specs_for(&self.names).await
    }

    /// System prompt listing the enabled tools, or `None` when none are.
    pub async fn system_prompt_for(&self, enabled: &[String]) -> Option<String> {
        let specs = match self.specs_for(enabled).await {
            Ok(specs) if !specs.is_empty() => specs,
            Ok(_) => return None,
            Err(err) => {
                warn!(error = %err, "could not describe tools");
                return None;
            }
        };
        let mut prompt = String::from(
            "\nYou can call the following tools when they help answer the user:\n",
        );
        for spec in specs {
            prompt.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
        Some(prompt)
    }

    /// Run `name` with JSON `arguments`, returning its textual output.
    pub async fn call(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        if !self.contains(name) {
            return Err(ToolError::NotFound(name.to_string()));
        }
        let arguments = if arguments.trim().is_empty() {
            "{}".to_string()
        } else {
            arguments.to_string()
        };
        serde_json::from_str::<Value>(&arguments)
            .map_err(|e| ToolError::InvalidArgs(format!("{name}: {e}")))?;

        debug!(tool = name, "calling tool");
        let output = self
            .tools
            .call(name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        // Outputs come back JSON-encoded; plain strings are unwrapped.
        Ok(match serde_json::from_str::<Value>(&output) {
            Ok(Value::String(text)) => text,
            _ => output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtins_are_described_and_callable() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.names(), ["calculate".to_string()]);

        let specs = registry.specs().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].parameters["required"][0], "expression");

        let output = registry
            .call("calculate", r#"{"expression":"6 * 7"}"#)
            .await
            .unwrap();
        assert_eq!(output, "42");
    }

    #[tokio::test]
    async fn disabled_tools_are_not_advertised() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.specs_for(&[]).await.unwrap().is_empty());
        assert!(registry.system_prompt_for(&[]).await.is_none());
        let prompt = registry
            .system_prompt_for(&["calculate".to_string()])
            .await
            .unwrap();
        assert!(prompt.contains("- calculate:"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let registry = ToolRegistry::with_builtins();
        assert!(matches!(
            registry.call("search", "{}").await,
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            registry.call("calculate", "{not json").await,
            Err(ToolError::InvalidArgs(_))
        ));
        assert!(matches!(
            registry.call("calculate", r#"{"expression":"1 +"}"#).await,
            Err(ToolError::ExecutionFailed(_))
        ));
    }
}
