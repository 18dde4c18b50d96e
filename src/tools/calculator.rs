use super::ToolError;
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CalculatorArgs {
    pub expression: String,
}

/// Built-in `calculate` tool backed by fasteval.
///
/// Supports arithmetic, `^`, parentheses, the usual unary functions and the
/// constants `pi` and `e`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub const DESCRIPTION: &'static str = "Evaluate a mathematical expression. Supports +, -, *, /, ^, parentheses, sqrt, sin, cos, tan, ln, log, abs, floor, ceil, round and the constants pi and e.";

    pub fn evaluate(expression: &str) -> Result<f64, ToolError> {
        if expression.trim().is_empty() {
            return Err(ToolError::InvalidArgs("empty expression".into()));
        }
        let mut functions = |name: &str, args: Vec<f64>| -> Option<f64> {
            match (name, args.as_slice()) {
                ("sqrt", [x]) => Some(x.sqrt()),
                ("sin", [x]) => Some(x.sin()),
                ("cos", [x]) => Some(x.cos()),
                ("tan", [x]) => Some(x.tan()),
                ("asin", [x]) => Some(x.asin()),
                ("acos", [x]) => Some(x.acos()),
                ("atan", [x]) => Some(x.atan()),
                ("ln", [x]) => Some(x.ln()),
                ("log", [x]) => Some(x.log10()),
                ("log2", [x]) => Some(x.log2()),
                ("abs", [x]) => Some(x.abs()),
                ("floor", [x]) => Some(x.floor()),
                ("ceil", [x]) => Some(x.ceil()),
                ("round", [x]) => Some(x.round()),
                ("pi", []) => Some(std::f64::consts::PI),
                ("e", []) => Some(std::f64::consts::E),
                _ => None,
            }
        };
        let value = fasteval::ez_eval(expression, &mut functions)
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot evaluate '{expression}': {e}")))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ToolError::ExecutionFailed(format!(
                "'{expression}' does not have a finite value"
            )))
        }
    }

    /// Integers print without a fractional part.
    pub fn format(value: f64) -> String {
        if value.fract() == 0.0 && value.abs() < 1e10 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        }
    }
}

impl Tool for CalculatorTool {
    const NAME: &'static str = "calculate";

    type Error = ToolError;
    type Args = CalculatorArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: Self::DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Expression to evaluate, e.g. '2 + 2 * 3' or 'sqrt(16)'"
                    }
                },
                "required": ["expression"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        Self::evaluate(&args.expression).map(Self::format)
    }
}
