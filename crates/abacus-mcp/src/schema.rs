//! Argument validation against a tool's declared parameters.
//!
//! Shared by the client (fast-fail before any round trip) and the executor
//! (the server never trusts its callers).

use crate::error::{McpError, Result};
use crate::protocol::{Arguments, ToolDefinition};

/// Check that `arguments` satisfies `definition`.
///
/// Every required parameter must be present, no undeclared parameter may be
/// present, and every supplied value must match its declared type.
pub fn validate_arguments(definition: &ToolDefinition, arguments: &Arguments) -> Result<()> {
    for name in arguments.keys() {
        if definition.parameter(name).is_none() {
            return Err(McpError::invalid_argument(format!(
                "tool '{}' has no parameter '{}'",
                definition.name, name
            )));
        }
    }

    for param in &definition.parameters {
        match arguments.get(&param.name) {
            None if param.required => {
                return Err(McpError::invalid_argument(format!(
                    "missing required parameter '{}' for tool '{}'",
                    param.name, definition.name
                )));
            }
            None => {}
            Some(value) if !param.value_type.accepts(value) => {
                return Err(McpError::invalid_argument(format!(
                    "parameter '{}' of tool '{}' expects {}, got {}",
                    param.name,
                    definition.name,
                    param.value_type,
                    json_type_name(value)
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
