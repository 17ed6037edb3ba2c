//! Server-side tool execution.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{Arguments, CallOutcome, ErrorKind, ToolCallRequest, ToolCallResult};
use crate::registry::ToolRegistry;
use crate::schema::validate_arguments;

/// Validates calls against the registry and runs them.
///
/// Holds no mutable state of its own, so one executor serves any number of
/// concurrent calls. Tools that own shared resources serialize access to them
/// inside their handlers.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    /// Create an executor over a registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this executor dispatches into.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a tool.
    ///
    /// Fails with `UnknownTool`, `InvalidArgument`, or `Computation`. A
    /// handler result that does not match the declared return type is a
    /// `Computation` error.
    pub async fn execute(&self, tool_name: &str, arguments: &Arguments) -> Result<Value> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| McpError::UnknownTool(tool_name.to_string()))?;

        validate_arguments(&tool.definition, arguments)?;

        let value = tool.handler.call(arguments).await?;

        if !tool.definition.return_type.accepts(&value) {
            return Err(McpError::computation(format!(
                "tool '{}' produced a value that is not {}",
                tool_name, tool.definition.return_type
            )));
        }

        Ok(value)
    }

    /// Run a call and package the outcome for the wire.
    pub async fn execute_call(&self, request: &ToolCallRequest) -> ToolCallResult {
        let outcome = match self.execute(&request.tool_name, &request.arguments).await {
            Ok(value) => CallOutcome::Success { value },
            Err(err) => {
                let kind = err.kind().unwrap_or(ErrorKind::ComputationError);
                tracing::debug!(
                    tool = %request.tool_name,
                    correlation_id = %request.correlation_id,
                    error_kind = %kind,
                    error = %err,
                    "tool call failed"
                );
                CallOutcome::error(kind, failure_message(err))
            }
        };

        ToolCallResult {
            correlation_id: request.correlation_id.clone(),
            outcome,
        }
    }
}

/// Message text without the kind prefix the `Display` impl adds.
fn failure_message(err: McpError) -> String {
    match err {
        McpError::UnknownTool(name) => format!("unknown tool '{}'", name),
        McpError::InvalidArgument(msg) | McpError::Computation(msg) => msg,
        other => other.to_string(),
    }
}
