//! Server-side tool registry.
//!
//! The registry is an explicit object handed to the server (and to test
//! harnesses) by reference. It is built once, then only read.
//!
//! # Example
//!
//! ```rust,ignore
//! use abacus_mcp::{FnHandler, ToolDefinition, ToolRegistry, ValueType};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     ToolDefinition::new("answer", "The answer", ValueType::Integer),
//!     FnHandler::new(|_args| Ok(json!(42))),
//! )?;
//! ```

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{Arguments, ToolDefinition};

/// Performs the computation behind one tool.
///
/// Handlers receive arguments that have already been validated against the
/// tool's definition. Tool-level failures are reported as
/// [`McpError::Computation`] (or [`McpError::InvalidArgument`]).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool.
    async fn call(&self, arguments: &Arguments) -> Result<Value>;
}

/// [`ToolHandler`] backed by a synchronous closure.
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Arguments) -> Result<Value> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&Arguments) -> Result<Value> + Send + Sync,
{
    async fn call(&self, arguments: &Arguments) -> Result<Value> {
        (self.func)(arguments)
    }
}

/// A definition paired with its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    /// What the server advertises.
    pub definition: ToolDefinition,
    /// What the server runs.
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Capability set of a server.
#[derive(Default)]
pub struct ToolRegistry {
    /// Registration order, preserved for discovery.
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Fails with [`McpError::DuplicateTool`] if the name is taken, and with
    /// [`McpError::InvalidArgument`] if the definition repeats a parameter name.
    pub fn register<H: ToolHandler + 'static>(
        &mut self,
        definition: ToolDefinition,
        handler: H,
    ) -> Result<()> {
        self.register_arc(definition, Arc::new(handler))
    }

    /// Register a tool from an Arc'd handler.
    pub fn register_arc(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if self.tools.contains_key(&definition.name) {
            return Err(McpError::DuplicateTool(definition.name));
        }

        let mut params = HashSet::new();
        for param in &definition.parameters {
            if !params.insert(param.name.as_str()) {
                return Err(McpError::invalid_argument(format!(
                    "tool '{}' declares parameter '{}' twice",
                    definition.name, param.name
                )));
            }
        }

        tracing::debug!(tool = %definition.name, "registered tool");
        let name = definition.name.clone();
        self.order.push(name.clone());
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                handler,
            },
        );
        Ok(())
    }

    /// All definitions, in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}
