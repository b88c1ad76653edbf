use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashMap;

use super::protocol::{Tool, ToolContent};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
    #[error("Tool not found: {0}")]
    UnknownTool(String),
    #[error("Invalid input schema for tool {name}: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Context passed to tool handlers
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
}

/// Trait for tool handlers
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with arguments that already passed schema validation
    async fn execute(&self, args: Value, context: &ToolContext)
        -> Result<ToolContent, String>;

    /// Return the tool schema definition
    fn schema(&self) -> Tool;

    /// Text reported to the client when `execute` fails
    fn failure_message(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// A registered tool: public definition, compiled input schema and handler
pub struct ToolDescriptor {
    tool: Tool,
    validator: JSONSchema,
    handler: Box<dyn ToolHandler>,
}

impl ToolDescriptor {
    fn new(handler: Box<dyn ToolHandler>) -> Result<Self, RegistryError> {
        let tool = handler.schema();
        let validator = JSONSchema::options()
            .should_validate_formats(true)
            .compile(&tool.input_schema)
            .map_err(|e| RegistryError::InvalidSchema {
                name: tool.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            tool,
            validator,
            handler,
        })
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn handler(&self) -> &dyn ToolHandler {
        self.handler.as_ref()
    }

    /// Check `input` against the input schema, joining every violation into one message
    pub fn validate(&self, input: &Value) -> Result<(), String> {
        self.validator
            .validate(input)
            .map_err(|errors| errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; "))
    }
}

/// Tool registry managing all available MCP tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler under the name from its schema
    pub fn register(&mut self, handler: Box<dyn ToolHandler>) -> Result<(), RegistryError> {
        let descriptor = ToolDescriptor::new(handler)?;
        let name = descriptor.name().to_string();

        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        tracing::debug!("Registered MCP tool {}", name);
        self.tools.insert(name, descriptor);
        Ok(())
    }

    /// Get a tool by name
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// List all available tools, ordered by name
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.values().map(|d| d.tool().clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}
