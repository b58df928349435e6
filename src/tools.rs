//! Tool definition and registry.
//!
//! The host's tool-dispatch service consumes a [`ToolRegistry`]; this crate
//! fills it with the retrieval tools that give the agent a way back to
//! compressed content.
//!
//! - [`Tool`] trait - Define a tool the LLM can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`RetrievalToolName`] - Names of the built-in retrieval tools
//! - [`DynamicToolName`] - Tool names chosen at runtime (e.g. from config)
//! - [`ToolRegistry`] - Collection of available tools
//! - [`ToolContext`] - Context passed to tool execution
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use agent_compress::{DynamicToolName, Tool, ToolContext, ToolResult};
//!
//! struct Echo;
//!
//! impl Tool<()> for Echo {
//!     type Name = DynamicToolName;
//!
//!     fn name(&self) -> DynamicToolName { DynamicToolName::new("echo") }
//!     fn description(&self) -> &'static str { "Echoes its input" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!
//!     async fn execute(&self, _ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
//!         Ok(ToolResult::success(input.to_string()))
//!     }
//! }
//! ```

use crate::llm;
use crate::types::ToolResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// Tool Name Types
// ============================================================================

/// Marker trait for tool names.
///
/// Tool names must be serializable (for storage/logging) and deserializable
/// (for parsing from LLM responses). The string representation is derived
/// from serde serialization.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Helper to get string representation of a tool name via serde.
///
/// # Panics
///
/// Panics if the tool name cannot be serialized to a string. This should
/// never happen with properly implemented `ToolName` types that use
/// `#[derive(Serialize)]`.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    serde_json::to_string(name)
        .expect("ToolName must serialize to string")
        .trim_matches('"')
        .to_string()
}

/// Names of the retrieval tools registered alongside the compressor.
///
/// The expand tool is not listed: its name is configurable and it uses a
/// [`DynamicToolName`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrievalToolName {
    QueryToolResponse,
    GrepToolResponse,
    TailToolResponse,
    ListToolResponses,
}

impl ToolName for RetrievalToolName {}

/// Tool name chosen at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

/// Context passed to tool execution
pub struct ToolContext<Ctx> {
    /// Application-specific context supplied by the host
    pub app: Ctx,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub const fn new(app: Ctx) -> Self {
        Self { app }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Definition of a tool that can be called by the agent.
///
/// Tools have a strongly-typed `Name` associated type that determines
/// how the tool name is serialized for LLM communication.
///
/// This trait uses Rust's native async functions in traits; implementors
/// do not need the `async_trait` crate.
pub trait Tool<Ctx>: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &'static str;

    /// JSON schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given input.
    ///
    /// # Errors
    /// Returns an error if tool execution fails.
    fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        input: Value,
    ) -> impl Future<Output = Result<ToolResult>> + Send;
}

// ============================================================================
// Type-Erased Tool (for Registry)
// ============================================================================

/// Type-erased tool trait for registry storage.
///
/// This allows tools with different `Name` associated types to be stored
/// in the same registry by erasing the type information.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    /// Get the tool name as a string.
    fn name_str(&self) -> &str;
    /// Get the tool description.
    fn description(&self) -> &'static str;
    /// Get the JSON schema for tool inputs.
    fn input_schema(&self) -> Value;
    /// Execute the tool with the given input.
    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult>;
}

/// Wrapper that erases the Name associated type from a Tool.
struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    _marker: PhantomData<Ctx>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        Self {
            inner: tool,
            name_cache,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        self.inner.execute(ctx, input).await
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of available tools.
///
/// Tools are stored with their names erased to allow different `Name` types
/// in the same registry. The registry uses string-based lookup for LLM
/// compatibility.
pub struct ToolRegistry<Ctx> {
    tools: HashMap<String, Arc<dyn ErasedTool<Ctx>>>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool in the registry.
    ///
    /// The tool's name is converted to a string via serde serialization
    /// and used as the lookup key. A tool registered under an existing name
    /// replaces the previous one.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        self.tools.insert(name, Arc::new(wrapper));
        self
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.tools.get(name)
    }

    /// Get the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Convert all tools to LLM tool definitions, sorted by name.
    #[must_use]
    pub fn to_llm_tools(&self) -> Vec<llm::Tool> {
        let mut tools: Vec<_> = self
            .tools
            .values()
            .map(|tool| llm::Tool {
                name: tool.name_str().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    impl Tool<()> for EchoTool {
        type Name = DynamicToolName;

        fn name(&self) -> DynamicToolName {
            DynamicToolName::new("echo")
        }

        fn description(&self) -> &'static str {
            "Echoes the message back"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                }
            })
        }

        async fn execute(&self, _ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
            let message = input
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("no message");
            Ok(ToolResult::success(format!("Received: {message}")))
        }
    }

    struct ListTool;

    impl Tool<()> for ListTool {
        type Name = RetrievalToolName;

        fn name(&self) -> RetrievalToolName {
            RetrievalToolName::ListToolResponses
        }

        fn description(&self) -> &'static str {
            "Lists things"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }

        async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
            Ok(ToolResult::success("Done"))
        }
    }

    #[test]
    fn test_retrieval_tool_name_serialization() {
        let name = RetrievalToolName::QueryToolResponse;
        assert_eq!(tool_name_to_string(&name), "queryToolResponse");
        assert_eq!(
            tool_name_to_string(&RetrievalToolName::ListToolResponses),
            "listToolResponses"
        );
    }

    #[test]
    fn test_dynamic_tool_name() {
        let name = DynamicToolName::new("expandTokens");
        assert_eq!(tool_name_to_string(&name), "expandTokens");
        assert_eq!(name.as_str(), "expandTokens");
    }

    #[test]
    fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).register(ListTool);

        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("listToolResponses").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_to_llm_tools_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(ListTool).register(EchoTool);

        let llm_tools = registry.to_llm_tools();
        let names: Vec<_> = llm_tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "listToolResponses"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).register(EchoTool);

        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_erased_execute() -> Result<()> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let tool = registry.get("echo").unwrap();
        assert_eq!(tool.name_str(), "echo");
        let result = tool
            .execute(&ToolContext::new(()), serde_json::json!({"message": "hi"}))
            .await?;
        assert_eq!(result.output, "Received: hi");
        Ok(())
    }
}
