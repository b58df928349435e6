//! Agent-callable tools that read back compressed content.
//!
//! | tool                | reads                                        |
//! |---------------------|----------------------------------------------|
//! | `expandTokens`      | raw payload for a stub key or tool-call id   |
//! | `queryToolResponse` | jq-style filter over stored JSON             |
//! | `grepToolResponse`  | regex line search                            |
//! | `tailToolResponse`  | last lines                                   |
//! | `listToolResponses` | summary of everything stored                 |
//!
//! All of them are read-only. A failed lookup is reported to the agent as
//! an error [`ToolResult`]; only malformed input is a Rust error.

use crate::cache::{GrepOptions, ToolResponseCache};
use crate::compression::CompressionConfig;
use crate::stores::PayloadStore;
use crate::tools::{DynamicToolName, RetrievalToolName, Tool, ToolContext, ToolRegistry};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Register every retrieval tool, with the expand tool named as in the
/// default [`CompressionConfig`].
pub fn register_retrieval_tools<Ctx, S>(
    registry: &mut ToolRegistry<Ctx>,
    cache: Arc<ToolResponseCache<S>>,
) where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    register_retrieval_tools_with_config(registry, cache, &CompressionConfig::default());
}

/// Register every retrieval tool, naming the expand tool after
/// `config.retrieval_tool` so it matches the stubs the compressor emits.
pub fn register_retrieval_tools_with_config<Ctx, S>(
    registry: &mut ToolRegistry<Ctx>,
    cache: Arc<ToolResponseCache<S>>,
    config: &CompressionConfig,
) where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    registry
        .register(ExpandTokensTool::new(
            Arc::clone(&cache),
            config.retrieval_tool.clone(),
        ))
        .register(QueryToolResponseTool::new(Arc::clone(&cache)))
        .register(GrepToolResponseTool::new(Arc::clone(&cache)))
        .register(TailToolResponseTool::new(Arc::clone(&cache)))
        .register(ListToolResponsesTool::new(cache));
}

fn lookup_result(result: Result<String>) -> ToolResult {
    match result {
        Ok(output) => ToolResult::success(output),
        Err(e) => ToolResult::error(format!("{e:#}")),
    }
}

// ============================================================================
// expandTokens
// ============================================================================

/// Returns the raw content behind a compression stub key or tool-call id.
pub struct ExpandTokensTool<S: PayloadStore + ?Sized> {
    cache: Arc<ToolResponseCache<S>>,
    name: DynamicToolName,
}

impl<S: PayloadStore + ?Sized> ExpandTokensTool<S> {
    #[must_use]
    pub fn new(cache: Arc<ToolResponseCache<S>>, name: impl Into<String>) -> Self {
        Self {
            cache,
            name: DynamicToolName::new(name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpandInput {
    key: String,
}

impl<Ctx, S> Tool<Ctx> for ExpandTokensTool<S>
where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        self.name.clone()
    }

    fn description(&self) -> &'static str {
        "Retrieve the full content behind a compressed stub. Pass the key from the stub's \
         'Key:' line, or a tool call id. Chunked content ends with [NEXT_CHUNK_KEY: <key>]; \
         expand that key to continue."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Compression key or tool call id"
                }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: ExpandInput =
            serde_json::from_value(input).context("Invalid input for expandTokens")?;
        Ok(lookup_result(self.cache.expand(&input.key)))
    }
}

// ============================================================================
// queryToolResponse
// ============================================================================

/// Runs a jq-style filter over a stored JSON response.
pub struct QueryToolResponseTool<S: PayloadStore + ?Sized> {
    cache: Arc<ToolResponseCache<S>>,
}

impl<S: PayloadStore + ?Sized> QueryToolResponseTool<S> {
    #[must_use]
    pub const fn new(cache: Arc<ToolResponseCache<S>>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
struct QueryInput {
    id: String,
    #[serde(default = "default_filter")]
    filter: String,
}

fn default_filter() -> String {
    ".".to_string()
}

impl<Ctx, S> Tool<Ctx> for QueryToolResponseTool<S>
where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    type Name = RetrievalToolName;

    fn name(&self) -> RetrievalToolName {
        RetrievalToolName::QueryToolResponse
    }

    fn description(&self) -> &'static str {
        "Query a stored JSON tool response with a jq-style filter. Supports .field, .\"quoted\", \
         [\"field\"], [n] (negative from end), [], [a:b], pipes (|) and keys, length, type. \
         JSON inside string fields is parsed automatically."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Tool call id or compression key"
                },
                "filter": {
                    "type": "string",
                    "description": "jq-style filter, e.g. '.items[0:5] | length'. Default: '.'"
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: QueryInput =
            serde_json::from_value(input).context("Invalid input for queryToolResponse")?;
        Ok(lookup_result(self.cache.query(&input.id, &input.filter)))
    }
}

// ============================================================================
// grepToolResponse
// ============================================================================

/// Searches a stored response line by line.
pub struct GrepToolResponseTool<S: PayloadStore + ?Sized> {
    cache: Arc<ToolResponseCache<S>>,
}

impl<S: PayloadStore + ?Sized> GrepToolResponseTool<S> {
    #[must_use]
    pub const fn new(cache: Arc<ToolResponseCache<S>>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
struct GrepInput {
    id: String,
    pattern: String,
    #[serde(flatten)]
    options: GrepOptions,
}

impl<Ctx, S> Tool<Ctx> for GrepToolResponseTool<S>
where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    type Name = RetrievalToolName;

    fn name(&self) -> RetrievalToolName {
        RetrievalToolName::GrepToolResponse
    }

    fn description(&self) -> &'static str {
        "Search a stored tool response for a regex pattern. Returns matching lines as \
         line:text, at most 50 matches."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Tool call id or compression key"
                },
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case insensitive search. Default: false"
                },
                "context_lines": {
                    "type": "integer",
                    "description": "Lines of context around each match. Default: 0"
                }
            },
            "required": ["id", "pattern"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: GrepInput =
            serde_json::from_value(input).context("Invalid input for grepToolResponse")?;
        Ok(lookup_result(self.cache.grep(
            &input.id,
            &input.pattern,
            input.options,
        )))
    }
}

// ============================================================================
// tailToolResponse
// ============================================================================

/// Returns the last lines of a stored response.
pub struct TailToolResponseTool<S: PayloadStore + ?Sized> {
    cache: Arc<ToolResponseCache<S>>,
}

impl<S: PayloadStore + ?Sized> TailToolResponseTool<S> {
    #[must_use]
    pub const fn new(cache: Arc<ToolResponseCache<S>>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
struct TailInput {
    id: String,
    #[serde(default)]
    lines: Option<usize>,
}

impl<Ctx, S> Tool<Ctx> for TailToolResponseTool<S>
where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    type Name = RetrievalToolName;

    fn name(&self) -> RetrievalToolName {
        RetrievalToolName::TailToolResponse
    }

    fn description(&self) -> &'static str {
        "Return the last lines of a stored tool response. Default: 50 lines."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Tool call id or compression key"
                },
                "lines": {
                    "type": "integer",
                    "description": "Number of lines to return. Default: 50"
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: TailInput =
            serde_json::from_value(input).context("Invalid input for tailToolResponse")?;
        Ok(lookup_result(self.cache.tail(&input.id, input.lines)))
    }
}

// ============================================================================
// listToolResponses
// ============================================================================

/// Lists stored tool responses.
pub struct ListToolResponsesTool<S: PayloadStore + ?Sized> {
    cache: Arc<ToolResponseCache<S>>,
}

impl<S: PayloadStore + ?Sized> ListToolResponsesTool<S> {
    #[must_use]
    pub const fn new(cache: Arc<ToolResponseCache<S>>) -> Self {
        Self { cache }
    }
}

impl<Ctx, S> Tool<Ctx> for ListToolResponsesTool<S>
where
    Ctx: Send + Sync + 'static,
    S: PayloadStore + ?Sized + 'static,
{
    type Name = RetrievalToolName;

    fn name(&self) -> RetrievalToolName {
        RetrievalToolName::ListToolResponses
    }

    fn description(&self) -> &'static str {
        "List stored tool responses with tool name, size and time, and the number of \
         compression payloads."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, _input: Value) -> Result<ToolResult> {
        let records = self.cache.records()?;
        let output = self.cache.list()?;
        Ok(ToolResult::success_with_data(
            output,
            serde_json::to_value(records)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{ContentCompressor, stub};
    use crate::stores::InMemoryPayloadStore;
    use crate::tools::ErasedTool;

    fn setup() -> (Arc<ToolResponseCache<InMemoryPayloadStore>>, ToolRegistry<()>) {
        let cache = Arc::new(ToolResponseCache::new(Arc::new(InMemoryPayloadStore::new())));
        let mut registry = ToolRegistry::new();
        register_retrieval_tools(&mut registry, Arc::clone(&cache));
        (cache, registry)
    }

    fn tool_ctx() -> ToolContext<()> {
        ToolContext::new(())
    }

    async fn call(registry: &ToolRegistry<()>, name: &str, input: Value) -> Result<ToolResult> {
        let tool = registry.get(name).context("tool not registered")?;
        tool.execute(&tool_ctx(), input).await
    }

    #[test]
    fn test_all_tools_registered() {
        let (_, registry) = setup();
        let names: Vec<String> = registry.to_llm_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "expandTokens",
                "grepToolResponse",
                "listToolResponses",
                "queryToolResponse",
                "tailToolResponse",
            ]
        );
    }

    #[test]
    fn test_expand_name_follows_config() {
        let cache = Arc::new(ToolResponseCache::new(Arc::new(InMemoryPayloadStore::new())));
        let mut registry: ToolRegistry<()> = ToolRegistry::new();
        let config = CompressionConfig::default().with_retrieval_tool("expand");
        register_retrieval_tools_with_config(&mut registry, cache, &config);

        assert!(registry.get("expand").is_some());
        assert!(registry.get("expandTokens").is_none());
    }

    #[tokio::test]
    async fn test_expand_stub_from_compressed_output() -> Result<()> {
        let (cache, registry) = setup();
        let compressor = ContentCompressor::with_defaults(Arc::clone(cache.store()));

        let data = "x".repeat(40_000);
        let content = serde_json::to_string(&json!({ "data": data }))?;
        let compressed = compressor.compress_content(&content, "");
        let key = stub::extract_keys(&compressed).remove(0);

        let result = call(&registry, "expandTokens", json!({ "key": key })).await?;
        assert!(result.success);
        assert_eq!(result.output, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_expand_miss_is_tool_error() -> Result<()> {
        let (cache, registry) = setup();
        cache.store_tool_response("content", "call_1", Some("search"))?;

        let result = call(&registry, "expandTokens", json!({ "key": "missing" })).await?;
        assert!(!result.success);
        assert!(result.output.contains("No data found"));
        assert!(result.output.contains("Available"));
        assert!(result.output.contains("call_1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_input_is_error() {
        let (_, registry) = setup();
        let result = call(&registry, "expandTokens", json!({ "id": 1 })).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_query_grep_tail() -> Result<()> {
        let (cache, registry) = setup();
        let response = json!({"rows": [{"name": "a"}, {"name": "b"}]}).to_string();
        cache.store_tool_response(&response, "call_1", Some("db"))?;
        cache.store_tool_response("one\ntwo\nthree", "call_2", Some("bash"))?;

        let result = call(
            &registry,
            "queryToolResponse",
            json!({ "id": "call_1", "filter": ".rows[].name" }),
        )
        .await?;
        assert!(result.success);
        assert_eq!(result.output, "\"a\"\n\"b\"");

        let result = call(
            &registry,
            "queryToolResponse",
            json!({ "id": "call_1", "filter": ".rows.name" }),
        )
        .await?;
        assert!(!result.success);
        assert!(result.output.contains("Structure:"));

        let result = call(
            &registry,
            "grepToolResponse",
            json!({ "id": "call_2", "pattern": "T", "case_insensitive": true }),
        )
        .await?;
        assert!(result.success);
        assert_eq!(result.output, "Found 2 matches:\n2:two\n3:three");

        let result = call(&registry, "tailToolResponse", json!({ "id": "call_2", "lines": 1 }))
            .await?;
        assert_eq!(result.output, "[lines 3-3 of 3]\nthree");
        Ok(())
    }

    #[tokio::test]
    async fn test_list_returns_records_as_data() -> Result<()> {
        let (cache, registry) = setup();
        cache.store_tool_response("abc", "call_1", Some("read"))?;

        let tool = registry.get("listToolResponses").context("tool not registered")?;
        let ctx = tool_ctx();
        let result = tool.execute(&ctx, json!({})).await?;

        assert!(result.success);
        assert!(result.output.contains("call_1 (read): 3 chars"));
        let data = result.data.context("missing data")?;
        assert_eq!(data[0]["tool_call_id"], "call_1");
        assert_eq!(data[0]["original_length"], 3);
        Ok(())
    }
}
