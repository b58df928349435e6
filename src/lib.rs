//! Agent Compress - token-bounded message compression with lossless
//! retrieval for LLM agents.
//!
//! Tool outputs routinely exceed what an agent can afford to send back to
//! the model. This crate shrinks them below a token threshold by moving
//! oversized parts into a key/value store and leaving a stub behind, and
//! gives the agent tools to read the originals back:
//! - [`ContentCompressor`] rewrites text and JSON into stubs and chunk chains
//! - [`CompressionProcessor`] applies it to a conversation before each LLM call
//! - [`ToolResponseCache`] keeps every raw tool result, first write wins
//! - [`register_retrieval_tools`] adds `expandTokens`, `queryToolResponse`,
//!   `grepToolResponse`, `tailToolResponse` and `listToolResponses`
//!
//! # Example
//!
//! ```
//! use agent_compress::{
//!     CompressionConfig, CompressionProcessor, InMemoryPayloadStore, Message,
//!     MessageProcessor, ToolRegistry, register_retrieval_tools,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryPayloadStore::new());
//! let processor = CompressionProcessor::for_store(store, CompressionConfig::default());
//!
//! let mut tools: ToolRegistry<()> = ToolRegistry::new();
//! register_retrieval_tools(&mut tools, Arc::clone(processor.cache()));
//!
//! let original = vec![Message::tool_result("call_1", "row\n".repeat(10_000), false)];
//! let mut working = original.clone();
//! processor.process(&original, &mut working)?;
//! assert_ne!(working, original);
//! # Ok::<(), anyhow::Error>(())
//! ```

#![forbid(unsafe_code)]

pub mod cache;
pub mod compression;
pub mod llm;
mod processor;
pub mod retrieval;
mod stores;
mod tools;
mod types;

pub use cache::{GrepOptions, ToolResponseCache, ToolResponseRecord};
pub use compression::{CompressionConfig, ContentCompressor, TokenEstimator};
pub use llm::{Content, ContentBlock, Message, Role};
pub use processor::{CompressionProcessor, MessageFilter, MessageProcessor};
pub use retrieval::{register_retrieval_tools, register_retrieval_tools_with_config};
pub use stores::{InMemoryPayloadStore, PayloadStore, generate_key};
pub use tools::{
    DynamicToolName, ErasedTool, RetrievalToolName, Tool, ToolContext, ToolName, ToolRegistry,
    tool_name_to_string,
};
pub use types::ToolResult;
