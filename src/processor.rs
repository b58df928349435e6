//! Conversation rewriting before messages reach the LLM.
//!
//! The host keeps two copies of the conversation: the original, which is
//! persisted, and a working copy that is sent to the model. A
//! [`MessageProcessor`] reads the first and rewrites the second.

use crate::cache::ToolResponseCache;
use crate::compression::{CompressionConfig, ContentCompressor, TokenEstimator};
use crate::llm::{Content, ContentBlock, Message};
use crate::stores::PayloadStore;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Path reported in stubs for compressed tool-call arguments.
const ARGUMENTS_PATH: &str = "arguments";

/// A step in the host's message pipeline.
pub trait MessageProcessor: Send + Sync {
    /// Rewrite `working` in place. `original` is the unmodified
    /// conversation and must not be relied on to match `working` in length.
    ///
    /// # Errors
    /// Returns an error if the processor cannot record its state.
    fn process(&self, original: &[Message], working: &mut [Message]) -> Result<()>;
}

/// Decides whether a message is compressed.
pub type MessageFilter = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// Records raw tool results, then compresses the working copy.
///
/// Compressed content is safe to process again: stubs are recognised and
/// left alone, so the processor can run before every LLM call.
pub struct CompressionProcessor<S: PayloadStore + ?Sized> {
    compressor: ContentCompressor<S>,
    cache: Arc<ToolResponseCache<S>>,
    filter: Option<MessageFilter>,
}

impl<S: PayloadStore + ?Sized> CompressionProcessor<S> {
    #[must_use]
    pub const fn new(compressor: ContentCompressor<S>, cache: Arc<ToolResponseCache<S>>) -> Self {
        Self {
            compressor,
            cache,
            filter: None,
        }
    }

    /// Build a compressor and cache sharing `store`.
    #[must_use]
    pub fn for_store(store: Arc<S>, config: CompressionConfig) -> Self {
        let cache = Arc::new(ToolResponseCache::new(Arc::clone(&store)));
        Self::new(ContentCompressor::new(store, config), cache)
    }

    /// Only compress messages for which `filter` returns true. Tool results
    /// are recorded regardless.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// The cache the retrieval tools should read from.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ToolResponseCache<S>> {
        &self.cache
    }

    #[must_use]
    pub const fn compressor(&self) -> &ContentCompressor<S> {
        &self.compressor
    }

    fn record_tool_results(&self, original: &[Message]) -> Result<()> {
        let tool_names: HashMap<&str, &str> = original
            .iter()
            .flat_map(blocks)
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
                _ => None,
            })
            .collect();

        for block in original.iter().flat_map(blocks) {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                let tool_name = tool_names.get(tool_use_id.as_str()).copied();
                self.cache
                    .store_tool_response(content, tool_use_id, tool_name)
                    .with_context(|| format!("Failed to record tool result {tool_use_id}"))?;
            }
        }
        Ok(())
    }

    fn selects(&self, message: &Message) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(message))
    }

    fn compress_message(&self, message: &mut Message) {
        match &mut message.content {
            Content::Text(text) => self.compress_text(text),
            Content::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => self.compress_text(text),
                        ContentBlock::ToolResult { content, .. } => self.compress_text(content),
                        ContentBlock::ToolUse { input, .. } => self.compress_arguments(input),
                    }
                }
            }
        }
    }

    fn compress_text(&self, text: &mut String) {
        *text = self.compressor.compress_content(text, "");
    }

    fn compress_arguments(&self, input: &mut Value) {
        let compressed = match input.take() {
            Value::String(arguments) => {
                Value::String(self.compressor.compress_content(&arguments, ARGUMENTS_PATH))
            }
            other => self.compressor.compress_value(other, ARGUMENTS_PATH),
        };
        *input = compressed;
    }
}

impl<S: PayloadStore + ?Sized> MessageProcessor for CompressionProcessor<S> {
    fn process(&self, original: &[Message], working: &mut [Message]) -> Result<()> {
        self.record_tool_results(original)?;

        let before = TokenEstimator::estimate_history(working);
        for message in working.iter_mut() {
            if self.selects(message) {
                self.compress_message(message);
            }
        }
        let after = TokenEstimator::estimate_history(working);

        if after < before {
            log::debug!(
                "Compressed conversation tokens={before}->{after} saved={}",
                before - after
            );
        }
        Ok(())
    }
}

fn blocks(message: &Message) -> &[ContentBlock] {
    match &message.content {
        Content::Blocks(blocks) => blocks,
        Content::Text(_) => &[],
    }
}
