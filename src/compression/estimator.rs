//! Token estimation used for every compression threshold.

use crate::llm::{Content, ContentBlock, Message};

/// Estimates token count for text and messages.
///
/// Uses a simple heuristic of ~4 characters per token. The estimate is the
/// only size measure the compressor consults; it is never replaced by a real
/// tokenizer, so thresholds stay deterministic across models.
pub struct TokenEstimator;

impl TokenEstimator {
    /// Characters per token estimate.
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Overhead tokens per message (role, formatting).
    const MESSAGE_OVERHEAD: usize = 4;

    /// Overhead for tool use blocks (id, name, formatting).
    const TOOL_USE_OVERHEAD: usize = 20;

    /// Overhead for tool result blocks (id, formatting).
    const TOOL_RESULT_OVERHEAD: usize = 10;

    /// Estimate tokens for a text string: `ceil(len / 4)`.
    #[must_use]
    pub const fn estimate_text(text: &str) -> usize {
        Self::estimate_len(text.len())
    }

    /// Estimate tokens for a text of `len` bytes.
    #[must_use]
    pub const fn estimate_len(len: usize) -> usize {
        len.div_ceil(Self::CHARS_PER_TOKEN)
    }

    /// Estimate tokens for a single message.
    #[must_use]
    pub fn estimate_message(message: &Message) -> usize {
        let content_tokens = match &message.content {
            Content::Text(text) => Self::estimate_text(text),
            Content::Blocks(blocks) => blocks.iter().map(Self::estimate_block).sum(),
        };

        content_tokens + Self::MESSAGE_OVERHEAD
    }

    /// Estimate tokens for a content block.
    #[must_use]
    pub fn estimate_block(block: &ContentBlock) -> usize {
        match block {
            ContentBlock::Text { text } => Self::estimate_text(text),
            ContentBlock::ToolUse { name, input, .. } => {
                let input_str = serde_json::to_string(input).unwrap_or_default();
                Self::estimate_text(name)
                    + Self::estimate_text(&input_str)
                    + Self::TOOL_USE_OVERHEAD
            }
            ContentBlock::ToolResult { content, .. } => {
                Self::estimate_text(content) + Self::TOOL_RESULT_OVERHEAD
            }
        }
    }

    /// Estimate total tokens for a message history.
    #[must_use]
    pub fn estimate_history(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_text() {
        assert_eq!(TokenEstimator::estimate_text(""), 0);
        assert_eq!(TokenEstimator::estimate_text("hi"), 1);
        assert_eq!(TokenEstimator::estimate_text("test"), 1);
        assert_eq!(TokenEstimator::estimate_text("hello"), 2);
        assert_eq!(TokenEstimator::estimate_text("hello world!"), 3);
    }

    #[test]
    fn test_estimate_threshold_boundary() {
        // 16000 chars is exactly the default threshold, 16001 is one token over
        assert_eq!(TokenEstimator::estimate_text(&"x".repeat(16_000)), 4000);
        assert_eq!(TokenEstimator::estimate_text(&"x".repeat(16_001)), 4001);
        assert_eq!(TokenEstimator::estimate_len(40_000), 10_000);
    }

    #[test]
    fn test_estimate_tool_result() {
        let message = Message::tool_result("tool_123", "File contents here...", false);

        // 21 chars = 6 tokens, + 10 block overhead + 4 message overhead
        assert_eq!(TokenEstimator::estimate_message(&message), 20);
    }

    #[test]
    fn test_estimate_tool_use_accounts_for_input() {
        let message = Message::assistant_with_tool_use(
            None,
            "tool_123",
            "read",
            json!({"path": "/test.txt"}),
        );

        // 1 (name) + 5 (input) + 20 (overhead) + 4 (message)
        assert_eq!(TokenEstimator::estimate_message(&message), 30);
    }

    #[test]
    fn test_estimate_history() {
        let messages = vec![
            Message::user("Hello"),          // 2 + 4
            Message::assistant("Hi there!"), // 3 + 4
            Message::user("How are you?"),   // 3 + 4
        ];

        assert_eq!(TokenEstimator::estimate_history(&messages), 20);
        assert_eq!(TokenEstimator::estimate_history(&[]), 0);
    }
}
