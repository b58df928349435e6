//! Token-bounded compression of message content.
//!
//! Large tool outputs are shrunk before they are counted toward the token
//! budget or sent to the LLM. Nothing is lost: every piece that is moved out
//! of the message is kept in a [`PayloadStore`](crate::PayloadStore) and
//! replaced by a stub naming the key and the retrieval tool.
//!
//! # Overview
//!
//! - [`TokenEstimator`] decides what is "too large" (`ceil(len / 4)`).
//! - [`ContentCompressor`] is the entry point for raw message content.
//! - [`JsonPropertyCompressor`] externalises oversized parts of JSON,
//!   chunking arrays from the back.
//! - [`StringChunker`] splits flat text into a chain of stored chunks linked
//!   by `[NEXT_CHUNK_KEY: <key>]` markers.
//! - [`generate_schema`] records the shape of compressed JSON objects.
//!
//! Compressing already-compressed content is a no-op, so the processor can
//! run on every pass over the conversation.
//!
//! # Example
//!
//! ```
//! use agent_compress::compression::{CompressionConfig, ContentCompressor};
//! use agent_compress::InMemoryPayloadStore;
//! use std::sync::Arc;
//!
//! let compressor = ContentCompressor::new(
//!     Arc::new(InMemoryPayloadStore::new()),
//!     CompressionConfig::default(),
//! );
//! let output = "log line\n".repeat(5_000);
//! let compressed = compressor.compress_content(&output, "");
//! assert!(compressed.starts_with("[COMPRESSED_STRING"));
//! assert_eq!(compressor.compress_content(&compressed, ""), compressed);
//! ```

mod chunker;
mod compressor;
mod config;
mod estimator;
mod properties;
mod schema;
pub mod stub;

#[cfg(test)]
mod tests;

pub use chunker::{StringChunker, reassemble_chain};
pub use compressor::ContentCompressor;
pub use config::CompressionConfig;
pub use estimator::TokenEstimator;
pub use properties::JsonPropertyCompressor;
pub use schema::{Schema, generate_schema};

use serde_json::Value;

/// Parse `text` as a JSON object or array.
///
/// Scalars are not treated as JSON: a long run of digits is text, and
/// parsing it as a number would lose precision.
#[must_use]
pub fn try_parse_json(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|value| value.is_object() || value.is_array())
}

/// Whether `content` is output of an earlier compression pass: it carries a
/// stub or chunk marker, or is a JSON object referencing its schema.
#[must_use]
pub fn is_compressed(content: &str) -> bool {
    stub::contains_marker(content)
        || try_parse_json(content).is_some_and(|value| value.get(stub::SCHEMA_KEY_FIELD).is_some())
}
