//! Top-level content compression.

use crate::stores::{PayloadStore, StagedStore};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use super::chunker::StringChunker;
use super::config::CompressionConfig;
use super::estimator::TokenEstimator;
use super::properties::{JsonPropertyCompressor, property_path};
use super::schema::{Schema, generate_schema};
use super::stub::SCHEMA_KEY_FIELD;
use super::{is_compressed, try_parse_json};

const SCHEMA_KEY_PREFIX: &str = "schema_";

/// Shrinks message content under the configured token threshold.
///
/// One compressor is created per agent session and shares its
/// [`PayloadStore`] with the retrieval tools.
///
/// Per call:
/// 1. Content that already carries a stub, a chunk marker or a
///    `_schema_key` field is returned unchanged.
/// 2. Content within the limit is returned unchanged. Top-level calls
///    (empty path) use the threshold; nested calls use the larger of the
///    threshold and the store's watermark so freshly retrieved payloads are
///    not compressed again.
/// 3. JSON objects and arrays go through the [`JsonPropertyCompressor`];
///    the result is kept if it is below `json_acceptance_ratio` of the
///    input.
/// 4. Everything else is chunked by the [`StringChunker`].
///
/// Compression never fails: on any internal error the content passes
/// through unchanged.
pub struct ContentCompressor<S: PayloadStore + ?Sized> {
    store: Arc<S>,
    config: CompressionConfig,
}

impl<S: PayloadStore + ?Sized> ContentCompressor<S> {
    #[must_use]
    pub const fn new(store: Arc<S>, config: CompressionConfig) -> Self {
        Self { store, config }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CompressionConfig::default())
    }

    #[must_use]
    pub const fn config(&self) -> &CompressionConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Compress `content`; `path` is empty for top-level message content.
    #[must_use]
    pub fn compress_content(&self, content: &str, path: &str) -> String {
        match self.try_compress(content, path) {
            Ok(Some(compressed)) => compressed,
            Ok(None) => content.to_string(),
            Err(e) => {
                log::warn!("Compression failed at path '{path}', passing content through: {e:#}");
                content.to_string()
            }
        }
    }

    /// Compress a parsed JSON value in place of its oversized parts.
    ///
    /// Used for structured tool-call arguments. A root object stays an
    /// object: each field is compressed on its own at `path.<field>`. A field
    /// that fails to compress is kept unchanged.
    #[must_use]
    pub fn compress_value(&self, value: Value, path: &str) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, child)| {
                        let child_path = property_path(path, &key);
                        let child = self.compress_field(child, &child_path);
                        (key, child)
                    })
                    .collect(),
            ),
            other => self.compress_field(other, path),
        }
    }

    fn compress_field(&self, value: Value, path: &str) -> Value {
        let fits = serde_json::to_string(&value).is_ok_and(|serialized| {
            TokenEstimator::estimate_text(&serialized) <= self.config.threshold_tokens
        });
        if fits {
            return value;
        }

        // Copied only when oversized; a failed attempt returns the input
        match self.stage_and_compress(value.clone(), path) {
            Ok(compressed) => compressed,
            Err(e) => {
                log::warn!("Compression failed at path '{path}', passing value through: {e:#}");
                value
            }
        }
    }

    fn stage_and_compress(&self, value: Value, path: &str) -> Result<Value> {
        let staged = StagedStore::new(self.store.as_ref());
        let compressed = JsonPropertyCompressor::new(&staged, &self.config).compress(value, path)?;
        staged.commit()?;
        Ok(compressed)
    }

    fn try_compress(&self, content: &str, path: &str) -> Result<Option<String>> {
        if is_compressed(content) {
            return Ok(None);
        }

        let tokens = TokenEstimator::estimate_text(content);
        let limit = if path.is_empty() {
            self.config.threshold_tokens
        } else {
            self.config
                .threshold_tokens
                .max(self.store.max_retrievable_tokens())
        };
        if tokens <= limit {
            return Ok(None);
        }

        if let Some(value) = try_parse_json(content) {
            if let Some(compressed) = self.compress_json(value, path, content.len())? {
                log::debug!(
                    "Compressed JSON content path={path} tokens={tokens}->{}",
                    TokenEstimator::estimate_text(&compressed)
                );
                return Ok(Some(compressed));
            }
            log::debug!("JSON compression did not shrink path={path}; chunking as text");
        }

        StringChunker::new(self.store.as_ref(), &self.config)
            .compress(content, path)
            .map(Some)
    }

    /// Compress parsed JSON against a staged store. Payloads reach the real
    /// store only if the result is accepted; otherwise they are discarded
    /// and the caller falls back to chunking.
    fn compress_json(&self, value: Value, path: &str, original_len: usize) -> Result<Option<String>> {
        let schema = generate_schema(&value);
        let staged = StagedStore::new(self.store.as_ref());
        let compressed = JsonPropertyCompressor::new(&staged, &self.config).compress(value, path)?;

        let (rendered, object) = match compressed {
            Value::Object(mut map) => {
                let schema_key = self.store.generate_key(SCHEMA_KEY_PREFIX);
                map.insert(SCHEMA_KEY_FIELD.to_string(), Value::String(schema_key.clone()));
                (serde_json::to_string(&map)?, Some((map, schema_key)))
            }
            // The whole value collapsed into one stub
            Value::String(stub) => (stub, None),
            other => (serde_json::to_string(&other)?, None),
        };

        if !CompressionConfig::shrunk_below(
            rendered.len(),
            original_len,
            self.config.json_acceptance_ratio,
        ) {
            return Ok(None);
        }

        let committed = staged.commit()?;
        log::debug!("Committed JSON payloads path={path} entries={committed}");

        match object {
            Some((mut map, schema_key)) if !self.store_schema(&schema_key, &schema) => {
                map.remove(SCHEMA_KEY_FIELD);
                Ok(Some(serde_json::to_string(&map)?))
            }
            _ => Ok(Some(rendered)),
        }
    }

    fn store_schema(&self, key: &str, schema: &Schema) -> bool {
        let stored = serde_json::to_string(schema)
            .map_err(anyhow::Error::from)
            .and_then(|serialized| self.store.store(key, &serialized));
        match stored {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to store schema, continuing without it: {e:#}");
                false
            }
        }
    }
}
