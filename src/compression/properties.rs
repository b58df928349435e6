//! Depth-first externalisation of oversized JSON properties.

use crate::stores::PayloadStore;
use anyhow::{Context, Result};
use serde_json::{Map, Value};

use super::config::CompressionConfig;
use super::estimator::TokenEstimator;
use super::stub::{self, Stub, StubKind};
use super::try_parse_json;

const OBJECT_KEY_PREFIX: &str = "compressed_obj_";
const ARRAY_CHUNK_KEY_PREFIX: &str = "compressed_arr_";
const PROPERTY_KEY_PREFIX: &str = "compressed_prop_";

/// Walks a JSON value and replaces every sub-value that is still over the
/// threshold, after its own children were compressed, with a stub.
///
/// Arrays are chunked from the back so that stub index ranges are stable
/// and the most recent elements are the first to be moved out.
pub struct JsonPropertyCompressor<'a, S: PayloadStore + ?Sized> {
    store: &'a S,
    config: &'a CompressionConfig,
}

impl<'a, S: PayloadStore + ?Sized> JsonPropertyCompressor<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, config: &'a CompressionConfig) -> Self {
        Self { store, config }
    }

    /// Compress `value`, found at `path` in the original structure.
    ///
    /// # Errors
    /// Returns an error if a payload cannot be stored.
    pub fn compress(&self, value: Value, path: &str) -> Result<Value> {
        match value {
            Value::Object(map) => self.compress_object(map, path),
            Value::Array(items) => self.compress_array(items, path),
            Value::String(text) => self.compress_string(text, path),
            primitive => Ok(primitive),
        }
    }

    fn compress_object(&self, map: Map<String, Value>, path: &str) -> Result<Value> {
        let mut compressed = Map::with_capacity(map.len());
        for (key, child) in map {
            let child_path = property_path(path, &key);
            compressed.insert(key, self.compress(child, &child_path)?);
        }

        let serialized = serde_json::to_string(&compressed)?;
        let tokens = TokenEstimator::estimate_text(&serialized);
        if tokens <= self.config.threshold_tokens {
            return Ok(Value::Object(compressed));
        }

        let key = self.store.generate_key(OBJECT_KEY_PREFIX);
        self.store
            .store(&key, &serialized)
            .with_context(|| format!("Failed to store object at '{path}'"))?;
        log::debug!("Compressed JSON object path={path} tokens={tokens} key={key}");

        let child_keys = compressed.keys().cloned().collect();
        let stub = Stub::new(StubKind::JsonObject, tokens, &key, path, &serialized)
            .with_child_keys(child_keys);
        Ok(Value::String(self.render(&stub)))
    }

    fn compress_array(&self, items: Vec<Value>, path: &str) -> Result<Value> {
        let items = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| self.compress(item, &index_path(path, index)))
            .collect::<Result<Vec<_>>>()?;

        let lengths = items
            .iter()
            .map(|item| serde_json::to_string(item).map(|s| s.len()))
            .collect::<Result<Vec<_>, _>>()?;
        let total_tokens = TokenEstimator::estimate_len(array_len(&lengths));
        if CompressionConfig::within_ratio(
            total_tokens,
            self.config.threshold_tokens,
            self.config.array_tolerance,
        ) {
            return Ok(Value::Array(items));
        }

        let mut remaining = items;
        let mut chunk: Vec<Value> = Vec::new();
        let mut chunk_lengths: Vec<usize> = Vec::new();
        // Stubs in back-to-front order
        let mut stubs: Vec<Value> = Vec::new();

        while let Some(item) = remaining.pop() {
            chunk.push(item);
            chunk_lengths.push(lengths[remaining.len()]);

            let chunk_tokens = TokenEstimator::estimate_len(array_len(&chunk_lengths));
            if chunk_tokens <= self.config.threshold_tokens {
                continue;
            }

            chunk.reverse();
            let start = remaining.len();
            let end = start + chunk.len() - 1;
            let serialized = serde_json::to_string(&chunk)?;
            let key = self.store.generate_key(ARRAY_CHUNK_KEY_PREFIX);
            self.store
                .store(&key, &serialized)
                .with_context(|| format!("Failed to store items {start}-{end} of '{path}'"))?;
            log::debug!(
                "Compressed array chunk path={path} items={start}-{end} tokens={chunk_tokens} key={key}"
            );

            let stub = Stub::new(
                StubKind::JsonArrayChunk,
                chunk_tokens,
                &key,
                path,
                &serialized,
            )
            .with_detail(format!("items {start}-{end}"));
            stubs.push(Value::String(self.render(&stub)));
            chunk.clear();
            chunk_lengths.clear();
        }

        // Leftovers never filled a chunk and stay inline, in original order
        chunk.reverse();
        chunk.extend(stubs.into_iter().rev());
        Ok(Value::Array(chunk))
    }

    fn compress_string(&self, text: String, path: &str) -> Result<Value> {
        if stub::contains_marker(&text) {
            return Ok(Value::String(text));
        }
        let tokens = TokenEstimator::estimate_text(&text);
        if tokens <= self.config.threshold_tokens {
            return Ok(Value::String(text));
        }

        if let Some(embedded) = try_parse_json(&text) {
            let compressed = match self.compress(embedded, path)? {
                Value::String(stub) => stub,
                other => serde_json::to_string(&other)?,
            };
            if CompressionConfig::shrunk_below(
                compressed.len(),
                text.len(),
                self.config.embedded_json_ratio,
            ) {
                return Ok(Value::String(compressed));
            }
        }

        let key = self.store.generate_key(PROPERTY_KEY_PREFIX);
        self.store
            .store(&key, &text)
            .with_context(|| format!("Failed to store property '{path}'"))?;
        log::debug!("Compressed JSON property path={path} tokens={tokens} key={key}");

        let stub = Stub::new(StubKind::JsonProperty, tokens, &key, path, &text);
        Ok(Value::String(self.render(&stub)))
    }

    fn render(&self, stub: &Stub<'_>) -> String {
        stub.render(self.config.preview_chars, &self.config.retrieval_tool)
    }
}

/// Serialized length of a compact JSON array whose elements serialize to
/// `lengths`: brackets plus separating commas.
fn array_len(lengths: &[usize]) -> usize {
    2 + lengths.iter().sum::<usize>() + lengths.len().saturating_sub(1)
}

pub(super) fn property_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}
