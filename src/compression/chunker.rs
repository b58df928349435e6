//! Chunk chains for oversized flat strings.

use crate::stores::PayloadStore;
use anyhow::{Context, Result, bail};
use std::collections::HashSet;

use super::config::CompressionConfig;
use super::estimator::TokenEstimator;
use super::stub::{self, Stub, StubKind};

const CHUNK_KEY_PREFIX: &str = "chunk_";

/// Splits strings longer than [`CompressionConfig::byte_limit`] into a chain
/// of stored segments and returns a stub pointing at the first one.
///
/// Segments are cut from the tail backward, so every segment except the
/// head fills `byte_limit` bytes up to the last char boundary. Each segment
/// except the last ends with a `[NEXT_CHUNK_KEY: <key>]` marker naming its
/// successor.
pub struct StringChunker<'a, S: PayloadStore + ?Sized> {
    store: &'a S,
    config: &'a CompressionConfig,
}

impl<'a, S: PayloadStore + ?Sized> StringChunker<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, config: &'a CompressionConfig) -> Self {
        Self { store, config }
    }

    /// Chunk `content`, found at `path`, or return it unchanged when it fits
    /// within the byte limit.
    ///
    /// # Errors
    /// Returns an error if a segment cannot be stored.
    pub fn compress(&self, content: &str, path: &str) -> Result<String> {
        let limit = self.config.byte_limit().max(1);
        let segments = split_from_tail(content, limit);
        if segments.len() < 2 {
            return Ok(content.to_string());
        }

        let keys: Vec<String> = segments
            .iter()
            .map(|_| self.store.generate_key(CHUNK_KEY_PREFIX))
            .collect();

        for (index, segment) in segments.iter().enumerate() {
            let stored = match keys.get(index + 1) {
                Some(next) => format!("{segment}{}", stub::next_chunk_marker(next)),
                None => (*segment).to_string(),
            };
            self.store
                .store(&keys[index], &stored)
                .with_context(|| format!("Failed to store chunk {index} of '{path}'"))?;
        }

        let tokens = TokenEstimator::estimate_text(content);
        log::debug!(
            "Chunked string path={path} tokens={tokens} chunks={} first_key={}",
            segments.len(),
            keys[0]
        );

        let stub = Stub::new(StubKind::String, tokens, &keys[0], path, content)
            .with_detail(format!("{} chunks", segments.len()));
        Ok(stub.render(self.config.preview_chars, &self.config.retrieval_tool))
    }
}

/// Split `content` into segments of at most `limit` bytes counted from the
/// end; the returned segments are in reading order.
///
/// Cuts move forward to the next char boundary, so a segment may be a few
/// bytes short of `limit`. A char wider than `limit` gets a segment of its own.
fn split_from_tail(content: &str, limit: usize) -> Vec<&str> {
    if content.len() <= limit {
        return vec![content];
    }

    let mut segments = Vec::new();
    let mut end = content.len();
    while end > 0 {
        let mut start = end.saturating_sub(limit);
        while !content.is_char_boundary(start) {
            start += 1;
        }
        if start == end {
            start = content[..end]
                .char_indices()
                .next_back()
                .map_or(0, |(offset, _)| offset);
        }
        segments.push(&content[start..end]);
        end = start;
    }
    segments.reverse();
    segments
}

/// Walk a chunk chain from `first_key` and return the original content.
///
/// Returns `Ok(None)` if `first_key` is not stored. A stored chunk without a
/// marker is a complete single-segment payload.
///
/// # Errors
/// Returns an error if a link in the chain is missing or the chain loops.
pub fn reassemble_chain<S: PayloadStore + ?Sized>(
    store: &S,
    first_key: &str,
) -> Result<Option<String>> {
    let Some(first) = store.retrieve(first_key)? else {
        return Ok(None);
    };

    let mut visited = HashSet::from([first_key.to_string()]);
    let mut content = String::new();
    let mut segment = first;
    loop {
        let (body, next) = stub::split_next_chunk(&segment);
        content.push_str(body);
        let Some(next) = next.map(str::to_string) else {
            return Ok(Some(content));
        };
        if !visited.insert(next.clone()) {
            bail!("Chunk chain starting at '{first_key}' loops back to '{next}'");
        }
        segment = store
            .retrieve(&next)?
            .with_context(|| format!("Chunk '{next}' of chain '{first_key}' is missing"))?;
    }
}
