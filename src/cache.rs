//! Lossless originals of tool responses and the read-only operations the
//! retrieval tools run against them.
//!
//! The compression processor records every raw tool result here before the
//! conversation copy is compressed. Agents then look content up by tool-call
//! id or by a compression key taken from a stub:
//!
//! - [`ToolResponseCache::expand`] returns the raw stored content.
//! - [`ToolResponseCache::query`] runs a jq-style [`Filter`].
//! - [`ToolResponseCache::grep`] searches lines by regex.
//! - [`ToolResponseCache::tail`] returns the last lines.
//! - [`ToolResponseCache::list`] summarises everything stored.
//!
//! Lookup failures are errors whose message is written for the agent: it
//! names what is available so the next call can succeed.

mod query;

pub use query::{Filter, type_name};

use crate::compression::{generate_schema, reassemble_chain, stub, try_parse_json};
use crate::stores::PayloadStore;
use anyhow::{Context, Result, bail};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;

/// Maximum number of matching lines `grep` returns.
pub const MAX_GREP_MATCHES: usize = 50;

/// Lines `tail` returns when no count is given.
pub const DEFAULT_TAIL_LINES: usize = 50;

/// Characters of schema shown when a query fails.
const SCHEMA_PREVIEW_CHARS: usize = 1_000;

/// Compression keys named in a miss message.
const MAX_LISTED_KEYS: usize = 20;

/// A recorded tool response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponseRecord {
    pub tool_call_id: String,
    pub tool_name: Option<String>,
    /// Normalised response text.
    pub content: String,
    /// Length in characters of the response as it was received.
    pub original_length: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    /// Insertion order within the cache.
    pub sequence: usize,
}

/// Options for [`ToolResponseCache::grep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrepOptions {
    pub case_insensitive: bool,
    /// Lines of context printed around each match.
    pub context_lines: usize,
}

/// Tool responses keyed by tool-call id, alongside the payload store the
/// compressor writes to.
///
/// The first response recorded for an id wins; later writes are ignored so
/// that a compressed copy can never replace the original.
pub struct ToolResponseCache<S: PayloadStore + ?Sized> {
    store: Arc<S>,
    records: RwLock<HashMap<String, ToolResponseRecord>>,
}

impl<S: PayloadStore + ?Sized> ToolResponseCache<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// The payload store compression keys are resolved against.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Record `content` as the response to `tool_call_id`.
    ///
    /// Responses wrapped in a content envelope (`{"content": [{"type":
    /// "text", "text": ...}]}`) are stored as their joined text.
    ///
    /// Returns `false` if a response for the id was already recorded.
    ///
    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn store_tool_response(
        &self,
        content: &str,
        tool_call_id: &str,
        tool_name: Option<&str>,
    ) -> Result<bool> {
        let mut records = self.records.write().ok().context("lock poisoned")?;
        if records.contains_key(tool_call_id) {
            log::debug!("Tool response already recorded, ignoring id={tool_call_id}");
            return Ok(false);
        }

        let record = ToolResponseRecord {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.map(str::to_string),
            content: normalize_envelope(content),
            original_length: content.chars().count(),
            stored_at: OffsetDateTime::now_utc(),
            sequence: records.len(),
        };
        log::debug!(
            "Recorded tool response id={tool_call_id} tool={} chars={}",
            tool_name.unwrap_or("unknown"),
            record.original_length
        );
        records.insert(tool_call_id.to_string(), record);
        Ok(true)
    }

    /// The record for `tool_call_id`, if any.
    ///
    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn get(&self, tool_call_id: &str) -> Result<Option<ToolResponseRecord>> {
        let records = self.records.read().ok().context("lock poisoned")?;
        Ok(records.get(tool_call_id).cloned())
    }

    /// Every record in insertion order.
    ///
    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn records(&self) -> Result<Vec<ToolResponseRecord>> {
        let records = self.records.read().ok().context("lock poisoned")?;
        let mut all: Vec<ToolResponseRecord> = records.values().cloned().collect();
        all.sort_by_key(|record| record.sequence);
        Ok(all)
    }

    /// Drop every record and every stored payload.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned or the store fails.
    pub fn clear(&self) -> Result<()> {
        self.records.write().ok().context("lock poisoned")?.clear();
        self.store.clear()
    }

    /// Raw content for a compression key, or else for a tool-call id.
    ///
    /// Chunked payloads are returned one segment at a time, including the
    /// marker naming the next segment.
    ///
    /// # Errors
    /// Returns an error naming the available ids and keys when nothing is
    /// stored under `key`.
    pub fn expand(&self, key: &str) -> Result<String> {
        if let Some(payload) = self.store.retrieve(key)? {
            return Ok(payload);
        }
        if let Some(record) = self.get(key)? {
            return Ok(record.content);
        }
        Err(self.not_found(key))
    }

    /// Full content for a tool-call id, or for a compression key with any
    /// chunk chain followed to the end.
    ///
    /// # Errors
    /// Returns an error if a chain is broken or the backend fails.
    pub fn resolve(&self, id: &str) -> Result<Option<String>> {
        if let Some(record) = self.get(id)? {
            return Ok(Some(record.content));
        }
        reassemble_chain(self.store.as_ref(), id)
    }

    /// Run a jq-style `filter` over the JSON stored for `id`.
    ///
    /// JSON nested inside string values is parsed before the filter runs,
    /// so `.body.items` works on a response whose `body` is a JSON string.
    ///
    /// # Errors
    /// Returns an error if nothing is stored for `id`, the content is not
    /// JSON, or the filter fails. Filter failures include the structure of
    /// the content.
    pub fn query(&self, id: &str, filter: &str) -> Result<String> {
        let content = self.resolve_or_not_found(id)?;
        let Some(value) = try_parse_json(&content) else {
            bail!(
                "Content for '{id}' is not JSON. Use grepToolResponse or tailToolResponse to read it."
            );
        };
        let value = unwrap_nested_json(value);

        let results = Filter::parse(filter)
            .and_then(|filter| filter.apply(&value))
            .map_err(|e| {
                let schema = serde_json::to_string(&generate_schema(&value)).unwrap_or_default();
                anyhow::anyhow!(
                    "Query '{filter}' failed: {e:#}\nStructure: {}",
                    stub::preview(&schema, SCHEMA_PREVIEW_CHARS)
                )
            })?;

        if results.is_empty() {
            return Ok("(no results)".to_string());
        }
        let rendered = results
            .iter()
            .map(serde_json::to_string_pretty)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rendered.join("\n"))
    }

    /// Lines of the content stored for `id` matching `pattern`.
    ///
    /// Matching lines print as `line:text`, context lines as `line-text`,
    /// and separate groups are divided by `--`.
    ///
    /// # Errors
    /// Returns an error if nothing is stored for `id` or the pattern is not
    /// a valid regex.
    pub fn grep(&self, id: &str, pattern: &str, options: GrepOptions) -> Result<String> {
        let content = self.resolve_or_not_found(id)?;
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .build()
            .with_context(|| format!("Invalid pattern '{pattern}'"))?;

        let lines: Vec<&str> = content.lines().collect();
        let matches: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| regex.is_match(line))
            .map(|(index, _)| index)
            .collect();
        if matches.is_empty() {
            return Ok(format!("No matches found for pattern '{pattern}'"));
        }

        let shown = &matches[..matches.len().min(MAX_GREP_MATCHES)];
        let mut output = if matches.len() > MAX_GREP_MATCHES {
            format!(
                "Found {} matches (showing first {MAX_GREP_MATCHES}):\n",
                matches.len()
            )
        } else {
            format!("Found {} matches:\n", matches.len())
        };

        let mut printed_until: Option<usize> = None;
        for &index in shown {
            let start = index.saturating_sub(options.context_lines);
            let end = (index + options.context_lines).min(lines.len() - 1);
            let start = match printed_until {
                Some(last) if start <= last + 1 => last + 1,
                Some(_) => {
                    output.push_str("--\n");
                    start
                }
                None => start,
            };
            for line in start..=end {
                let separator = if matches.binary_search(&line).is_ok() { ':' } else { '-' };
                let _ = writeln!(output, "{}{separator}{}", line + 1, lines[line]);
            }
            printed_until = Some(printed_until.map_or(end, |last| last.max(end)));
        }
        Ok(output.trim_end().to_string())
    }

    /// The last `lines` lines stored for `id` (default
    /// [`DEFAULT_TAIL_LINES`]).
    ///
    /// # Errors
    /// Returns an error if nothing is stored for `id`.
    pub fn tail(&self, id: &str, lines: Option<usize>) -> Result<String> {
        let content = self.resolve_or_not_found(id)?;
        let count = lines.unwrap_or(DEFAULT_TAIL_LINES);
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(count);
        if start == 0 {
            return Ok(content);
        }
        Ok(format!(
            "[lines {}-{} of {}]\n{}",
            start + 1,
            all.len(),
            all.len(),
            all[start..].join("\n")
        ))
    }

    /// Human-readable summary of every recorded response and the number of
    /// stored compression payloads.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned or the store fails.
    pub fn list(&self) -> Result<String> {
        let records = self.records()?;
        let payloads = self.store.len()?;

        let mut output = String::new();
        if records.is_empty() {
            output.push_str("No tool responses stored.\n");
        } else {
            let _ = writeln!(output, "{} tool responses:", records.len());
            for record in &records {
                let stored_at = record
                    .stored_at
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default();
                let _ = writeln!(
                    output,
                    "- {} ({}): {} chars, stored {stored_at}",
                    record.tool_call_id,
                    record.tool_name.as_deref().unwrap_or("unknown tool"),
                    record.original_length,
                );
            }
        }
        let _ = write!(output, "Compression payloads stored: {payloads}");
        Ok(output)
    }

    fn resolve_or_not_found(&self, id: &str) -> Result<String> {
        self.resolve(id)?.ok_or_else(|| self.not_found(id))
    }

    fn not_found(&self, key: &str) -> anyhow::Error {
        let ids: Vec<String> = self
            .records()
            .unwrap_or_default()
            .into_iter()
            .map(|record| record.tool_call_id)
            .collect();
        let keys = self.store.keys().unwrap_or_default();

        let mut message = format!("No data found for '{key}'.");
        if ids.is_empty() {
            message.push_str("\nAvailable tool responses: none");
        } else {
            let _ = write!(message, "\nAvailable tool responses: {}", ids.join(", "));
        }
        if keys.is_empty() {
            message.push_str("\nAvailable compression keys: none");
        } else {
            let listed: Vec<&str> = keys.iter().take(MAX_LISTED_KEYS).map(String::as_str).collect();
            let _ = write!(message, "\nAvailable compression keys: {}", listed.join(", "));
            if keys.len() > MAX_LISTED_KEYS {
                let _ = write!(message, " (and {} more)", keys.len() - MAX_LISTED_KEYS);
            }
        }
        anyhow::anyhow!(message)
    }
}

/// Joined text of a `{"content": [{"type": "text", "text": ...}]}` envelope,
/// or `content` unchanged.
fn normalize_envelope(content: &str) -> String {
    let Some(Value::Object(map)) = try_parse_json(content) else {
        return content.to_string();
    };
    let Some(Value::Array(parts)) = map.get("content") else {
        return content.to_string();
    };

    let texts: Option<Vec<&str>> = parts
        .iter()
        .map(|part| {
            (part.get("type")?.as_str()? == "text")
                .then(|| part.get("text")?.as_str())
                .flatten()
        })
        .collect();
    match texts {
        Some(texts) if !texts.is_empty() => texts.join("\n"),
        _ => content.to_string(),
    }
}

/// Replace string values that hold JSON objects or arrays with the parsed
/// value, recursively.
fn unwrap_nested_json(value: Value) -> Value {
    match value {
        Value::String(text) => match try_parse_json(&text) {
            Some(parsed) => unwrap_nested_json(parsed),
            None => Value::String(text),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_nested_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, child)| (key, unwrap_nested_json(child)))
                .collect(),
        ),
        primitive => primitive,
    }
}
