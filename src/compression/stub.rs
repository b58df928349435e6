//! Compression stub text format.
//!
//! Stubs are an external wire format: agents locate keys by the `Key:` line
//! and the compressor recognises its own output by the tag markers. Changing
//! the layout requires updating every consumer.
//!
//! ```text
//! [COMPRESSED_JSON_ARRAY_CHUNK - 4406 tokens, items 7-14]
//! Key: chunk_1718031234567_a1b2c3d4e
//! Path: results
//! Preview: ["first element ...
//! Use expandTokens("chunk_1718031234567_a1b2c3d4e") to retrieve the full content.
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Literal marker appended to every chunk that has a successor.
pub const NEXT_CHUNK_MARKER: &str = "[NEXT_CHUNK_KEY: ";

/// Field a compressed top-level JSON object carries to reference its schema.
pub const SCHEMA_KEY_FIELD: &str = "_schema_key";

static KEY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Key: ([A-Za-z0-9_\-]+)").expect("key line pattern is valid")
});

/// Kind of content a stub replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    /// A flat string split into a chunk chain.
    String,
    /// A whole JSON object.
    JsonObject,
    /// A contiguous run of array elements.
    JsonArrayChunk,
    /// A single oversized string property.
    JsonProperty,
}

impl StubKind {
    /// Every kind, for marker detection.
    pub const ALL: [Self; 4] = [
        Self::String,
        Self::JsonObject,
        Self::JsonArrayChunk,
        Self::JsonProperty,
    ];

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::String => "COMPRESSED_STRING",
            Self::JsonObject => "COMPRESSED_JSON_OBJECT",
            Self::JsonArrayChunk => "COMPRESSED_JSON_ARRAY_CHUNK",
            Self::JsonProperty => "COMPRESSED_JSON_PROPERTY",
        }
    }

    /// The opening marker, e.g. `[COMPRESSED_STRING`.
    #[must_use]
    pub fn marker(self) -> String {
        format!("[{}", self.tag())
    }
}

/// A stub about to be rendered.
#[derive(Debug, Clone)]
pub struct Stub<'a> {
    pub kind: StubKind,
    /// Estimated tokens of the externalised content.
    pub tokens: usize,
    pub key: &'a str,
    pub path: &'a str,
    /// Content the preview is cut from.
    pub preview_source: &'a str,
    /// Extra tag-line detail, e.g. `items 3-9` or `4 chunks`.
    pub detail: Option<String>,
    /// Child key names of a compressed object.
    pub child_keys: Vec<String>,
}

impl<'a> Stub<'a> {
    #[must_use]
    pub const fn new(
        kind: StubKind,
        tokens: usize,
        key: &'a str,
        path: &'a str,
        preview_source: &'a str,
    ) -> Self {
        Self {
            kind,
            tokens,
            key,
            path,
            preview_source,
            detail: None,
            child_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_child_keys(mut self, keys: Vec<String>) -> Self {
        self.child_keys = keys;
        self
    }

    /// Render the stub text.
    #[must_use]
    pub fn render(&self, preview_chars: usize, retrieval_tool: &str) -> String {
        let detail = self
            .detail
            .as_ref()
            .map_or_else(String::new, |detail| format!(", {detail}"));
        let path = if self.path.is_empty() {
            "(root)"
        } else {
            self.path
        };

        let mut lines = vec![
            format!("[{} - {} tokens{detail}]", self.kind.tag(), self.tokens),
            format!("Key: {}", self.key),
            format!("Path: {path}"),
        ];
        if !self.child_keys.is_empty() {
            lines.push(format!("Keys: {}", self.child_keys.join(", ")));
        }
        lines.push(format!(
            "Preview: {}",
            preview(self.preview_source, preview_chars)
        ));
        lines.push(format!(
            "Use {retrieval_tool}(\"{}\") to retrieve the full content.",
            self.key
        ));
        lines.join("\n")
    }
}

/// First `max_chars` characters on a single line, with `...` when cut.
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    let flattened: String = text
        .chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if text.chars().nth(max_chars).is_some() {
        format!("{flattened}...")
    } else {
        flattened
    }
}

/// Whether `text` contains a stub or chunk-chain marker.
#[must_use]
pub fn contains_marker(text: &str) -> bool {
    text.contains(NEXT_CHUNK_MARKER)
        || StubKind::ALL
            .iter()
            .any(|kind| text.contains(&kind.marker()))
}

/// Every key referenced by a `Key:` line in `text`.
///
/// Works on raw stub text and on JSON where stubs appear as escaped strings.
#[must_use]
pub fn extract_keys(text: &str) -> Vec<String> {
    KEY_LINE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// The chunk-chain marker appended to a segment whose successor is `key`.
#[must_use]
pub fn next_chunk_marker(key: &str) -> String {
    format!("\n{NEXT_CHUNK_MARKER}{key}]")
}

/// Split a stored chunk into its content and the successor key, if any.
#[must_use]
pub fn split_next_chunk(segment: &str) -> (&str, Option<&str>) {
    let Some(start) = segment.rfind(&format!("\n{NEXT_CHUNK_MARKER}")) else {
        return (segment, None);
    };
    let marker = &segment[start + 1..];
    match marker
        .strip_prefix(NEXT_CHUNK_MARKER)
        .and_then(|rest| rest.strip_suffix(']'))
    {
        Some(key) if !key.is_empty() => (&segment[..start], Some(key)),
        _ => (segment, None),
    }
}
