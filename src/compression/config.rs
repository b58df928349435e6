//! Configuration for content compression.

use serde::{Deserialize, Serialize};

use super::estimator::TokenEstimator;

/// Configuration for content compression.
///
/// # Example
///
/// ```
/// use agent_compress::compression::CompressionConfig;
///
/// let config = CompressionConfig::default()
///     .with_threshold_tokens(2_000)
///     .with_preview_chars(120);
/// assert_eq!(config.byte_limit(), 8_000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Estimated-token size above which content is externalised.
    /// Default: 4,000
    pub threshold_tokens: usize,

    /// Arrays whose serialized size is within this multiple of the
    /// threshold are left unchunked.
    /// Default: 1.3
    pub array_tolerance: f64,

    /// A string holding embedded JSON is replaced by its compressed form
    /// only when that form is shorter than this fraction of the original.
    /// Default: 0.8
    pub embedded_json_ratio: f64,

    /// The JSON branch of the compressor is accepted only when its output
    /// is shorter than this fraction of the input; otherwise the content is
    /// chunked as plain text.
    /// Default: 0.6
    pub json_acceptance_ratio: f64,

    /// Number of characters shown in a stub's `Preview:` line.
    /// Default: 200
    pub preview_chars: usize,

    /// Name of the tool that expands a stub key, quoted in every stub.
    /// Default: `expandTokens`
    pub retrieval_tool: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_tokens: 4_000,
            array_tolerance: 1.3,
            embedded_json_ratio: 0.8,
            json_acceptance_ratio: 0.6,
            preview_chars: 200,
            retrieval_tool: String::from("expandTokens"),
        }
    }
}

impl CompressionConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum bytes kept inline by the string chunker, and the size of each
    /// stored chunk. Measured in bytes, like [`TokenEstimator::estimate_text`].
    #[must_use]
    pub const fn byte_limit(&self) -> usize {
        self.threshold_tokens * TokenEstimator::CHARS_PER_TOKEN
    }

    /// Set the compression threshold in estimated tokens.
    #[must_use]
    pub const fn with_threshold_tokens(mut self, threshold: usize) -> Self {
        self.threshold_tokens = threshold;
        self
    }

    /// Set the array chunking tolerance.
    #[must_use]
    pub const fn with_array_tolerance(mut self, tolerance: f64) -> Self {
        self.array_tolerance = tolerance;
        self
    }

    /// Set the embedded JSON acceptance ratio.
    #[must_use]
    pub const fn with_embedded_json_ratio(mut self, ratio: f64) -> Self {
        self.embedded_json_ratio = ratio;
        self
    }

    /// Set the JSON branch acceptance ratio.
    #[must_use]
    pub const fn with_json_acceptance_ratio(mut self, ratio: f64) -> Self {
        self.json_acceptance_ratio = ratio;
        self
    }

    /// Set the preview length.
    #[must_use]
    pub const fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// Set the retrieval tool name quoted in stubs.
    #[must_use]
    pub fn with_retrieval_tool(mut self, name: impl Into<String>) -> Self {
        self.retrieval_tool = name.into();
        self
    }

    /// Whether a size measured in estimated tokens is within `limit × ratio`.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn within_ratio(size: usize, limit: usize, ratio: f64) -> bool {
        size as f64 <= limit as f64 * ratio
    }

    /// Whether `size` is strictly smaller than `ratio` of `original`.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn shrunk_below(size: usize, original: usize, ratio: f64) -> bool {
        (size as f64) < original as f64 * ratio
    }
}
