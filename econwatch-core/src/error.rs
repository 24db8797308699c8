//! Structured error types for fetch, decode and persistence.
//!
//! None of these escape a fetcher's public methods: they are logged, turned
//! into [`SourceError`] entries and replaced by fallback data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a payload could not be turned into a table.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing column matching {0}")]
    MissingColumn(String),

    #[error("no parsable period labels in column '{0}'")]
    UnparsablePeriods(String),

    #[error("no rows left after filtering")]
    EmptyAfterFilter,

    #[error("dimension '{dimension}' has no categories")]
    EmptyDimension { dimension: String },

    #[error("value count {actual} does not match dimension product {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Failure of a single live fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("no plausible reading found in {0}")]
    ExtractionAmbiguous(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl FetchError {
    pub fn is_not_acceptable(&self) -> bool {
        matches!(self, FetchError::HttpStatus { status: 406, .. })
    }
}

/// A `(source_label, message)` pair surfaced to the caller for non-fatal reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source: impl Into<String>, message: impl ToString) -> Self {
        Self {
            source: source.into(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}
