//! Error types for the corpus pipeline.
//!
//! This module provides the error handling used throughout the crate:
//! domain-specific error variants per stage, a shared [`Result`] alias, and
//! the [`crate::retry::IsRetryable`] classification consumed by the retry loop.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue.
        message: String,
        /// The configuration key that caused the error (e.g. "data_dir").
        key: Option<String>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/transport error talking to the eutils API.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reading or writing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// XML parsing error (articlesets, articles, table templates).
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Entrez-like client error (search/post/fetch).
    #[error("entrez error: {0}")]
    Entrez(#[from] EntrezError),

    /// A requested path does not exist or is not the expected kind.
    #[error("not found: {0}")]
    NotFound(String),

    /// An article or table could not be parsed; caller should skip it.
    #[error("parse failed for {path}: {reason}")]
    ParseFail {
        /// Path of the file that failed to parse.
        path: PathBuf,
        /// Reason given by the underlying parser.
        reason: String,
    },

    /// Other, uncategorized error.
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the Entrez-like HTTP client.
///
/// Kept separate from [`Error`] so [`crate::retry::IsRetryable`] can classify
/// transport failures independently of the rest of the pipeline's error space.
#[derive(Debug, Error)]
pub enum EntrezError {
    /// The request could not be sent or the connection failed outright.
    #[error("transport failure: {0}")]
    TransportFail(String),

    /// The response had an unexpected status code or malformed body.
    #[error("protocol failure: {0}")]
    ProtocolFail(String),

    /// `post()` was called with an empty id list.
    #[error("empty input: id list must not be empty")]
    EmptyInput,

    /// A search returned no usable result (no `esearchresult`, or count is zero).
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// All attempts for a request were exhausted.
    #[error("all {attempts} attempts failed; last error: {last_error}")]
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Display of the final attempt's error.
        last_error: String,
    },
}

/// Cooperative signal a pipeline step raises to abort the remaining steps.
///
/// Mirrors `StopPipeline` in the source pipeline: it carries a human-readable
/// reason and is handled by the driver, not propagated as a generic error.
#[derive(Debug, Error)]
#[error("pipeline stopped: {reason}")]
pub struct StopPipeline {
    /// Why the step decided the pipeline cannot continue meaningfully.
    pub reason: String,
}

impl StopPipeline {
    /// Construct a new stop signal with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
