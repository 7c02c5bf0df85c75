//! # pmc-corpus-pipeline
//!
//! Resumable batch pipeline that downloads, extracts and vectorizes
//! PubMed Central full-text articles.
//!
//! ## Design Philosophy
//!
//! - **Resumable** - every stage writes a completion marker so a crashed or
//!   interrupted run picks up where it left off
//! - **Filesystem-first** - stages communicate only through files on disk,
//!   never through in-process shared state
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding in a
//!   driver binary
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmc_corpus_pipeline::{Config, pipeline::{Pipeline, ExitCode}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pipeline = Pipeline::new(config);
//!     let exit_code = pipeline.run().await?;
//!     std::process::exit(exit_code as i32);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Article-set splitting and table extraction
pub mod articles;
/// Configuration types
pub mod config;
/// Resumable bulk download from the eutils history server
pub mod download;
/// Entrez-like eutils client (search / post / fetch)
pub mod entrez;
/// Error types
pub mod error;
/// Streaming data extraction (metadata, authors, text, coordinates, links)
pub mod extraction;
/// Pipeline driver: ordered steps, exit-code aggregation, early abort
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Shared checksum/bucket/info.json helpers used by every stage
pub mod util;
/// Vocabulary extraction and TF-IDF vectorization
pub mod vectorize;

pub use config::Config;
pub use error::{EntrezError, Error, Result, StopPipeline};
pub use pipeline::{ExitCode, Pipeline, Step};
