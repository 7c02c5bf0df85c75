//! Configuration types for the corpus pipeline.
//!
//! Small sub-configs per concern, each field `#[serde(default = ...)]`,
//! composed into a top-level [`Config`] via `#[serde(flatten)]`, plus
//! convenience accessors.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy shared by every outbound eutils request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up (must stay at or above 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (must stay at or above 2s).
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add random jitter to the computed delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Configuration for the Entrez-like eutils client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntrezConfig {
    /// NCBI API key. If set, the rate-limit period drops from 1.05s to 0.15s.
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,

    /// Base URL for the eutils endpoints.
    #[serde(default = "default_eutils_base_url")]
    pub base_url: String,

    /// Minimum time between consecutive requests, without an API key.
    #[serde(default = "default_rate_limit_no_key", with = "duration_serde")]
    pub rate_limit_no_key: Duration,

    /// Minimum time between consecutive requests, with an API key.
    #[serde(default = "default_rate_limit_with_key", with = "duration_serde")]
    pub rate_limit_with_key: Duration,

    /// Per-request HTTP timeout (must stay at or above 10s).
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub http_timeout: Duration,

    /// Maximum number of PMIDs requested per `esearch`/`efetch` page.
    #[serde(default = "default_retmax")]
    pub retmax: u32,

    /// Retry policy applied to every eutils call.
    #[serde(flatten)]
    pub retry: RetryConfig,
}

impl EntrezConfig {
    /// Minimum inter-request delay in effect for the configured API key.
    pub fn rate_limit_period(&self) -> Duration {
        if self.api_key.is_some() {
            self.rate_limit_with_key
        } else {
            self.rate_limit_no_key
        }
    }
}

impl Default for EntrezConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            base_url: default_eutils_base_url(),
            rate_limit_no_key: default_rate_limit_no_key(),
            rate_limit_with_key: default_rate_limit_with_key(),
            http_timeout: default_http_timeout(),
            retmax: default_retmax(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for the streaming data-extraction stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataExtractionConfig {
    /// Number of articles handed to a worker task at once.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Only emit coordinate/coordinate-space rows for articles that have coordinates.
    #[serde(default)]
    pub articles_with_coords_only: bool,
}

impl Default for DataExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            articles_with_coords_only: false,
        }
    }
}

/// Configuration for the optional vocabulary-extraction / vectorization stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorizeConfig {
    /// Minimum document frequency a vocabulary term must reach to be kept.
    #[serde(default = "default_min_doc_frequency")]
    pub min_doc_frequency: f64,

    /// Largest n-gram size considered when building the vocabulary (1-2).
    #[serde(default = "default_max_ngram")]
    pub max_ngram: usize,

    /// Vocabulary file to vectorize against. Vectorization is skipped (and
    /// reported as complete) when unset, since there is no default vocabulary
    /// bundled with this crate.
    #[serde(default)]
    pub vocabulary_file: Option<PathBuf>,

    /// Optional source-term -> target-term collapse mapping applied on top
    /// of `vocabulary_file` before computing term frequencies.
    #[serde(default)]
    pub vocabulary_mapping_file: Option<PathBuf>,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self {
            min_doc_frequency: default_min_doc_frequency(),
            max_ngram: default_max_ngram(),
            vocabulary_file: None,
            vocabulary_mapping_file: None,
        }
    }
}

/// Top-level pipeline configuration.
///
/// Sub-configs are flattened so the on-disk JSON/TOML stays a single flat
/// object; fields are also reachable through convenience accessors below.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory the pipeline reads and writes all stage output under.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory log files are written to.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Number of worker tasks used by parallel stages (article split, extraction).
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,

    /// Entrez client configuration.
    #[serde(flatten)]
    pub entrez: EntrezConfig,

    /// Data-extraction stage configuration.
    #[serde(flatten)]
    pub data_extraction: DataExtractionConfig,

    /// Vectorization stage configuration.
    #[serde(flatten)]
    pub vectorize: VectorizeConfig,
}

impl Config {
    /// Directory articlesets are downloaded into: `<data_dir>/<output_dir_name>/articlesets/`.
    pub fn articlesets_dir(&self, output_dir_name: &str) -> PathBuf {
        self.data_dir.join(output_dir_name).join("articlesets")
    }

    /// Directory bucketed per-article data lives under: `<data_dir>/<output_dir_name>/articles/`.
    pub fn articles_dir(&self, output_dir_name: &str) -> PathBuf {
        self.data_dir.join(output_dir_name).join("articles")
    }

    /// Number of worker tasks for parallel stages, never less than 1.
    pub fn n_jobs(&self) -> usize {
        self.n_jobs.max(1)
    }

    /// Backpressure semaphore capacity for the data-extraction stage.
    pub fn extraction_semaphore_capacity(&self) -> usize {
        self.data_extraction.chunk_size * self.n_jobs()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            n_jobs: default_n_jobs(),
            entrez: EntrezConfig::default(),
            data_extraction: DataExtractionConfig::default(),
            vectorize: VectorizeConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_n_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_api_key() -> Option<String> {
    std::env::var("NCBI_API_KEY").ok()
}

fn default_eutils_base_url() -> String {
    "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string()
}

fn default_rate_limit_no_key() -> Duration {
    Duration::from_millis(1050)
}

fn default_rate_limit_with_key() -> Duration {
    Duration::from_millis(150)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retmax() -> u32 {
    200
}

fn default_chunk_size() -> usize {
    100
}

fn default_min_doc_frequency() -> f64 {
    0.001
}

fn default_max_ngram() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds as f64, sub-second rate limits need the precision)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
