//! `extract_data` stage: run the fixed set of field extractors over every
//! article and write one CSV per extractor.
//!
//! Ported from `_data_extraction.py`. The per-article extractor list, the
//! coordinates-only filter, and the "no articles survived" abort are all
//! preserved; the source's OS-process pool is replaced with
//! `tokio::task::spawn_blocking` tasks bounded by a [`tokio::sync::Semaphore`],
//! matching the rest of this crate's concurrency style.

pub mod authors;
pub mod coordinate_space;
pub mod coordinates;
pub mod extractor;
pub mod links;
pub mod metadata;
pub mod text;
pub mod writer;
pub mod xmltree;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::articles;
use crate::config::Config;
use crate::error::{Error, Result, StopPipeline};
use crate::pipeline::{ExitCode, Step};
use crate::util::{self, StepInfo};

pub use authors::AuthorsExtractor;
pub use coordinate_space::CoordinateSpaceExtractor;
pub use coordinates::CoordinateExtractor;
pub use extractor::{Extractor, PriorOutputs, Record};
pub use links::LinkExtractor;
pub use metadata::MetadataExtractor;
pub use text::TextExtractor;
pub use writer::CsvWriter;
pub use xmltree::Element;

const CHUNK_SIZE: usize = 100;

fn extractors() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(MetadataExtractor),
        Box::new(AuthorsExtractor),
        Box::new(TextExtractor),
        Box::new(CoordinateExtractor),
        Box::new(CoordinateSpaceExtractor),
        Box::new(LinkExtractor),
    ]
}

/// Name of the output directory for this stage, reflecting whether it was
/// restricted to articles with at least one surviving coordinate.
pub fn output_dir_name(articles_with_coords_only: bool) -> &'static str {
    if articles_with_coords_only {
        "subset_articlesWithCoords_extractedData"
    } else {
        "subset_allArticles_extractedData"
    }
}

/// Run every extractor over every article under `articles_dir`, writing one
/// CSV per extractor into `output_dir`.
pub async fn extract_data(config: &Config, articles_dir: &Path, output_dir: &Path) -> Result<(PathBuf, ExitCode)> {
    let status = util::check_steps_status(Some(articles_dir), output_dir)?;
    if !status.need_run {
        return Ok((output_dir.to_path_buf(), ExitCode::Completed));
    }

    tracing::info!(from = %articles_dir.display(), to = %output_dir.display(), "extracting article data");
    fs::create_dir_all(output_dir)?;

    let extractors = Arc::new(extractors());
    let mut writers: Vec<CsvWriter> = extractors
        .iter()
        .map(|e| CsvWriter::from_extractor(e.as_ref(), output_dir))
        .collect::<Result<_>>()?;

    let article_dirs = articles::iter_article_dirs(articles_dir)?;
    let capacity = config.extraction_semaphore_capacity().max(1);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(capacity));

    type Outcome = (Option<HashMap<String, Record>>, tokio::sync::OwnedSemaphorePermit);

    let articles_with_coords_only = config.data_extraction.articles_with_coords_only;
    let mut n_processed = 0u64;
    let mut n_kept = 0u64;

    // A window of at most `capacity` in-flight tasks. The permit for a task
    // is only dropped once its result has been written, so the writer
    // genuinely throttles the producer instead of just the extraction work.
    let mut in_flight: std::collections::VecDeque<tokio::task::JoinHandle<Outcome>> =
        std::collections::VecDeque::with_capacity(capacity);

    let mut write_one = |outcome: Option<HashMap<String, Record>>,
                         writers: &mut [CsvWriter]|
     -> Result<()> {
        n_processed += 1;
        if let Some(data) = outcome {
            if should_write(&data, articles_with_coords_only) {
                for (extractor, writer) in extractors.iter().zip(writers.iter_mut()) {
                    if let Some(record) = data.get(extractor.name()) {
                        writer.write(record)?;
                    }
                }
                n_kept += 1;
            }
        }
        if n_processed % CHUNK_SIZE as u64 == 0 {
            tracing::info!(n_processed, n_kept, "extraction progress");
        }
        Ok(())
    };

    for article_dir in article_dirs {
        if in_flight.len() >= capacity {
            let handle = in_flight.pop_front().expect("checked len() >= capacity > 0");
            let (outcome, permit) = handle.await.map_err(|e| Error::Other(e.to_string()))?;
            write_one(outcome, &mut writers)?;
            drop(permit);
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(e.to_string()))?;
        let extractors = extractors.clone();
        in_flight.push_back(tokio::task::spawn_blocking(move || {
            let outcome =
                extract_one(&article_dir).map(|doc| run_extractors(&doc, &article_dir, &extractors));
            (outcome, permit)
        }));
    }

    while let Some(handle) = in_flight.pop_front() {
        let (outcome, permit) = handle.await.map_err(|e| Error::Other(e.to_string()))?;
        write_one(outcome, &mut writers)?;
        drop(permit);
    }

    for writer in &mut writers {
        writer.flush()?;
    }

    tracing::info!(n_processed, n_kept, "done extracting article data");

    let is_complete = status.previous_step_complete.unwrap_or(false);
    let mut info = StepInfo {
        name: "extract_data".to_string(),
        is_complete,
        date: None,
        extra: serde_json::Map::new(),
    };
    info.extra
        .insert("n_kept_articles".to_string(), serde_json::Value::from(n_kept));
    info.write(output_dir)?;

    let exit_code = if is_complete {
        ExitCode::Completed
    } else {
        ExitCode::Incomplete
    };
    Ok((output_dir.to_path_buf(), exit_code))
}

fn extract_one(article_dir: &Path) -> Option<Element> {
    let bytes = match fs::read(article_dir.join("article.xml")) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(article = %article_dir.display(), error = %e, "failed to read article");
            return None;
        }
    };
    match xmltree::parse_document(&bytes) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(article = %article_dir.display(), error = %e, "failed to parse article");
            None
        }
    }
}

/// Run every extractor over a parsed article, threading each extractor's
/// output into `prior` for the extractors that run after it.
fn run_extractors(
    article: &Element,
    article_dir: &Path,
    extractors: &[Box<dyn Extractor>],
) -> HashMap<String, Record> {
    let mut prior = PriorOutputs::new();
    for extractor in extractors {
        let record = extractor.extract(article, article_dir, &prior);
        prior.insert(extractor.name().to_string(), record);
    }
    prior.into_iter().collect()
}

/// Gatekeeper for `articles_with_coords_only`: keep an article only if its
/// `coordinates` extractor output is a non-empty row set.
fn should_write(data: &HashMap<String, Record>, articles_with_coords_only: bool) -> bool {
    if !articles_with_coords_only {
        return true;
    }
    matches!(data.get("coordinates"), Some(record) if !record.is_empty())
}

/// Pipeline-driver adapter around [`extract_data`].
pub struct DataExtractionStep;

#[async_trait]
impl Step for DataExtractionStep {
    fn name(&self) -> &str {
        "extract_data"
    }

    async fn run(
        &self,
        config: &Config,
        previous_steps_output: &HashMap<String, PathBuf>,
    ) -> std::result::Result<(Option<PathBuf>, ExitCode), StopPipeline> {
        let articles_dir = previous_steps_output
            .get("extract_articles")
            .ok_or_else(|| StopPipeline::new("no article output available"))?;
        let output_dir = articles_dir
            .parent()
            .unwrap_or(articles_dir)
            .join(output_dir_name(config.data_extraction.articles_with_coords_only));

        let (dir, code) = extract_data(config, articles_dir, &output_dir)
            .await
            .map_err(|e| StopPipeline::new(e.to_string()))?;

        let n_kept = StepInfo::read(&dir)
            .map_err(|e| StopPipeline::new(e.to_string()))?
            .and_then(|info| info.extra.get("n_kept_articles").and_then(|v| v.as_u64()))
            .unwrap_or(0);
        if n_kept == 0 {
            return Err(StopPipeline::new(
                "No articles matching the query and selection criteria could be extracted.",
            ));
        }
        Ok((Some(dir), code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn should_write_allows_everything_when_not_restricted() {
        let data: HashMap<String, Record> = HashMap::new();
        assert!(should_write(&data, false));
    }

    #[test]
    fn should_write_requires_nonempty_coordinates_when_restricted() {
        let mut data: HashMap<String, Record> = HashMap::new();
        data.insert("coordinates".to_string(), Record::empty_row_set());
        assert!(!should_write(&data, true));

        let mut row = BTreeMap::new();
        row.insert("x".to_string(), "1".to_string());
        data.insert("coordinates".to_string(), Record::RowSet(vec![row]));
        assert!(should_write(&data, true));
    }

    #[tokio::test]
    async fn extract_data_writes_one_csv_per_extractor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let articles_dir = dir.path().join("articles");
        let bucket_dir = articles_dir.join("abc").join("pmcid_42");
        fs::create_dir_all(&bucket_dir).expect("mkdir");
        fs::write(
            bucket_dir.join("article.xml"),
            r#"<article><front><article-meta>
                <article-id pub-id-type="pmc">42</article-id>
                <title-group><article-title>Hi</article-title></title-group>
            </article-meta></front><body/></article>"#,
        )
        .expect("write article");

        let output_dir = dir.path().join("extracted");
        let config = Config::default();
        let (result_dir, code) = extract_data(&config, &articles_dir, &output_dir)
            .await
            .expect("extract");
        assert_eq!(code, ExitCode::Completed);
        assert!(result_dir.join("metadata.csv").is_file());
        assert!(result_dir.join("authors.csv").is_file());
        assert!(result_dir.join("text.csv").is_file());
        assert!(result_dir.join("coordinates.csv").is_file());
        assert!(result_dir.join("coordinate_space.csv").is_file());
        assert!(result_dir.join("links.csv").is_file());

        let metadata = fs::read_to_string(result_dir.join("metadata.csv")).expect("read");
        assert!(metadata.contains("Hi"));
    }
}
