//! Optional vocabulary-extraction and vectorization stages.
//!
//! Grounded in `_vocabulary.py` and `_vectorization.py`. Both stages are
//! opt-in downstream of data extraction: vocabulary extraction fits a
//! vocabulary from the corpus itself, vectorization turns the corpus into
//! term-frequency / TF-IDF matrices against a configured vocabulary (there
//! is no bundled default vocabulary to fall back to, unlike the source
//! pipeline's network-fetched neuroquery model, so vectorization no-ops
//! when no vocabulary file is configured, mirroring the source CLI's
//! flag-gated skip).

pub mod npz;
pub mod sparse;
pub mod tokenizer;
pub mod vectorization;
pub mod vocabulary;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result, StopPipeline};
use crate::pipeline::{ExitCode, Step};
use crate::util::{self, StepInfo};
use crate::vectorize::vectorization::{TEXT_FIELDS, VocabularyMapping};

/// Write `(term, document_frequency)` pairs as a headerless two-column CSV.
fn write_term_df_csv(path: &Path, terms: &[(String, f64)]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for (term, df) in terms {
        writer.write_record([term.as_str(), &df.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Output directory name for vocabulary extraction: the input directory
/// name with its `_extractedData` suffix swapped for `_extractedVocabulary`.
fn vocabulary_output_dir_name(extracted_data_dir: &Path) -> String {
    let name = extracted_data_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("extractedData");
    match name.strip_suffix("_extractedData") {
        Some(prefix) => format!("{prefix}_extractedVocabulary"),
        None => format!("{name}_extractedVocabulary"),
    }
}

/// Fit a vocabulary from `{extracted_data_dir}/text.csv` and write it to
/// `{output_dir}/vocabulary.csv` (`term,document_frequency` per line, no
/// header, matching `_vocabulary.py`'s plain `pandas.Series.to_csv`).
pub async fn extract_vocabulary_to_csv(
    config: &Config,
    extracted_data_dir: &Path,
    output_dir: &Path,
) -> Result<(PathBuf, ExitCode)> {
    let status = util::check_steps_status(Some(extracted_data_dir), output_dir)?;
    if !status.need_run {
        return Ok((output_dir.to_path_buf(), ExitCode::Completed));
    }

    tracing::info!(from = %extracted_data_dir.display(), to = %output_dir.display(), "extracting vocabulary");
    fs::create_dir_all(output_dir)?;

    let extracted_data_dir = extracted_data_dir.to_path_buf();
    let min_doc_frequency = config.vectorize.min_doc_frequency;
    let max_ngram = config.vectorize.max_ngram;
    let terms = tokio::task::spawn_blocking(move || {
        vocabulary::extract_vocabulary(&extracted_data_dir, min_doc_frequency, max_ngram)
    })
    .await
    .map_err(|e| Error::Other(e.to_string()))??;

    let voc_file = output_dir.join("vocabulary.csv");
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&voc_file)?;
    for (term, doc_frequency) in &terms {
        writer.write_record([term.as_str(), &doc_frequency.to_string()])?;
    }
    writer.flush()?;

    tracing::info!(n_terms = terms.len(), "done extracting vocabulary");

    let is_complete = status.previous_step_complete.unwrap_or(false);
    let mut info = StepInfo {
        name: "extract_vocabulary".to_string(),
        is_complete,
        date: None,
        extra: serde_json::Map::new(),
    };
    info.extra
        .insert("n_terms".to_string(), serde_json::Value::from(terms.len() as u64));
    info.write(output_dir)?;

    let exit_code = if is_complete { ExitCode::Completed } else { ExitCode::Incomplete };
    Ok((output_dir.to_path_buf(), exit_code))
}

/// Output directory name for vectorization: the input directory name with
/// its `_extractedData` suffix swapped for
/// `-voc_<checksum>_vectorizedText`, where `<checksum>` identifies the
/// vocabulary (and mapping, if any) used.
fn vectorization_output_dir_name(extracted_data_dir: &Path, checksum: &str) -> String {
    let name = extracted_data_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("extractedData");
    let prefix = name.strip_suffix("_extractedData").unwrap_or(name);
    format!("{prefix}-voc_{checksum}_vectorizedText")
}

/// Vectorize `{extracted_data_dir}/text.csv` against `vocabulary_file` (and
/// optional `mapping_file`), writing `pmcid.txt`, `vocabulary.csv`,
/// `feature_names.csv`, and per-field `{field}_counts.npz`/`{field}_tfidf.npz`
/// into `output_dir`.
pub async fn vectorize_corpus_to_npz(
    extracted_data_dir: &Path,
    vocabulary_file: &Path,
    mapping_file: Option<&Path>,
    output_dir: &Path,
) -> Result<(PathBuf, ExitCode)> {
    let status = util::check_steps_status(Some(extracted_data_dir), output_dir)?;
    if !status.need_run {
        return Ok((output_dir.to_path_buf(), ExitCode::Completed));
    }

    tracing::info!(from = %extracted_data_dir.display(), to = %output_dir.display(), "vectorizing corpus");
    fs::create_dir_all(output_dir)?;

    let extracted_data_dir = extracted_data_dir.to_path_buf();
    let vocabulary_file = vocabulary_file.to_path_buf();
    let mapping_file = mapping_file.map(Path::to_path_buf);
    let result = tokio::task::spawn_blocking(move || -> Result<_> {
        let vocabulary = vocabulary::read_vocabulary_terms(&vocabulary_file)?;
        let mapping = match &mapping_file {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            None => VocabularyMapping::default(),
        };
        vectorization::vectorize_corpus(&extracted_data_dir, &vocabulary, &mapping)
    })
    .await
    .map_err(|e| Error::Other(e.to_string()))??;

    let pmcid_text = result
        .pmcids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(output_dir.join("pmcid.txt"), pmcid_text)?;

    write_term_df_csv(&output_dir.join("vocabulary.csv"), &result.full_vocabulary)?;
    write_term_df_csv(&output_dir.join("feature_names.csv"), &result.reduced_vocabulary)?;

    let mapping_json = match mapping_file {
        Some(path) => fs::read_to_string(path)?,
        None => serde_json::to_string(&VocabularyMapping::default())?,
    };
    fs::write(output_dir.join("vocabulary.csv_voc_mapping_identity.json"), mapping_json)?;

    for &field in TEXT_FIELDS.iter().chain(std::iter::once(&"merged")) {
        npz::save(&result.counts[field], &output_dir.join(format!("{field}_counts.npz")))?;
        npz::save(&result.tfidf[field], &output_dir.join(format!("{field}_tfidf.npz")))?;
    }

    tracing::info!(n_articles = result.pmcids.len(), "done vectorizing corpus");

    let is_complete = status.previous_step_complete.unwrap_or(false);
    let mut info = StepInfo {
        name: "vectorize_corpus".to_string(),
        is_complete,
        date: None,
        extra: serde_json::Map::new(),
    };
    info.extra.insert(
        "n_articles".to_string(),
        serde_json::Value::from(result.pmcids.len() as u64),
    );
    info.write(output_dir)?;

    let exit_code = if is_complete { ExitCode::Completed } else { ExitCode::Incomplete };
    Ok((output_dir.to_path_buf(), exit_code))
}

/// Checksum identifying a vocabulary file and optional mapping file, used to
/// namespace vectorization output by the inputs that produced it.
fn checksum_vocabulary(vocabulary_file: &Path, mapping_file: Option<&Path>) -> Result<String> {
    let mut bytes = fs::read(vocabulary_file)?;
    if let Some(path) = mapping_file {
        bytes.extend(fs::read(path)?);
    }
    Ok(util::checksum(&String::from_utf8_lossy(&bytes)))
}

/// Pipeline-driver adapter around [`extract_vocabulary_to_csv`].
pub struct VocabularyExtractionStep;

#[async_trait]
impl Step for VocabularyExtractionStep {
    fn name(&self) -> &str {
        "extract_vocabulary"
    }

    async fn run(
        &self,
        config: &Config,
        previous_steps_output: &HashMap<String, PathBuf>,
    ) -> std::result::Result<(Option<PathBuf>, ExitCode), StopPipeline> {
        let extracted_data_dir = previous_steps_output
            .get("extract_data")
            .ok_or_else(|| StopPipeline::new("no extracted data available"))?;
        let output_dir = extracted_data_dir
            .parent()
            .unwrap_or(extracted_data_dir)
            .join(vocabulary_output_dir_name(extracted_data_dir));

        let (dir, code) = extract_vocabulary_to_csv(config, extracted_data_dir, &output_dir)
            .await
            .map_err(|e| StopPipeline::new(e.to_string()))?;
        Ok((Some(dir), code))
    }
}

/// Pipeline-driver adapter around [`vectorize_corpus_to_npz`].
///
/// No-ops (reporting `Completed` with no output) when no vocabulary file is
/// configured, since this crate carries no default vocabulary to fetch.
pub struct VectorizationStep;

#[async_trait]
impl Step for VectorizationStep {
    fn name(&self) -> &str {
        "vectorize_corpus"
    }

    async fn run(
        &self,
        config: &Config,
        previous_steps_output: &HashMap<String, PathBuf>,
    ) -> std::result::Result<(Option<PathBuf>, ExitCode), StopPipeline> {
        let Some(vocabulary_file) = &config.vectorize.vocabulary_file else {
            tracing::info!("no vocabulary_file configured, skipping vectorization");
            return Ok((None, ExitCode::Completed));
        };
        let extracted_data_dir = previous_steps_output
            .get("extract_data")
            .ok_or_else(|| StopPipeline::new("no extracted data available"))?;
        let mapping_file = config.vectorize.vocabulary_mapping_file.as_deref();

        let checksum = checksum_vocabulary(vocabulary_file, mapping_file)
            .map_err(|e| StopPipeline::new(e.to_string()))?;
        let output_dir = extracted_data_dir
            .parent()
            .unwrap_or(extracted_data_dir)
            .join(vectorization_output_dir_name(extracted_data_dir, &checksum));

        let (dir, code) =
            vectorize_corpus_to_npz(extracted_data_dir, vocabulary_file, mapping_file, &output_dir)
                .await
                .map_err(|e| StopPipeline::new(e.to_string()))?;
        Ok((Some(dir), code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted_data_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("text.csv"),
            "id,title,keywords,abstract,body\n\
             pmcid_1,Cortex activation,,,The cortex was active.\n\
             pmcid_2,Amygdala study,,,The amygdala was quiet.\n",
        )
        .expect("write corpus");
        dir
    }

    #[test]
    fn vocabulary_output_dir_swaps_suffix() {
        let path = Path::new("/data/subset_allArticles_extractedData");
        assert_eq!(vocabulary_output_dir_name(path), "subset_allArticles_extractedVocabulary");
    }

    #[test]
    fn vectorization_output_dir_embeds_checksum() {
        let path = Path::new("/data/subset_allArticles_extractedData");
        assert_eq!(
            vectorization_output_dir_name(path, "abc123"),
            "subset_allArticles-voc_abc123_vectorizedText"
        );
    }

    #[tokio::test]
    async fn extract_vocabulary_to_csv_writes_vocabulary_file() {
        let data_dir = extracted_data_dir();
        let output_dir = data_dir.path().parent().unwrap().join("voc");
        let config = Config::default();
        let (dir, code) = extract_vocabulary_to_csv(&config, data_dir.path(), &output_dir)
            .await
            .expect("extract vocabulary");
        assert_eq!(code, ExitCode::Completed);
        let contents = fs::read_to_string(dir.join("vocabulary.csv")).expect("read");
        assert!(contents.contains("cortex"));
    }

    #[tokio::test]
    async fn vectorize_corpus_to_npz_writes_expected_files() {
        let data_dir = extracted_data_dir();
        let voc_file = data_dir.path().parent().unwrap().join("vocabulary.csv");
        fs::write(&voc_file, "cortex,0.5\namygdala,0.5\n").expect("write vocabulary");
        let output_dir = data_dir.path().parent().unwrap().join("vectorized");

        let (dir, code) = vectorize_corpus_to_npz(data_dir.path(), &voc_file, None, &output_dir)
            .await
            .expect("vectorize");
        assert_eq!(code, ExitCode::Completed);
        assert!(dir.join("pmcid.txt").is_file());
        assert!(dir.join("vocabulary.csv").is_file());
        assert!(dir.join("feature_names.csv").is_file());
        assert!(dir.join("title_counts.npz").is_file());
        assert!(dir.join("title_tfidf.npz").is_file());
        assert!(dir.join("merged_counts.npz").is_file());
        assert!(dir.join("merged_tfidf.npz").is_file());
        assert!(dir.join("vocabulary.csv_voc_mapping_identity.json").is_file());

        let pmcids = fs::read_to_string(dir.join("pmcid.txt")).expect("read");
        assert_eq!(pmcids, "1\n2");
    }

    #[tokio::test]
    async fn vectorization_step_skips_without_configured_vocabulary() {
        let config = Config::default();
        let previous = HashMap::new();
        let (output, code) = VectorizationStep
            .run(&config, &previous)
            .await
            .expect("run");
        assert!(output.is_none());
        assert_eq!(code, ExitCode::Completed);
    }
}
