//! `download` stage: bulk download of open-access articles from PubMed Central.
//!
//! Ported from the source `_download.py`'s `_Downloader` hierarchy. A query
//! string or an explicit PMCID list is turned into a WebEnv/query-key pair on
//! the Entrez history server, then paged through with `efetch`. The output
//! directory name is a checksum of the input, so re-running with the same
//! input resumes the same download.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::entrez::{prepare_webenv, EntrezClient, SearchInput, SearchResult};
use crate::error::{Result, StopPipeline};
use crate::pipeline::{ExitCode, Step};
use crate::util::{self, StepInfo};

/// Download articles matching `input` into `<data_dir>/<output_dir_name>/articlesets/`.
///
/// Returns the `articlesets` directory and the resulting [`ExitCode`]:
/// `Completed` if every matching article was downloaded, `Incomplete` if
/// `n_docs` capped the download short of the full result set or any batch
/// failed to download (a resumable re-run can fill in what's missing).
pub async fn download(
    config: &Config,
    input: &SearchInput,
    n_docs: Option<u64>,
) -> Result<(PathBuf, ExitCode)> {
    let output_dir_name = output_dir_name(input);
    let output_dir = config.articlesets_dir(&output_dir_name);

    let status = util::check_steps_status(None, &output_dir)?;
    if !status.need_run {
        return Ok((output_dir, ExitCode::Completed));
    }

    std::fs::create_dir_all(&output_dir)?;
    let retmax = u64::from(config.entrez.retmax);

    let mut info = match StepInfo::read(&output_dir)? {
        Some(info) if info.extra.contains_key("search_result") => info,
        _ => {
            let client = EntrezClient::new(config.entrez.clone())?;
            let (search_result, extra) = prepare_webenv(&client, input).await?;
            save_input(input, &output_dir)?;

            let mut info = StepInfo {
                name: "download".to_string(),
                is_complete: false,
                date: None,
                extra: Map::new(),
            };
            info.extra
                .insert("retmax".to_string(), Value::from(retmax));
            info.extra.insert(
                "search_result".to_string(),
                serde_json::to_value(&search_result)?,
            );
            for (key, value) in extra {
                info.extra.insert(key, Value::from(value));
            }
            info.write(&output_dir)?;
            info
        }
    };

    let search_result: SearchResult =
        serde_json::from_value(info.extra["search_result"].clone())?;
    tracing::info!(dir = %output_dir.display(), "downloading articlesets");

    let client = EntrezClient::new(config.entrez.clone())?;
    let n_failures = client
        .efetch(&output_dir, &search_result, n_docs, retmax)
        .await?;

    let exit_code = if n_failures != 0 {
        ExitCode::Incomplete
    } else if n_docs.is_some_and(|n| n < search_result.count) {
        ExitCode::Incomplete
    } else {
        info.is_complete = true;
        ExitCode::Completed
    };

    if exit_code == ExitCode::Completed {
        tracing::info!("all articles matching the query have been downloaded");
    } else {
        tracing::warn!("download is incomplete: not all matching articles were downloaded");
    }
    info.write(&output_dir)?;

    Ok((output_dir, exit_code))
}

fn output_dir_name(input: &SearchInput) -> String {
    match input {
        SearchInput::Query(query) => format!("query_{}", util::checksum(query)),
        SearchInput::Pmcids(pmcids) => {
            let joined = pmcids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!("pmcidList_{}", util::checksum(&joined))
        }
    }
}

fn save_input(input: &SearchInput, output_dir: &Path) -> Result<()> {
    match input {
        SearchInput::Query(query) => {
            std::fs::write(output_dir.join("query.txt"), query)?;
        }
        SearchInput::Pmcids(pmcids) => {
            let text = pmcids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            std::fs::write(output_dir.join("requested_pmcids.txt"), text)?;
        }
    }
    Ok(())
}

/// Pipeline-driver adapter around [`download`].
pub struct DownloadStep {
    input: SearchInput,
    n_docs: Option<u64>,
}

impl DownloadStep {
    /// Build a download step for the given search input.
    pub fn new(input: SearchInput, n_docs: Option<u64>) -> Self {
        Self { input, n_docs }
    }
}

#[async_trait]
impl Step for DownloadStep {
    fn name(&self) -> &str {
        "download"
    }

    async fn run(
        &self,
        config: &Config,
        _previous_steps_output: &HashMap<String, PathBuf>,
    ) -> std::result::Result<(Option<PathBuf>, ExitCode), StopPipeline> {
        match download(config, &self.input, self.n_docs).await {
            Ok((dir, code)) => Ok((Some(dir), code)),
            Err(e) => Err(StopPipeline::new(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_name_for_query_is_checksum_prefixed() {
        let name = output_dir_name(&SearchInput::Query("cancer".to_string()));
        assert!(name.starts_with("query_"));
        assert_eq!(name, format!("query_{}", util::checksum("cancer")));
    }

    #[test]
    fn output_dir_name_for_pmcids_is_checksum_of_joined_list() {
        let name = output_dir_name(&SearchInput::Pmcids(vec![1, 2, 3]));
        assert!(name.starts_with("pmcidList_"));
        assert_eq!(name, format!("pmcidList_{}", util::checksum("1,2,3")));
    }

    #[test]
    fn output_dir_name_is_stable_across_calls() {
        let a = output_dir_name(&SearchInput::Pmcids(vec![42]));
        let b = output_dir_name(&SearchInput::Pmcids(vec![42]));
        assert_eq!(a, b, "same input must resume the same download directory");
    }

    #[test]
    fn save_input_writes_query_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_input(&SearchInput::Query("brain".to_string()), dir.path()).expect("save");
        let contents = std::fs::read_to_string(dir.path().join("query.txt")).expect("read");
        assert_eq!(contents, "brain");
    }

    #[test]
    fn save_input_writes_one_pmcid_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_input(&SearchInput::Pmcids(vec![10, 20, 30]), dir.path()).expect("save");
        let contents =
            std::fs::read_to_string(dir.path().join("requested_pmcids.txt")).expect("read");
        assert_eq!(contents, "10\n20\n30");
    }
}
