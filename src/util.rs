//! Shared helpers used across pipeline stages: checksums, bucket sharding,
//! and the `info.json` completion-marker protocol that makes every stage
//! resumable.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// MD5 checksum of a UTF-8 string, hex-encoded.
pub fn checksum(value: &str) -> String {
    format!("{:x}", md5::compute(value.as_bytes()))
}

/// Bucket name (first 3 hex chars of `md5(str(pmcid))`) an article is sharded under.
pub fn article_bucket_from_pmcid(pmcid: u64) -> String {
    checksum(&pmcid.to_string())[..3].to_string()
}

/// Completion marker written by every stage to its output directory.
///
/// Mirrors the source pipeline's `info.json`: always carries `name` and
/// `is_complete`, plus whatever stage-specific fields the caller merges in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    /// Name of the stage that produced this directory.
    pub name: String,
    /// Whether the stage ran to completion.
    pub is_complete: bool,
    /// ISO-8601 timestamp of when this file was last written.
    #[serde(default)]
    pub date: Option<String>,
    /// Stage-specific fields (e.g. `retmax`, `search_result`, `n_articles`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepInfo {
    /// Read `info.json` from a stage's output directory, if present.
    pub fn read(output_dir: &Path) -> Result<Option<StepInfo>> {
        let info_file = output_dir.join("info.json");
        if !info_file.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&info_file)?;
        let info: StepInfo = serde_json::from_str(&text)?;
        Ok(Some(info))
    }

    /// Write this info to `<output_dir>/info.json`, stamping the current date.
    pub fn write(&mut self, output_dir: &Path) -> Result<()> {
        self.date = Some(chrono::Local::now().to_rfc3339());
        let info_file = output_dir.join("info.json");
        let text = serde_json::to_string(self)?;
        fs::write(info_file, text)?;
        Ok(())
    }
}

/// Status of a stage relative to the stage that feeds it.
pub struct StepsStatus {
    /// Whether the previous stage's output was marked complete.
    pub previous_step_complete: Option<bool>,
    /// Whether the current stage's output is already marked complete.
    pub current_step_complete: bool,
    /// Whether the current stage needs to (re)run.
    pub need_run: bool,
}

/// Check whether the previous and current processing steps are complete.
///
/// `previous_step_dir` is `None` when the current stage is the first in the
/// pipeline (nothing to check upstream of it).
pub fn check_steps_status(
    previous_step_dir: Option<&Path>,
    current_step_dir: &Path,
) -> Result<StepsStatus> {
    let previous_step_complete = match previous_step_dir {
        Some(dir) => {
            if !dir.exists() {
                return Err(Error::NotFound(dir.display().to_string()));
            }
            Some(
                StepInfo::read(dir)?
                    .map(|info| info.is_complete)
                    .unwrap_or(false),
            )
        }
        None => None,
    };
    let current_step_complete = StepInfo::read(current_step_dir)?
        .map(|info| info.is_complete)
        .unwrap_or(false);
    if current_step_complete {
        return Ok(StepsStatus {
            previous_step_complete,
            current_step_complete,
            need_run: false,
        });
    }
    if let Some(false) = previous_step_complete {
        tracing::warn!(
            dir = %current_step_dir.display(),
            "previous processing step was not completed: not all upstream \
             articles will be processed"
        );
    }
    Ok(StepsStatus {
        previous_step_complete,
        current_step_complete,
        need_run: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn checksum_is_deterministic_and_hex() {
        let a = checksum("hello");
        let b = checksum("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn article_bucket_is_first_three_checksum_chars() {
        let bucket = article_bucket_from_pmcid(1234567);
        let full = checksum("1234567");
        assert_eq!(bucket, full[..3]);
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn step_info_round_trips_with_extra_fields() {
        let dir = tempdir().expect("tempdir");
        let mut info = StepInfo {
            name: "download".to_string(),
            is_complete: true,
            date: None,
            extra: {
                let mut m = Map::new();
                m.insert("retmax".to_string(), Value::from(500));
                m
            },
        };
        info.write(dir.path()).expect("write");

        let restored = StepInfo::read(dir.path())
            .expect("read")
            .expect("some info");
        assert_eq!(restored.name, "download");
        assert!(restored.is_complete);
        assert_eq!(restored.extra.get("retmax"), Some(&Value::from(500)));
    }

    #[test]
    fn missing_info_file_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        assert!(StepInfo::read(dir.path()).expect("read").is_none());
    }

    #[test]
    fn check_steps_status_needs_run_when_current_absent() {
        let dir = tempdir().expect("tempdir");
        let status = check_steps_status(None, dir.path()).expect("status");
        assert!(status.need_run);
        assert!(!status.current_step_complete);
        assert!(status.previous_step_complete.is_none());
    }

    #[test]
    fn check_steps_status_skips_when_current_already_complete() {
        let dir = tempdir().expect("tempdir");
        let mut info = StepInfo {
            name: "extract".to_string(),
            is_complete: true,
            date: None,
            extra: Map::new(),
        };
        info.write(dir.path()).expect("write");

        let status = check_steps_status(None, dir.path()).expect("status");
        assert!(!status.need_run);
    }

    #[test]
    fn check_steps_status_errors_when_previous_dir_missing() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("does-not-exist");
        let current = dir.path().join("current");
        fs::create_dir_all(&current).unwrap();
        let result = check_steps_status(Some(&missing), &current);
        assert!(result.is_err());
    }
}
