//! `coordinate_space` extractor: heuristic MNI/Talairach classifier over full text.
//!
//! Grounded in `_coordinate_space.py` (adapted upstream from NeuroSynth's
//! ACE `extract.py`).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::extraction::extractor::{Extractor, PriorOutputs, Record};
use crate::extraction::xmltree::{self, Element};

const FIELDS: &[&str] = &["id", "coordinate_space"];
const TERMS: &[&str] = &["mni", "talairach", "spm", "fsl", "afni", "brainvoyager"];

/// Extracts `{id, coordinate_space}` with value `"MNI"`, `"TAL"` or `"UNKNOWN"`.
pub struct CoordinateSpaceExtractor;

impl Extractor for CoordinateSpaceExtractor {
    fn name(&self) -> &str {
        "coordinate_space"
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn extract(&self, article: &Element, _article_dir: &Path, _prior: &PriorOutputs) -> Record {
        let mut row = BTreeMap::new();
        let Some(pmcid) = xmltree::pmcid(article) else {
            return Record::Single(row);
        };
        row.insert("id".to_string(), format!("pmcid_{pmcid}"));
        row.insert(
            "coordinate_space".to_string(),
            guess_space(&article.text_content()),
        );
        Record::Single(row)
    }
}

fn term_regexes() -> &'static [(&'static str, Regex)] {
    static CACHE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    CACHE.get_or_init(|| {
        TERMS
            .iter()
            .map(|term| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
                (*term, Regex::new(&pattern).expect("valid coordinate-space pattern"))
            })
            .collect()
    })
}

fn guess_space(text: &str) -> String {
    let lower = text.to_lowercase();
    let found = |term: &str| {
        term_regexes()
            .iter()
            .find(|(t, _)| *t == term)
            .is_some_and(|(_, re)| re.is_match(&lower))
    };

    let mni = found("mni");
    let talairach = found("talairach");
    let mni_software = found("spm") || found("fsl");
    let tal_software = found("afni") || found("brainvoyager");
    let any_software = mni_software || tal_software;

    if mni_software && !tal_software {
        return "MNI".to_string();
    }
    if mni && !talairach && !any_software {
        return "MNI".to_string();
    }
    if tal_software && !mni_software {
        return "TAL".to_string();
    }
    if talairach && !mni && !any_software {
        return "TAL".to_string();
    }
    "UNKNOWN".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mni_software_implies_mni() {
        assert_eq!(
            guess_space("analyses were performed in SPM8 using the MNI template"),
            "MNI"
        );
    }

    #[test]
    fn talairach_software_implies_tal() {
        assert_eq!(
            guess_space("coordinates in Talairach space via AFNI"),
            "TAL"
        );
    }

    #[test]
    fn no_software_or_specific_term_is_unknown() {
        assert_eq!(guess_space("standard stereotactic space"), "UNKNOWN");
    }

    #[test]
    fn bare_mni_mention_without_conflict_is_mni() {
        assert_eq!(guess_space("coordinates reported in MNI space"), "MNI");
    }

    #[test]
    fn conflicting_mentions_are_unknown() {
        assert_eq!(guess_space("converted from Talairach to MNI space"), "UNKNOWN");
    }
}
