//! `extract_vocabulary` stage: fit a vocabulary and document frequencies
//! from the concatenated text fields of a corpus.
//!
//! Grounded in `_vocabulary.py`. Its `CountVectorizer` (binary, 1-2 grams,
//! stop words, `min_df`) is replaced by [`crate::vectorize::tokenizer`]
//! plus a direct document-frequency count, for the reason this crate has no
//! scikit-learn-equivalent dependency to reach for.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::vectorize::tokenizer;

/// Fit a vocabulary over `{extracted_data_dir}/text.csv`, returning
/// `(term, document_frequency)` pairs sorted by term.
///
/// `min_doc_frequency` is the minimum fraction of documents a term must
/// appear in (after stop-word filtering) to be kept.
pub fn extract_vocabulary(
    extracted_data_dir: &Path,
    min_doc_frequency: f64,
    max_ngram: usize,
) -> Result<Vec<(String, f64)>> {
    let corpus_file = extracted_data_dir.join("text.csv");
    if !corpus_file.is_file() {
        return Err(Error::NotFound(corpus_file.display().to_string()));
    }

    let mut reader = csv::Reader::from_path(&corpus_file)?;
    let field_idx = text_field_indices(reader.headers()?);
    let mut doc_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut n_docs: u64 = 0;

    for record in reader.records() {
        let record = record?;
        let text = concatenated_text(&record, field_idx);
        n_docs += 1;
        let mut seen = std::collections::HashSet::new();
        for term in tokenizer::tokenize(&text, max_ngram) {
            if seen.insert(term.clone()) {
                *doc_counts.entry(term).or_insert(0) += 1;
            }
        }
    }

    if n_docs == 0 {
        return Ok(Vec::new());
    }

    let min_count = (min_doc_frequency * n_docs as f64).ceil() as u64;
    let kept: Vec<(String, f64)> = doc_counts
        .into_iter()
        .filter(|(_, count)| *count >= min_count.max(1))
        .map(|(term, count)| (term, (count as f64 + 1.0) / (n_docs as f64 + 1.0)))
        .collect();
    Ok(kept)
}

/// Header indices for the four text fields.
fn text_field_indices(headers: &csv::StringRecord) -> [usize; 4] {
    let idx = |name: &str| headers.iter().position(|h| h == name).unwrap_or(usize::MAX);
    [idx("title"), idx("keywords"), idx("abstract"), idx("body")]
}

fn concatenated_text(record: &csv::StringRecord, field_idx: [usize; 4]) -> String {
    field_idx
        .iter()
        .map(|&i| record.get(i).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a vocabulary file: one term per line (matches the source's plain
/// vocabulary-file format, and this crate's own `vocabulary.csv` output
/// when only its first column is read).
pub fn read_vocabulary_terms(path: &Path) -> Result<Vec<String>> {
    let mut text = String::new();
    std::fs::File::open(path)?.read_to_string(&mut text)?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split(',').next().unwrap_or("").trim().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_terms_meeting_min_doc_frequency() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("text.csv"),
            "id,title,keywords,abstract,body\n\
             pmcid_1,Cortex Study,,,The cortex showed activation.\n\
             pmcid_2,Cortex Replication,,,The cortex was active again.\n\
             pmcid_3,Amygdala Study,,,The amygdala was quiet.\n",
        )
        .expect("write corpus");

        // min_df=0.6 over 3 docs requires a term in at least 2 of them.
        let voc = extract_vocabulary(dir.path(), 0.6, 2).expect("fit");
        let terms: Vec<&str> = voc.iter().map(|(t, _)| t.as_str()).collect();
        assert!(terms.contains(&"cortex"), "cortex appears in 2/3 docs");
        assert!(!terms.contains(&"amygdala"), "amygdala appears in only 1/3 docs");
    }

    #[test]
    fn document_frequency_uses_laplace_smoothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("text.csv"),
            "id,title,keywords,abstract,body\n\
             pmcid_1,Cortex,,,\n\
             pmcid_2,Cortex,,,\n",
        )
        .expect("write corpus");

        let voc = extract_vocabulary(dir.path(), 0.0, 1).expect("fit");
        let (_, df) = voc.iter().find(|(t, _)| t == "cortex").expect("found");
        assert_eq!(*df, (2.0 + 1.0) / (2.0 + 1.0));
    }
}
