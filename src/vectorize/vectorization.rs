//! `vectorize_corpus` stage: turn `text.csv` into per-field and merged
//! term-frequency / TF-IDF matrices against a fixed vocabulary.
//!
//! Grounded in `_vectorization.py`'s `vectorize_corpus`/`_vectorize_articles`
//! pipeline: count each of the four text fields against the full vocabulary,
//! L1-normalize rows into term frequencies, merge the four fields by mean,
//! derive a reduced vocabulary by folding an optional source -> target term
//! mapping into a collapse operator, and compute TF-IDF from the collapsed
//! merged term frequencies and their document frequencies.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vectorize::sparse::CsrMatrix;
use crate::vectorize::tokenizer;

pub const TEXT_FIELDS: &[&str] = &["title", "keywords", "abstract", "body"];

/// A source-term -> target-term collapse: every occurrence of `source` is
/// folded into `target`'s column before term frequencies are computed.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct VocabularyMapping(pub BTreeMap<String, String>);

/// Everything produced by [`vectorize_corpus`] for one corpus.
///
/// `counts`/`tfidf` carry one entry per text field plus a `"merged"` entry
/// (the mean of the four fields, matching how the merged term-frequency
/// matrix that document frequency and IDF are computed from is itself a
/// mean of the four per-field term frequencies).
pub struct VectorizedCorpus {
    pub pmcids: Vec<u64>,
    /// `(term, document_frequency)` over the full vocabulary, Laplace-smoothed.
    pub full_vocabulary: Vec<(String, f64)>,
    /// `(term, document_frequency)` over the reduced vocabulary, Laplace-smoothed.
    pub reduced_vocabulary: Vec<(String, f64)>,
    pub counts: BTreeMap<&'static str, CsrMatrix>,
    pub tfidf: BTreeMap<&'static str, CsrMatrix>,
}

/// Vectorize `{extracted_data_dir}/text.csv` against `vocabulary`, applying
/// `mapping` (if any) to collapse source terms into target terms.
pub fn vectorize_corpus(
    extracted_data_dir: &Path,
    vocabulary: &[String],
    mapping: &VocabularyMapping,
) -> Result<VectorizedCorpus> {
    let corpus_file = extracted_data_dir.join("text.csv");
    if !corpus_file.is_file() {
        return Err(Error::NotFound(corpus_file.display().to_string()));
    }

    let term_index: BTreeMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    let max_ngram = vocabulary.iter().map(|t| t.split(' ').count()).max().unwrap_or(1);

    let mut reader = csv::Reader::from_path(&corpus_file)?;
    let headers = reader.headers()?.clone();
    let field_idx: BTreeMap<&str, usize> = TEXT_FIELDS
        .iter()
        .filter_map(|&f| headers.iter().position(|h| h == f).map(|i| (f, i)))
        .collect();
    let id_idx = headers.iter().position(|h| h == "id");

    let mut pmcids = Vec::new();
    let mut field_rows: BTreeMap<&str, Vec<Vec<(usize, f64)>>> =
        TEXT_FIELDS.iter().map(|&f| (f, Vec::new())).collect();

    for record in reader.records() {
        let record = record?;
        let pmcid = id_idx
            .and_then(|i| record.get(i))
            .and_then(parse_pmcid)
            .ok_or_else(|| Error::Other(format!("row has no parseable id: {record:?}")))?;
        pmcids.push(pmcid);

        for &field in TEXT_FIELDS {
            let text = field_idx.get(field).and_then(|&i| record.get(i)).unwrap_or("");
            let counts = count_against_vocabulary(text, &term_index, max_ngram);
            field_rows.get_mut(field).expect("field present").push(counts);
        }
    }

    let n_docs = pmcids.len();
    let mut counts: BTreeMap<&'static str, CsrMatrix> = BTreeMap::new();
    let mut term_freqs: BTreeMap<&'static str, CsrMatrix> = BTreeMap::new();
    for &field in TEXT_FIELDS {
        let rows = field_rows.remove(field).unwrap_or_default();
        let field_counts = CsrMatrix::from_rows(vocabulary.len(), rows);
        let tf = field_counts.l1_normalize_rows();
        counts.insert(field, field_counts);
        term_freqs.insert(field, tf);
    }

    let field_tf_list: Vec<CsrMatrix> = TEXT_FIELDS.iter().map(|f| term_freqs[f].clone()).collect();
    let merged_tf = CsrMatrix::mean(&field_tf_list);
    let merged_counts = CsrMatrix::mean(&TEXT_FIELDS.iter().map(|f| counts[f].clone()).collect::<Vec<_>>());

    let full_vocabulary = laplace_doc_freq(vocabulary, &merged_tf.column_doc_counts(), n_docs);

    let (reduced_terms, collapse) = build_collapse_operator(vocabulary, mapping);

    // Document frequency over the reduced vocabulary isn't a re-indexing of
    // the full-vocabulary document frequency (several full-vocabulary terms
    // can collapse into the same reduced term within one document), so this
    // collapses the merged term-frequency matrix first and counts nonzeros.
    let collapsed_merged_tf = merged_tf.apply_collapse(&collapse);
    let reduced_vocabulary = laplace_doc_freq(&reduced_terms, &collapsed_merged_tf.column_doc_counts(), n_docs);
    let idf: Vec<f64> = reduced_vocabulary
        .iter()
        .map(|&(_, df)| -(df.ln()) + 1.0)
        .collect();

    let mut out_counts = BTreeMap::new();
    let mut out_tfidf = BTreeMap::new();
    for &field in TEXT_FIELDS {
        let field_counts = counts.remove(field).expect("field present").apply_collapse(&collapse);
        let field_tf = term_freqs.remove(field).expect("field present").apply_collapse(&collapse);
        let field_tfidf = field_tf.right_multiply_diag(&idf);
        out_counts.insert(field, field_counts);
        out_tfidf.insert(field, field_tfidf);
    }
    out_counts.insert("merged", merged_counts.apply_collapse(&collapse));
    out_tfidf.insert("merged", collapsed_merged_tf.right_multiply_diag(&idf));

    Ok(VectorizedCorpus {
        pmcids,
        full_vocabulary,
        reduced_vocabulary,
        counts: out_counts,
        tfidf: out_tfidf,
    })
}

/// Laplace-smoothed document frequency: `(docCount + 1) / (nDocs + 1)` per term.
fn laplace_doc_freq(terms: &[String], doc_counts: &[u64], n_docs: usize) -> Vec<(String, f64)> {
    terms
        .iter()
        .zip(doc_counts)
        .map(|(term, &count)| (term.clone(), (count as f64 + 1.0) / (n_docs as f64 + 1.0)))
        .collect()
}

fn parse_pmcid(id: &str) -> Option<u64> {
    id.strip_prefix("pmcid_").and_then(|rest| rest.parse().ok())
}

/// Count `text`'s n-grams that are present in the vocabulary.
fn count_against_vocabulary(
    text: &str,
    term_index: &BTreeMap<&str, usize>,
    max_ngram: usize,
) -> Vec<(usize, f64)> {
    let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
    for term in tokenizer::tokenize(text, max_ngram) {
        if let Some(&idx) = term_index.get(term.as_str()) {
            *counts.entry(idx).or_insert(0.0) += 1.0;
        }
    }
    counts.into_iter().collect()
}

/// Build the sparse vocabulary-collapse operator: one row per reduced
/// vocabulary term, one column per full-vocabulary term, with a `1` at
/// `(target, source)` for every mapped pair plus an identity row for every
/// unmapped term.
///
/// Grounded in `_vectorization.py`'s `_voc_mapping_matrix`.
fn build_collapse_operator(
    vocabulary: &[String],
    mapping: &VocabularyMapping,
) -> (Vec<String>, CsrMatrix) {
    let source_terms: std::collections::BTreeSet<&str> =
        mapping.0.keys().map(String::as_str).collect();
    let reduced_vocabulary: Vec<String> = vocabulary
        .iter()
        .filter(|t| !source_terms.contains(t.as_str()))
        .cloned()
        .collect();
    let reduced_index: BTreeMap<&str, usize> = reduced_vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); reduced_vocabulary.len()];
    for (full_idx, term) in vocabulary.iter().enumerate() {
        let target = mapping.0.get(term).map(String::as_str).unwrap_or(term.as_str());
        if let Some(&reduced_idx) = reduced_index.get(target) {
            rows[reduced_idx].push((full_idx, 1.0));
        }
    }

    (reduced_vocabulary, CsrMatrix::from_rows(vocabulary.len(), rows))
}
