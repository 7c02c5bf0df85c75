//! The `Extractor` trait and the `Record` value extractors return.

use std::collections::BTreeMap;
use std::path::Path;

use crate::extraction::xmltree::Element;

/// One extractor's output for one article.
#[derive(Debug, Clone)]
pub enum Record {
    /// A single row: field name to scalar value (missing fields omitted).
    Single(BTreeMap<String, String>),
    /// Zero or more rows sharing the same field set (e.g. one row per author).
    RowSet(Vec<BTreeMap<String, String>>),
}

impl Record {
    /// An empty row-set, used by extractors that found nothing for this article.
    pub fn empty_row_set() -> Self {
        Record::RowSet(Vec::new())
    }

    /// Number of rows this record would contribute to its CSV.
    pub fn len(&self) -> usize {
        match self {
            Record::Single(_) => 1,
            Record::RowSet(rows) => rows.len(),
        }
    }

    /// Whether this record contributes zero rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Prior extractors' outputs for the same article, keyed by extractor name,
/// available to extractors that run after them in the declared order.
pub type PriorOutputs = BTreeMap<String, Record>;

/// A pure function from an article tree to a [`Record`].
pub trait Extractor: Send + Sync {
    /// Stable name; also the output CSV's file stem (`{name}.csv`).
    fn name(&self) -> &str;

    /// Declared column order for this extractor's CSV.
    fn fields(&self) -> &'static [&'static str];

    /// Extract this extractor's record for one article.
    fn extract(&self, article: &Element, article_dir: &Path, prior: &PriorOutputs) -> Record;
}
