//! Per-extractor CSV writer.
//!
//! Grounded in `_writers.py`'s `CSVWriter`: one file per extractor, named
//! after it, header written from the extractor's declared field order on
//! open, one row written per record with missing fields serialized empty.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::extraction::extractor::{Extractor, Record};

pub struct CsvWriter {
    fields: &'static [&'static str],
    inner: csv::Writer<File>,
}

impl CsvWriter {
    /// Open `{output_dir}/{extractor.name()}.csv`, writing the header row.
    pub fn from_extractor(extractor: &dyn Extractor, output_dir: &Path) -> Result<Self> {
        let path: PathBuf = output_dir.join(format!("{}.csv", extractor.name()));
        let mut inner = csv::Writer::from_path(&path)?;
        let fields = extractor.fields();
        inner.write_record(fields)?;
        Ok(Self { fields, inner })
    }

    /// Write every row in `record`, substituting an empty string for any
    /// field the row doesn't have. A `RowSet` with no rows writes nothing.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        match record {
            Record::Single(row) => self.write_row(row)?,
            Record::RowSet(rows) => {
                for row in rows {
                    self.write_row(row)?;
                }
            }
        }
        Ok(())
    }

    fn write_row(&mut self, row: &std::collections::BTreeMap<String, String>) -> Result<()> {
        let values: Vec<&str> = self
            .fields
            .iter()
            .map(|f| row.get(*f).map(String::as_str).unwrap_or(""))
            .collect();
        self.inner.write_record(&values)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;

    struct FakeExtractor;
    impl Extractor for FakeExtractor {
        fn name(&self) -> &str {
            "fake"
        }
        fn fields(&self) -> &'static [&'static str] {
            &["id", "value"]
        }
        fn extract(
            &self,
            _article: &crate::extraction::xmltree::Element,
            _article_dir: &Path,
            _prior: &crate::extraction::extractor::PriorOutputs,
        ) -> Record {
            Record::empty_row_set()
        }
    }

    #[test]
    fn missing_fields_are_written_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = CsvWriter::from_extractor(&FakeExtractor, dir.path()).expect("open");
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), "1".to_string());
        writer.write(&Record::Single(row)).expect("write");
        writer.flush().expect("flush");

        let contents = std::fs::read_to_string(dir.path().join("fake.csv")).expect("read");
        assert_eq!(contents, "id,value\n1,\n");
    }

    #[test]
    fn empty_row_set_writes_only_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = CsvWriter::from_extractor(&FakeExtractor, dir.path()).expect("open");
        writer.write(&Record::empty_row_set()).expect("write");
        writer.flush().expect("flush");

        let contents = std::fs::read_to_string(dir.path().join("fake.csv")).expect("read");
        assert_eq!(contents, "id,value\n");
    }
}
