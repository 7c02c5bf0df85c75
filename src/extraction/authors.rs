//! `authors` extractor: one row per author, joined with affiliation text.
//!
//! Grounded in `_authors.py`.

use std::collections::BTreeMap;
use std::path::Path;

use crate::extraction::extractor::{Extractor, PriorOutputs, Record};
use crate::extraction::xmltree::{self, Element};

const FIELDS: &[&str] = &["pmcid", "surname", "given-names", "affiliations"];

/// Extracts `{pmcid, surname, given-names, affiliations}`, one row per author.
pub struct AuthorsExtractor;

impl Extractor for AuthorsExtractor {
    fn name(&self) -> &str {
        "authors"
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn extract(&self, article: &Element, _article_dir: &Path, _prior: &PriorOutputs) -> Record {
        let Some(pmcid) = xmltree::pmcid(article) else {
            return Record::empty_row_set();
        };
        let Some(article_meta) = article.find_path(&["front", "article-meta"]) else {
            return Record::empty_row_set();
        };

        let mut affiliations: BTreeMap<i64, String> = BTreeMap::new();
        for aff in article_meta.children_with_tag("aff") {
            let Some(label) = aff.child("label") else {
                continue;
            };
            if let Ok(num) = label.own_text.trim().parse::<i64>() {
                affiliations.insert(num, aff.own_text.trim().to_string());
            }
        }

        let mut rows = Vec::new();
        let Some(contrib_group) = article_meta.child("contrib-group") else {
            return Record::RowSet(rows);
        };
        for contrib in contrib_group
            .children_with_tag("contrib")
            .filter(|c| c.attr("contrib-type") == Some("author"))
        {
            let mut row = BTreeMap::new();
            row.insert("pmcid".to_string(), pmcid.to_string());
            if let Some(surname) = contrib.find_path(&["name", "surname"]) {
                row.insert("surname".to_string(), surname.own_text.trim().to_string());
            }
            if let Some(given) = contrib.find_path(&["name", "given-names"]) {
                row.insert("given-names".to_string(), given.own_text.trim().to_string());
            }
            let joined = contrib
                .children_with_tag("xref")
                .filter(|x| x.attr("ref-type") == Some("aff"))
                .filter_map(|x| x.own_text.trim().parse::<i64>().ok())
                .filter_map(|num| affiliations.get(&num).cloned())
                .collect::<Vec<_>>()
                .join("; ");
            row.insert("affiliations".to_string(), joined);
            rows.push(row);
        }
        Record::RowSet(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::xmltree::parse_document;

    const SAMPLE: &str = r#"<article><front><article-meta>
        <article-id pub-id-type="pmc">5</article-id>
        <aff id="aff1"><label>1</label>Dept of Testing, University X</aff>
        <aff id="aff2"><label>2</label>Dept of Other, University Y</aff>
        <contrib-group>
            <contrib contrib-type="author">
                <name><surname>Doe</surname><given-names>Jane</given-names></name>
                <xref ref-type="aff">1</xref>
                <xref ref-type="aff">2</xref>
            </contrib>
            <contrib contrib-type="editor">
                <name><surname>Smith</surname><given-names>John</given-names></name>
            </contrib>
        </contrib-group>
    </article-meta></front></article>"#;

    #[test]
    fn joins_multiple_affiliations_with_semicolon() {
        let doc = parse_document(SAMPLE.as_bytes()).expect("parse");
        let record = AuthorsExtractor.extract(&doc, Path::new("."), &PriorOutputs::new());
        let Record::RowSet(rows) = record else {
            panic!("expected row set");
        };
        assert_eq!(rows.len(), 1, "editors are not authors");
        assert_eq!(rows[0]["surname"], "Doe");
        assert_eq!(rows[0]["affiliations"], "Dept of Testing, University X; Dept of Other, University Y");
    }
}
