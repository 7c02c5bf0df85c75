//! `links` extractor: every `uri`/`ext-link` element carrying an xlink href.
//!
//! Grounded in `_links.py`. The secondary regex-capture extractor
//! (`LinkContentExtractor`, used upstream to pull out NeuroVault collection
//! and image ids) is not ported: it is not part of the fixed set of output
//! CSVs this crate's data-extraction stage produces, and adding it would be
//! inventing an output the rest of this crate has no consumer for. See
//! DESIGN.md.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use crate::extraction::extractor::{Extractor, PriorOutputs, Record};
use crate::extraction::xmltree::{self, Element};

const FIELDS: &[&str] = &["id", "ext-link-type", "href"];
const XLINK_HREF: &str = "xlink:href";

/// Extracts `{id, ext-link-type, href}`, deduplicated, one row per link.
pub struct LinkExtractor;

impl Extractor for LinkExtractor {
    fn name(&self) -> &str {
        "links"
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn extract(&self, article: &Element, _article_dir: &Path, _prior: &PriorOutputs) -> Record {
        let Some(pmcid) = xmltree::pmcid(article) else {
            return Record::empty_row_set();
        };
        let id = format!("pmcid_{pmcid}");

        let mut seen = BTreeSet::new();
        let mut rows = Vec::new();
        for tag in ["uri", "ext-link"] {
            let mut found = Vec::new();
            article.find_all_descendants(tag, &mut found);
            for link in found {
                let Some(href) = link.attr(XLINK_HREF) else {
                    continue;
                };
                let link_type = link.attr("ext-link-type").unwrap_or(tag);
                let key = (link_type.to_string(), href.to_string());
                if !seen.insert(key) {
                    continue;
                }
                let mut row = BTreeMap::new();
                row.insert("id".to_string(), id.clone());
                row.insert("ext-link-type".to_string(), link_type.to_string());
                row.insert("href".to_string(), href.to_string());
                rows.push(row);
            }
        }
        Record::RowSet(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::xmltree::parse_document;

    const SAMPLE: &str = r#"<article xmlns:xlink="http://www.w3.org/1999/xlink">
        <front><article-meta>
            <article-id pub-id-type="pmc">3</article-id>
        </article-meta></front>
        <body>
            <p><ext-link xlink:href="https://example.com/a" ext-link-type="uri"/></p>
            <p><uri xlink:href="https://example.com/b"/></p>
            <p><ext-link xlink:href="https://example.com/a" ext-link-type="uri"/></p>
        </body>
    </article>"#;

    #[test]
    fn deduplicates_identical_links() {
        let doc = parse_document(SAMPLE.as_bytes()).expect("parse");
        let record = LinkExtractor.extract(&doc, Path::new("."), &PriorOutputs::new());
        let Record::RowSet(rows) = record else {
            panic!("expected row set");
        };
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn falls_back_to_tag_name_for_link_type() {
        let doc = parse_document(SAMPLE.as_bytes()).expect("parse");
        let record = LinkExtractor.extract(&doc, Path::new("."), &PriorOutputs::new());
        let Record::RowSet(rows) = record else {
            panic!("expected row set");
        };
        let uri_row = rows.iter().find(|r| r["href"] == "https://example.com/b").expect("found");
        assert_eq!(uri_row["ext-link-type"], "uri");
    }
}
