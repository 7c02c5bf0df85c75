//! `text` extractor: title, keywords, abstract and body text.
//!
//! Grounded in `_text.py`. The source runs an XSLT "text_extraction"
//! stylesheet; this walks the same four sections directly, for the reason
//! `crate::articles` forgoes XSLT for table extraction (no XSLT engine in
//! this crate's dependency stack).

use std::collections::BTreeMap;
use std::path::Path;

use crate::extraction::extractor::{Extractor, PriorOutputs, Record};
use crate::extraction::xmltree::{self, Element};

const FIELDS: &[&str] = &["id", "title", "keywords", "abstract", "body"];

/// Extracts `{id, title, keywords, abstract, body}` as concatenated text.
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn name(&self) -> &str {
        "text"
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

        if let Some(article_meta) = article.find_path(&["front", "article-meta"]) {
            if let Some(title) = article_meta.find_path(&["title-group", "article-title"]) {
                row.insert("title".to_string(), title.text_content());
            }
            if let Some(kwd_group) = article_meta.child("kwd-group") {
                let keywords = kwd_group
                    .children_with_tag("kwd")
                    .map(|kwd| kwd.text_content())
                    .collect::<Vec<_>>()
                    .join("\n");
                row.insert("keywords".to_string(), keywords);
            }
            if let Some(abstract_elem) = article_meta.child("abstract") {
                row.insert("abstract".to_string(), abstract_elem.text_content());
            }
        }
        if let Some(body) = article.child("body") {
            row.insert("body".to_string(), body.text_content());
        }
        Record::Single(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::xmltree::parse_document;

    const SAMPLE: &str = r#"<article><front><article-meta>
        <article-id pub-id-type="pmc">9</article-id>
        <title-group><article-title>Testing Things</article-title></title-group>
        <kwd-group><kwd>fmri</kwd><kwd>cortex</kwd></kwd-group>
        <abstract><p>Background text.</p></abstract>
    </article-meta></front>
    <body><sec><p>Body text here.</p></sec></body>
    </article>"#;

    #[test]
    fn extracts_all_four_text_fields() {
        let doc = parse_document(SAMPLE.as_bytes()).expect("parse");
        let record = TextExtractor.extract(&doc, Path::new("."), &PriorOutputs::new());
        let Record::Single(row) = record else {
            panic!("expected single record");
        };
        assert_eq!(row["title"], "Testing Things");
        assert_eq!(row["keywords"], "fmri\ncortex");
        assert_eq!(row["abstract"], "Background text.");
        assert_eq!(row["body"], "Body text here.");
    }
}
