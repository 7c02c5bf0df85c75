//! `metadata` extractor: bibliographic fields from `front/article-meta`.
//!
//! Grounded in `_metadata.py`. Only the PMC-identified code path is ported:
//! article split (`crate::articles`) already discards any article lacking a
//! `pmc`-typed `article-id`, so the source's PMID/MEDLINE fallback branch
//! never has input to act on here.

use std::collections::BTreeMap;
use std::path::Path;

use crate::extraction::extractor::{Extractor, PriorOutputs, Record};
use crate::extraction::xmltree::{self, Element};

const FIELDS: &[&str] = &[
    "id",
    "pmcid",
    "pmid",
    "doi",
    "title",
    "journal",
    "journal_fullname",
    "publication_year",
    "license",
];

/// Extracts `{id, pmcid, pmid, doi, title, journal, journal_fullname,
/// publication_year, license}` from an article's `front/article-meta`.
pub struct MetadataExtractor;

impl Extractor for MetadataExtractor {
    fn name(&self) -> &str {
        "metadata"
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
        row.insert("pmcid".to_string(), pmcid.to_string());

        if let Some(article_meta) = article.find_path(&["front", "article-meta"]) {
            for article_id in article_meta.children_with_tag("article-id") {
                add_id(article_id, &mut row);
            }
            if let Some(title) = article_meta.find_path(&["title-group", "article-title"]) {
                row.insert("title".to_string(), title.text_content());
            }
            add_journal(article, &mut row);
            add_pub_date(article_meta, &mut row);
            add_license(article_meta, &mut row);
        }
        Record::Single(row)
    }
}

fn add_id(article_id: &Element, row: &mut BTreeMap<String, String>) {
    let Some(id_type) = article_id.attr("pub-id-type") else {
        return;
    };
    let key = match id_type {
        "pmc" => "pmcid",
        "pmid" => "pmid",
        "doi" => "doi",
        _ => return,
    };
    row.insert(key.to_string(), article_id.own_text.trim().to_string());
}

fn add_journal(article: &Element, row: &mut BTreeMap<String, String>) {
    let Some(journal_meta) = article.find_path(&["front", "journal-meta"]) else {
        return;
    };
    if let Some(journal) = journal_meta
        .children_with_tag("journal-id")
        .find(|e| e.attr("journal-id-type") == Some("nlm-ta"))
    {
        row.insert("journal".to_string(), journal.own_text.trim().to_string());
    } else if let Some(fullname) = journal_meta.find_path(&["journal-title-group", "journal-title"]) {
        row.insert(
            "journal_fullname".to_string(),
            fullname.text_content(),
        );
    }
}

fn add_pub_date(article_meta: &Element, row: &mut BTreeMap<String, String>) {
    let years: Vec<i32> = article_meta
        .find_all_path(&["pub-date", "year"])
        .into_iter()
        .filter_map(|e| {
            let text = e.own_text.trim();
            if text.len() == 4 {
                text.parse::<i32>().ok()
            } else {
                None
            }
        })
        .collect();
    if let Some(min_year) = years.into_iter().min() {
        row.insert("publication_year".to_string(), min_year.to_string());
    }
}

fn add_license(article_meta: &Element, row: &mut BTreeMap<String, String>) {
    const HREF: &str = "xlink:href";
    let Some(license) = article_meta.find_path(&["permissions", "license"]) else {
        return;
    };
    if let Some(href) = license.attr(HREF) {
        row.insert("license".to_string(), href.to_string());
        return;
    }
    let link = license
        .find_descendant("ext-link")
        .or_else(|| license.find_descendant("uri"));
    if let Some(link) = link {
        if let Some(href) = link.attr(HREF) {
            row.insert("license".to_string(), href.to_string());
            return;
        }
    }
    if let Some(license_ref) = license.find_descendant("license_ref") {
        row.insert("license".to_string(), license_ref.text_content());
        return;
    }
    if let Some(license_type) = license.attr("license-type") {
        row.insert("license".to_string(), license_type.to_string());
    }
}
