//! Minimal in-memory XML tree used by the field extractors.
//!
//! The extractors need path-based lookups (`front/article-meta/title-group`)
//! and "all text under this node" queries, the same primitives
//! `lxml.etree` gives the source extractors. `quick-xml` is a streaming
//! pull parser with no DOM, so this builds the small tree the extractors
//! need on top of it once per article.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// One XML element: tag name, attributes, children, and any text nodes that
/// are direct children (not nested inside a child element).
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Local tag name (namespace prefix stripped).
    pub tag: String,
    /// Attribute name/value pairs, namespace prefixes kept verbatim (e.g. `xlink:href`).
    pub attrs: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<Element>,
    /// Concatenation of text nodes that are direct children of this element.
    pub own_text: String,
}

impl Element {
    /// Attribute value by exact name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child whose tag matches, optionally also matching one attribute.
    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// All direct children with the given tag.
    pub fn children_with_tag<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Descend a slash-separated path of direct-child tags, returning the
    /// first element reached (mirrors `etree.find("a/b/c")`).
    pub fn find_path(&self, path: &[&str]) -> Option<&Element> {
        let mut current = self;
        for segment in path {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// All elements reached by following a slash-separated path of direct
    /// child tags, where only the last segment may match multiple times
    /// (mirrors `etree.iterfind("a/b/c")` for the common case used here).
    pub fn find_all_path<'a>(&'a self, path: &[&str]) -> Vec<&'a Element> {
        if path.is_empty() {
            return vec![self];
        }
        let (last, prefix) = path.split_last().expect("non-empty path");
        match self.find_path(prefix) {
            Some(parent) => parent.children_with_tag(last).collect(),
            None => Vec::new(),
        }
    }

    /// Depth-first search for the first descendant (at any depth) with the
    /// given tag, including `self`.
    pub fn find_descendant(&self, tag: &str) -> Option<&Element> {
        if self.tag == tag {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find_descendant(tag) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants (at any depth, not including `self`) with the given tag.
    pub fn find_all_descendants<'a>(&'a self, tag: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.tag == tag {
                out.push(child);
            }
            child.find_all_descendants(tag, out);
        }
    }

    /// All text under this element, depth-first, concatenated with no separator
    /// (mirrors `"".join(elem.xpath(".//text()"))`).
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.own_text);
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

/// Extract the PMC id from `front/article-meta/article-id[@pub-id-type='pmc']`.
///
/// Mirrors `_utils.get_pmcid`. Article split already guarantees every
/// `article.xml` has one, so extractors treat its absence as a bug rather
/// than a recoverable condition.
pub fn pmcid(article: &Element) -> Option<u64> {
    article
        .find_all_path(&["front", "article-meta", "article-id"])
        .into_iter()
        .find(|e| e.attr("pub-id-type") == Some("pmc"))
        .and_then(|e| e.own_text.trim().parse().ok())
}

/// Parse the PMC id out of an article directory name (`pmcid_<id>`).
pub fn pmcid_from_dir_name(dir_name: &str) -> Option<u64> {
    dir_name.strip_prefix("pmcid_")?.parse().ok()
}

/// Parse a whole article XML document into a tree rooted at its outermost element.
pub fn parse_document(xml: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut stack: Vec<Element> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                stack.push(Element {
                    tag: local_name(e.name().as_ref()),
                    attrs: e
                        .attributes()
                        .flatten()
                        .map(|a| {
                            (
                                String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                                a.unescape_value().unwrap_or_default().into_owned(),
                            )
                        })
                        .collect(),
                    children: Vec::new(),
                    own_text: String::new(),
                });
            }
            Ok(Event::Empty(ref e)) => {
                let elem = Element {
                    tag: local_name(e.name().as_ref()),
                    attrs: e
                        .attributes()
                        .flatten()
                        .map(|a| {
                            (
                                String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                                a.unescape_value().unwrap_or_default().into_owned(),
                            )
                        })
                        .collect(),
                    children: Vec::new(),
                    own_text: String::new(),
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(elem);
                } else {
                    return Ok(elem);
                }
            }
            Ok(Event::Text(ref t)) | Ok(Event::CData(ref t)) => {
                if let Ok(text) = t.unescape() {
                    if let Some(current) = stack.last_mut() {
                        current.own_text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some(finished) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => return Ok(finished),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
        buf.clear();
    }
    Err(Error::Other("empty XML document".to_string()))
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_path_descends_direct_children() {
        let doc = parse_document(br#"<a><b><c>hi</c></b></a>"#).expect("parse");
        let c = doc.find_path(&["b", "c"]).expect("found");
        assert_eq!(c.own_text, "hi");
    }

    #[test]
    fn find_all_path_returns_every_matching_leaf() {
        let doc = parse_document(br#"<a><b><c>1</c><c>2</c></b></a>"#).expect("parse");
        let all = doc.find_all_path(&["b", "c"]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn text_content_concatenates_nested_text() {
        let doc = parse_document(br#"<a>one <b>two</b> three</a>"#).expect("parse");
        assert_eq!(doc.text_content(), "one two three");
    }

    #[test]
    fn attr_reads_attribute_by_name() {
        let doc = parse_document(br#"<a id="pmc"><b/></a>"#).expect("parse");
        assert_eq!(doc.attr("id"), Some("pmc"));
    }

    #[test]
    fn find_all_descendants_searches_every_depth() {
        let doc = parse_document(br#"<a><b><uri/></b><uri/></a>"#).expect("parse");
        let mut found = Vec::new();
        doc.find_all_descendants("uri", &mut found);
        assert_eq!(found.len(), 2);
    }
}
