//! `extract_articles` stage: split bulk articleset downloads into one
//! directory per article, then pull each article's tables out into CSVs.
//!
//! Ported from the source `_articles.py`. Bucketing and the two-phase
//! (split articles, then extract tables) structure are preserved; the
//! original's XSLT stylesheet transform is replaced with a direct
//! `quick-xml` walk over `table-wrap` elements, since no XSLT engine is part
//! of this crate's dependency stack.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result, StopPipeline};
use crate::pipeline::{ExitCode, Step};
use crate::util::{self, StepInfo};

const XML_DECLARATION: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Split articlesets in `articlesets_dir` into one bucketed directory per
/// article under `output_dir`, then extract each article's tables.
///
/// Returns the output directory and an [`ExitCode`] that is `Incomplete`
/// whenever the upstream download was itself incomplete (the data is usable
/// but doesn't cover the full query result).
pub async fn extract_articles(
    config: &Config,
    articlesets_dir: &Path,
    output_dir: &Path,
) -> Result<(PathBuf, ExitCode)> {
    let status = util::check_steps_status(Some(articlesets_dir), output_dir)?;
    if !status.need_run {
        return Ok((output_dir.to_path_buf(), ExitCode::Completed));
    }

    tracing::info!(from = %articlesets_dir.display(), to = %output_dir.display(), "extracting articles");
    fs::create_dir_all(output_dir)?;

    let n_jobs = config.n_jobs();
    let n_articles = split_articlesets(articlesets_dir, output_dir, n_jobs).await?;
    extract_all_tables(output_dir, n_jobs).await?;

    tracing::info!(n_articles, "done extracting articles");

    let is_complete = status.previous_step_complete.unwrap_or(false);
    let mut info = StepInfo {
        name: "extract_articles".to_string(),
        is_complete,
        date: None,
        extra: serde_json::Map::new(),
    };
    info.extra
        .insert("n_articles".to_string(), serde_json::Value::from(n_articles));
    info.write(output_dir)?;

    let exit_code = if is_complete {
        ExitCode::Completed
    } else {
        ExitCode::Incomplete
    };
    Ok((output_dir.to_path_buf(), exit_code))
}

/// Split every `articleset_*.xml` batch file into per-article directories.
/// Returns the total number of articles extracted.
async fn split_articlesets(articlesets_dir: &Path, output_dir: &Path, n_jobs: usize) -> Result<u64> {
    let mut batch_files: Vec<PathBuf> = fs::read_dir(articlesets_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("articleset_") && n.ends_with(".xml"))
        })
        .collect();
    batch_files.sort();

    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(n_jobs.max(1)));
    let mut handles = Vec::new();
    for batch_file in batch_files {
        let output_dir = output_dir.to_path_buf();
        let permit = semaphore.clone().acquire_owned().await.map_err(|e| Error::Other(e.to_string()))?;
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            extract_from_articleset(&batch_file, &output_dir)
        }));
    }

    let mut n_articles = 0u64;
    for handle in handles {
        n_articles += handle
            .await
            .map_err(|e| Error::Other(e.to_string()))??;
    }
    Ok(n_articles)
}

/// Split a single articleset batch file, writing `article.xml` for each
/// `<article>` element into its bucket directory.
fn extract_from_articleset(batch_file: &Path, output_dir: &Path) -> Result<u64> {
    let bytes = fs::read(batch_file)?;
    let mut reader = Reader::from_reader(bytes.as_slice());
    reader.config_mut().trim_text(false);

    let mut n_articles = 0u64;
    let mut depth = 0usize;
    let mut article_start: Option<usize> = None;
    let mut buf = Vec::new();

    loop {
        let pos_before = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"article" && depth == 0 => {
                article_start = Some(pos_before as usize);
                depth = 1;
            }
            Ok(Event::Start(ref e)) if depth > 0 => {
                if e.name().as_ref() == b"article" {
                    depth += 1;
                }
            }
            Ok(Event::End(ref e)) if depth > 0 && e.name().as_ref() == b"article" => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = article_start.take() {
                        let end = reader.buffer_position() as usize;
                        let article_xml = &bytes[start..end];
                        if let Some(pmcid) = extract_pmcid(article_xml) {
                            let bucket = util::article_bucket_from_pmcid(pmcid);
                            let article_dir = output_dir.join(bucket).join(format!("pmcid_{pmcid}"));
                            fs::create_dir_all(&article_dir)?;
                            let mut doc = Vec::with_capacity(article_xml.len() + XML_DECLARATION.len());
                            doc.extend_from_slice(XML_DECLARATION);
                            doc.extend_from_slice(article_xml);
                            fs::write(article_dir.join("article.xml"), doc)?;
                            n_articles += 1;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(n_articles)
}

/// Extract the PMC id from `front/article-meta/article-id[@pub-id-type="pmc"]`.
fn extract_pmcid(article_xml: &[u8]) -> Option<u64> {
    let mut reader = Reader::from_reader(article_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_target = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"article-id" => {
                in_target = e.attributes().flatten().any(|a| {
                    a.key.as_ref() == b"pub-id-type" && a.value.as_ref() == b"pmc"
                });
            }
            Ok(Event::Text(ref t)) if in_target => {
                if let Ok(text) = t.unescape() {
                    if let Ok(pmcid) = text.trim().parse::<u64>() {
                        return Some(pmcid);
                    }
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"article-id" => {
                in_target = false;
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

async fn extract_all_tables(output_dir: &Path, n_jobs: usize) -> Result<()> {
    let article_dirs = iter_article_dirs(output_dir)?;
    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(n_jobs.max(1)));
    let mut handles = Vec::new();
    for article_dir in article_dirs {
        let permit = semaphore.clone().acquire_owned().await.map_err(|e| Error::Other(e.to_string()))?;
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            extract_tables(&article_dir)
        }));
    }
    for handle in handles {
        handle.await.map_err(|e| Error::Other(e.to_string()))??;
    }
    Ok(())
}

/// Walk all bucket directories under `all_articles_dir`, yielding every
/// `pmcid_*` article directory.
pub fn iter_article_dirs(all_articles_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !all_articles_dir.is_dir() {
        return Ok(dirs);
    }
    for bucket in fs::read_dir(all_articles_dir)? {
        let bucket = bucket?.path();
        if !bucket.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&bucket)? {
            let entry = entry?.path();
            if entry.is_dir()
                && entry
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("pmcid_"))
            {
                dirs.push(entry);
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct TableInfo {
    pub table_id: Option<String>,
    pub table_label: Option<String>,
    pub table_caption: Option<String>,
    pub n_header_rows: usize,
    pub table_data_file: String,
}

/// Extract every `table-wrap` in an article's `article.xml` into a CSV plus
/// a sidecar `_info.json` describing it.
fn extract_tables(article_dir: &Path) -> Result<()> {
    let article_xml = article_dir.join("article.xml");
    let bytes = match fs::read(&article_xml) {
        Ok(b) => b,
        Err(_) => return Ok(()),
    };
    let tables = match parse_tables(&bytes) {
        Ok(tables) => tables,
        Err(e) => {
            tracing::warn!(article = %article_dir.display(), error = %e, "failed to extract tables");
            return Ok(());
        }
    };
    if tables.is_empty() {
        return Ok(());
    }
    let tables_dir = article_dir.join("tables");
    fs::create_dir_all(&tables_dir)?;
    for (table_nb, table) in tables.into_iter().enumerate() {
        let table_name = format!("table_{table_nb:03}");
        let data_file = format!("{table_name}.csv");
        write_table_csv(&tables_dir.join(&data_file), &table.rows)?;
        let info = TableInfo {
            table_id: table.table_id,
            table_label: table.table_label,
            table_caption: table.table_caption,
            n_header_rows: if table.has_header { 1 } else { 0 },
            table_data_file: data_file,
        };
        fs::write(
            tables_dir.join(format!("{table_name}_info.json")),
            serde_json::to_string(&info)?,
        )?;
    }
    Ok(())
}

/// Read every `tables/table_*_info.json` + its sibling CSV back out of an
/// article directory, in table-number order.
///
/// Mirrors `_utils.get_tables_from_article_dir`.
pub fn read_tables_from_article_dir(article_dir: &Path) -> Result<Vec<(TableInfo, Vec<Vec<String>>)>> {
    let tables_dir = article_dir.join("tables");
    if !tables_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut info_files: Vec<PathBuf> = fs::read_dir(&tables_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_info.json"))
        })
        .collect();
    info_files.sort();

    let mut tables = Vec::new();
    for info_path in info_files {
        let info: TableInfo = serde_json::from_str(&fs::read_to_string(&info_path)?)?;
        let data_path = tables_dir.join(&info.table_data_file);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&data_path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        }
        tables.push((info, rows));
    }
    Ok(tables)
}

struct ExtractedTable {
    table_id: Option<String>,
    table_label: Option<String>,
    table_caption: Option<String>,
    has_header: bool,
    rows: Vec<Vec<String>>,
}

fn write_table_csv(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse `table-wrap` elements out of an article's XML body.
///
/// This is a direct reimplementation of what the source's XSLT stylesheet
/// does (locate `table-wrap`, pull its label/caption, flatten `<table>` rows
/// to a grid) without requiring an XSLT engine.
fn parse_tables(article_xml: &[u8]) -> Result<Vec<ExtractedTable>> {
    let mut reader = Reader::from_reader(article_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut tables = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"table-wrap" => {
                let table_id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref() == b"id")
                    .and_then(|a| String::from_utf8(a.value.into_owned()).ok());
                tables.push(parse_one_table_wrap(&mut reader, table_id)?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(tables)
}

fn parse_one_table_wrap(reader: &mut Reader<&[u8]>, table_id: Option<String>) -> Result<ExtractedTable> {
    let mut table_label = None;
    let mut table_caption = None;
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    let mut depth = 1usize;
    let mut buf = Vec::new();
    let mut current_tag: Option<Vec<u8>> = None;
    let mut current_row: Option<Vec<String>> = None;
    let mut in_header = false;
    let mut cell_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"table-wrap" => depth += 1,
                    b"label" if table_label.is_none() => current_tag = Some(b"label".to_vec()),
                    b"caption" => current_tag = Some(b"caption".to_vec()),
                    b"thead" => in_header = true,
                    b"tbody" => in_header = false,
                    b"tr" => current_row = Some(Vec::new()),
                    b"th" | b"td" => {
                        cell_text.clear();
                        if name.as_slice() == b"th" {
                            has_header = true;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Ok(text) = t.unescape() {
                    if current_tag.is_some() {
                        let target = if current_tag.as_deref() == Some(b"label") {
                            &mut table_label
                        } else {
                            &mut table_caption
                        };
                        *target = Some(target.clone().unwrap_or_default() + text.trim());
                    } else if current_row.is_some() {
                        cell_text.push_str(text.trim());
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name().as_ref();
                match name {
                    b"table-wrap" => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    b"label" | b"caption" => current_tag = None,
                    b"th" | b"td" => {
                        if let Some(row) = current_row.as_mut() {
                            row.push(std::mem::take(&mut cell_text));
                        }
                    }
                    b"tr" => {
                        if let Some(row) = current_row.take() {
                            if in_header && rows.is_empty() {
                                has_header = true;
                            }
                            rows.push(row);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(ExtractedTable {
        table_id,
        table_label,
        table_caption,
        has_header,
        rows,
    })
}

/// Pipeline-driver adapter around [`extract_articles`].
pub struct ArticleExtractionStep;

#[async_trait]
impl Step for ArticleExtractionStep {
    fn name(&self) -> &str {
        "extract_articles"
    }

    async fn run(
        &self,
        config: &Config,
        previous_steps_output: &HashMap<String, PathBuf>,
    ) -> std::result::Result<(Option<PathBuf>, ExitCode), StopPipeline> {
        let articlesets_dir = previous_steps_output
            .get("download")
            .ok_or_else(|| StopPipeline::new("no download output available"))?;
        let output_dir = articlesets_dir
            .parent()
            .unwrap_or(articlesets_dir)
            .join("articles");
        match extract_articles(config, articlesets_dir, &output_dir).await {
            Ok((dir, code)) => Ok((Some(dir), code)),
            Err(e) => Err(StopPipeline::new(e.to_string())),
        }
    }
}
