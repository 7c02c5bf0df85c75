//! Client for the Entrez E-utilities needed to search for and download
//! open-access PubMed Central articles.
//!
//! Ported from the source `EntrezClient`: `esearch`/`epost` build a result
//! set on the NCBI history server, `efetch` pages through it in batches,
//! writing each batch straight to disk so downloads are resumable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::EntrezConfig;
use crate::error::{EntrezError, Error, Result};
use crate::retry::retry_with_backoff;

const ENTREZ_BASE_URL_SUFFIX_ESEARCH: &str = "esearch.fcgi";
const ENTREZ_BASE_URL_SUFFIX_EPOST: &str = "epost.fcgi";
const ENTREZ_BASE_URL_SUFFIX_EFETCH: &str = "efetch.fcgi";

/// A result set built on the Entrez history server: enough to page through
/// matching articles with repeated `efetch` calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    /// Number of matching records.
    pub count: u64,
    /// History-server session token.
    pub webenv: String,
    /// Query key identifying this result set within `webenv`.
    pub query_key: String,
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResultBody,
}

#[derive(Debug, Deserialize)]
struct EsearchResultBody {
    count: Option<String>,
    webenv: Option<String>,
    querykey: Option<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

/// Rate-limited, retrying client for `esearch`/`epost`/`efetch`.
///
/// Only one request is ever in flight at a time: the client enforces the
/// configured inter-request delay itself rather than relying on a caller to
/// serialize calls.
pub struct EntrezClient {
    http: reqwest::Client,
    config: EntrezConfig,
    last_request_time: Mutex<Option<Instant>>,
    /// Number of batches (or search/post attempts) that failed outright.
    pub n_failures: Mutex<u32>,
}

impl EntrezClient {
    /// Build a client from the given configuration.
    pub fn new(config: EntrezConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            last_request_time: Mutex::new(None),
            n_failures: Mutex::new(0),
        })
    }

    fn entrez_id_params(&self) -> Vec<(String, String)> {
        match &self.config.api_key {
            Some(key) => vec![("api_key".to_string(), key.clone())],
            None => Vec::new(),
        }
    }

    async fn wait_to_send_request(&self) {
        let period = self.config.rate_limit_period();
        let wait = {
            let mut last = self.last_request_time.lock().unwrap_or_else(|e| e.into_inner());
            match *last {
                None => {
                    *last = Some(Instant::now());
                    None
                }
                Some(previous) => {
                    let elapsed = previous.elapsed();
                    *last = Some(Instant::now());
                    period.checked_sub(elapsed)
                }
            }
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    async fn post_form(&self, url: &str, params: &[(String, String)]) -> Result<reqwest::Response> {
        self.wait_to_send_request().await;
        let resp = self
            .http
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| Error::Entrez(EntrezError::TransportFail(e.to_string())))?;
        Ok(resp)
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), suffix)
    }

    /// Perform an esearch, optionally restricted to an existing history-server
    /// result set. Results are always restricted to the open-access subset.
    pub async fn esearch(
        &self,
        query: Option<&str>,
        history: Option<(&str, &str)>,
    ) -> Result<SearchResult> {
        let term = match query {
            Some(q) => format!("{q}&open+access[filter]"),
            None => "open+access[filter]".to_string(),
        };
        let retry_config = self.config.retry.clone();
        let url = self.url(ENTREZ_BASE_URL_SUFFIX_ESEARCH);

        retry_with_backoff(&retry_config, || async {
            let mut params = vec![
                ("db".to_string(), "pmc".to_string()),
                ("term".to_string(), term.clone()),
                ("usehistory".to_string(), "y".to_string()),
                ("retmode".to_string(), "json".to_string()),
                ("retmax".to_string(), self.config.retmax.to_string()),
            ];
            params.extend(self.entrez_id_params());
            if let Some((webenv, query_key)) = history {
                params.push(("WebEnv".to_string(), webenv.to_string()));
                params.push(("query_key".to_string(), query_key.to_string()));
            }

            let resp = self.post_form(&url, &params).await?;
            if !resp.status().is_success() {
                return Err(Error::Entrez(EntrezError::ProtocolFail(format!(
                    "status code {} != 200",
                    resp.status()
                ))));
            }
            let body: EsearchResponse = resp
                .json()
                .await
                .map_err(|e| Error::Entrez(EntrezError::ProtocolFail(e.to_string())))?;
            if let Some(reason) = body.esearchresult.error {
                return Err(Error::Entrez(EntrezError::EmptyResult(format!(
                    "esearch returned ERROR: {reason}"
                ))));
            }
            let count = body
                .esearchresult
                .count
                .ok_or_else(|| {
                    Error::Entrez(EntrezError::ProtocolFail(
                        "missing count in esearch response".to_string(),
                    ))
                })?
                .parse::<u64>()
                .map_err(|e| Error::Entrez(EntrezError::ProtocolFail(e.to_string())))?;
            let webenv = body.esearchresult.webenv.ok_or_else(|| {
                Error::Entrez(EntrezError::ProtocolFail(
                    "missing webenv in esearch response".to_string(),
                ))
            })?;
            let query_key = body.esearchresult.querykey.ok_or_else(|| {
                Error::Entrez(EntrezError::ProtocolFail(
                    "missing querykey in esearch response".to_string(),
                ))
            })?;
            Ok(SearchResult {
                count,
                webenv,
                query_key,
            })
        })
        .await
        .map_err(|e| {
            *self.n_failures.lock().unwrap_or_else(|p| p.into_inner()) += 1;
            e
        })
    }

    /// Post a list of PMCIDs to the history server, then filter to the
    /// open-access subset via `esearch` against the posted history.
    pub async fn epost(&self, pmcids: &[u64]) -> Result<SearchResult> {
        if pmcids.is_empty() {
            *self.n_failures.lock().unwrap_or_else(|p| p.into_inner()) += 1;
            return Err(Error::Entrez(EntrezError::EmptyInput));
        }
        let ids = pmcids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let retry_config = self.config.retry.clone();
        let url = self.url(ENTREZ_BASE_URL_SUFFIX_EPOST);

        let (webenv, query_key) = retry_with_backoff(&retry_config, || async {
            let mut params = vec![
                ("db".to_string(), "pmc".to_string()),
                ("id".to_string(), ids.clone()),
            ];
            params.extend(self.entrez_id_params());

            let resp = self.post_form(&url, &params).await?;
            if !resp.status().is_success() {
                return Err(Error::Entrez(EntrezError::ProtocolFail(format!(
                    "status code {} != 200",
                    resp.status()
                ))));
            }
            let body = resp
                .text()
                .await
                .map_err(|e| Error::Entrez(EntrezError::ProtocolFail(e.to_string())))?;
            parse_epost_response(&body)
        })
        .await
        .map_err(|e| {
            *self.n_failures.lock().unwrap_or_else(|p| p.into_inner()) += 1;
            e
        })?;

        self.esearch(None, Some((&webenv, &query_key))).await
    }

    /// Download every article in `search_result` into `output_dir`, one XML
    /// articleset file per batch. Already-downloaded batches are skipped, so
    /// calling this again after a crash resumes where it left off.
    ///
    /// Returns the number of batches that failed to download.
    pub async fn efetch(
        &self,
        output_dir: &Path,
        search_result: &SearchResult,
        n_docs: Option<u64>,
        retmax: u64,
    ) -> Result<u32> {
        let n_docs = n_docs.map_or(search_result.count, |n| n.min(search_result.count));
        let n_batches = n_docs.div_ceil(retmax.max(1));
        let mut n_failures = 0u32;
        let mut retstart = 0u64;
        let mut batch_nb = 0u64;
        let retry_config = self.config.retry.clone();
        let url = self.url(ENTREZ_BASE_URL_SUFFIX_EFETCH);

        while retstart < n_docs {
            let batch_file = output_dir.join(format!("articleset_{batch_nb:05}.xml"));
            if batch_file.is_file() {
                tracing::info!(batch = batch_nb + 1, total = n_batches, "batch already downloaded, skipping");
            } else {
                tracing::info!(batch = batch_nb + 1, total = n_batches, "fetching batch");
                let result = retry_with_backoff(&retry_config, || async {
                    let mut params = vec![
                        ("db".to_string(), "pmc".to_string()),
                        ("WebEnv".to_string(), search_result.webenv.clone()),
                        ("query_key".to_string(), search_result.query_key.clone()),
                        ("retmax".to_string(), retmax.to_string()),
                        ("retstart".to_string(), retstart.to_string()),
                        ("retmode".to_string(), "xml".to_string()),
                    ];
                    params.extend(self.entrez_id_params());

                    let resp = self.post_form(&url, &params).await?;
                    if !resp.status().is_success() {
                        return Err(Error::Entrez(EntrezError::ProtocolFail(format!(
                            "status code {} != 200",
                            resp.status()
                        ))));
                    }
                    let bytes = resp
                        .bytes()
                        .await
                        .map_err(|e| Error::Entrez(EntrezError::ProtocolFail(e.to_string())))?;
                    if !looks_like_articleset(&bytes) {
                        return Err(Error::Entrez(EntrezError::ProtocolFail(
                            "response content does not appear to be an XML articleset".to_string(),
                        )));
                    }
                    Ok(bytes)
                })
                .await;

                match result {
                    Ok(bytes) => {
                        std::fs::write(&batch_file, bytes)?;
                    }
                    Err(e) => {
                        n_failures += 1;
                        tracing::error!(batches_failed = n_failures, error = %e, "batch failed to download");
                    }
                }
            }
            retstart += retmax;
            batch_nb += 1;
        }
        Ok(n_failures)
    }
}

fn looks_like_articleset(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    text.contains("<pmc-articleset") || text.contains("<pmc-articleset>")
}

fn parse_epost_response(body: &str) -> Result<(String, String)> {
    // Lightweight scan, avoiding a full XML parse for two leaf elements.
    let webenv = extract_xml_text(body, "WebEnv");
    let query_key = extract_xml_text(body, "QueryKey");
    match (webenv, query_key) {
        (Some(webenv), Some(query_key)) if !webenv.is_empty() && !query_key.is_empty() => {
            Ok((webenv, query_key))
        }
        _ => Err(Error::Entrez(EntrezError::ProtocolFail(
            "epost response missing WebEnv or QueryKey".to_string(),
        ))),
    }
}

fn extract_xml_text(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

/// Parameters describing a search to seed a new download.
#[derive(Debug, Clone)]
pub enum SearchInput {
    /// Free-text query run against the PMC database.
    Query(String),
    /// Explicit list of PMCIDs to restrict the download to.
    Pmcids(Vec<u64>),
}

/// Build the search result set for a given search input, recording extra
/// request metadata (the query string, etc.) in the returned map so callers
/// can persist it alongside `info.json`.
pub async fn prepare_webenv(
    client: &EntrezClient,
    input: &SearchInput,
) -> Result<(SearchResult, HashMap<String, String>)> {
    match input {
        SearchInput::Query(query) => {
            let result = client.esearch(Some(query), None).await?;
            let mut extra = HashMap::new();
            extra.insert("query".to_string(), query.clone());
            Ok((result, extra))
        }
        SearchInput::Pmcids(pmcids) => {
            let result = client.epost(pmcids).await?;
            Ok((result, HashMap::new()))
        }
    }
}
