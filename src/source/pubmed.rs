//! PubMed abstracts via NCBI E-utilities
//!
//! `esearch` resolves a topic query to PMIDs, then each abstract is pulled
//! with its own `efetch` call so one bad record cannot sink the batch.

use super::{DocumentSource, FetchReport, RawRecord};
use crate::config::SourceConfig;
use crate::error::{RareGenError, Result};
use crate::passage::SourceTag;
use crate::retry::{with_retry, RetryPolicy, Transient};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs carry the NCBI api_key
        let e = e.without_url();
        if let Some(status) = e.status() {
            return classify_status(status, &e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            FetchError::Transient(e.to_string())
        } else {
            FetchError::Permanent(e.to_string())
        }
    }
}

/// Rate limiting and server faults are worth another attempt; everything
/// else (bad query, auth, missing record) is not
fn classify_status(status: StatusCode, detail: &str) -> FetchError {
    let message = format!("HTTP {}: {}", status, detail);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

fn parse_search_response(body: &str) -> std::result::Result<Vec<String>, FetchError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)
        .map_err(|e| FetchError::Permanent(format!("Malformed esearch response: {}", e)))?;

    if let Some(error) = envelope.esearchresult.error {
        return Err(FetchError::Permanent(format!("esearch rejected query: {}", error)));
    }

    Ok(envelope.esearchresult.idlist)
}

/// Fetch every id in turn, skipping (and counting) the ones that fail.
/// A batch where nothing survives is `SourceUnavailable`.
async fn collect_records<F, Fut>(
    query: &str,
    ids: &[String],
    interval: Duration,
    mut fetch_one: F,
) -> Result<FetchReport>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<String, FetchError>>,
{
    let mut report = FetchReport::default();

    for (i, id) in ids.iter().enumerate() {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }

        match fetch_one(id.clone()).await {
            Ok(text) if !text.trim().is_empty() => report.records.push(RawRecord {
                source_ref: id.clone(),
                text,
                tag: SourceTag::PubMed,
            }),
            Ok(_) => {
                warn!("PMID {} returned an empty abstract, skipping", id);
                report.skipped += 1;
            }
            Err(e) => {
                warn!("Failed to fetch PMID {}, skipping: {}", id, e);
                report.skipped += 1;
            }
        }
    }

    if !ids.is_empty() && report.records.is_empty() {
        return Err(RareGenError::SourceUnavailable(format!(
            "All {} abstracts for '{}' failed to download",
            ids.len(),
            query
        )));
    }

    Ok(report)
}

/// PubMed client for the NCBI E-utilities endpoints
pub struct PubMedSource {
    client: reqwest::Client,
    base_url: String,
    email: String,
    tool: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    request_interval: Duration,
}

impl PubMedSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("{}/{}", config.tool, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RareGenError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            tool: config.tool.clone(),
            api_key,
            policy: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.backoff_ms),
            ),
            request_interval: Duration::from_millis(config.request_interval_ms),
        })
    }

    fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("email", self.email.clone()),
            ("tool", self.tool.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn search_ids(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<String>, FetchError> {
        let url = format!("{}/esearch.fcgi", self.base_url);
        let mut params = self.identity_params();
        params.push(("term", query.to_string()));
        params.push(("retmax", limit.to_string()));
        params.push(("retmode", "json".to_string()));

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        parse_search_response(&body)
    }

    async fn fetch_abstract(&self, pmid: &str) -> std::result::Result<String, FetchError> {
        let url = format!("{}/efetch.fcgi", self.base_url);
        let mut params = self.identity_params();
        params.push(("id", pmid.to_string()));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "text".to_string()));

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        Ok(body)
    }
}

#[async_trait]
impl DocumentSource for PubMedSource {
    fn name(&self) -> &str {
        "pubmed"
    }

    async fn fetch(&self, query: &str, limit: usize) -> Result<FetchReport> {
        if limit == 0 {
            return Err(RareGenError::InputInvalid(
                "Fetch limit must be at least 1".to_string(),
            ));
        }

        let ids = with_retry(&self.policy, "esearch", || self.search_ids(query, limit))
            .await
            .map_err(|e| {
                RareGenError::SourceUnavailable(format!("esearch for '{}' failed: {}", query, e))
            })?;

        if ids.is_empty() {
            info!("No PubMed results for '{}'", query);
            return Ok(FetchReport::default());
        }
        debug!("esearch '{}' returned {} ids", query, ids.len());

        let report = collect_records(query, &ids, self.request_interval, |pmid| async move {
            with_retry(&self.policy, "efetch", || self.fetch_abstract(&pmid)).await
        })
        .await?;

        info!(
            "Fetched {} abstracts for '{}' ({} skipped)",
            report.records.len(),
            query,
            report.skipped
        );
        Ok(report)
    }
}
