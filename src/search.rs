use crate::config::SearchConfig;
use crate::normalize::{clean_html_text, extract_domain, published_at_from_pagemap};
use crate::types::RawSourceItem;
use crate::{PipelineError, Result, MAX_RESULTS_PER_QUERY};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Parameters of one search API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub region: String,
    pub language: String,
}

/// One entry of a search API response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Structured metadata (`pagemap`) attached to the result.
    #[serde(default, rename = "pagemap")]
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

/// The `GoogleSearch` provider calls the Programmable Search JSON API.
pub struct GoogleSearch {
    /// The HTTP client used for making requests.
    client: Client,
    config: SearchConfig,
}

impl GoogleSearch {
    /// Creates a new `GoogleSearch` instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, credentials and timeout for the search API.
    /// * `user_agent` - The User-Agent header sent with every request.
    ///
    /// # Returns
    ///
    /// A `Result` containing the provider, or an error if the HTTP client cannot be built.
    pub fn new(config: SearchConfig, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(PipelineError::RequestError)?;

        Ok(Self { client, config })
    }

    fn has_credentials(&self) -> bool {
        !self.config.api_key.trim().is_empty() && !self.config.engine_id.trim().is_empty()
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if !self.has_credentials() {
            return Err(PipelineError::MissingCredentials("GOOGLE_SEARCH_API_KEY"));
        }

        let url = format!(
            "{}?key={}&cx={}&q={}&num={}&gl={}&lr=lang_{}",
            self.config.endpoint,
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(&self.config.engine_id),
            urlencoding::encode(&request.query),
            request.max_results.clamp(1, MAX_RESULTS_PER_QUERY),
            urlencoding::encode(&request.region.to_lowercase()),
            urlencoding::encode(&request.language),
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        debug!(status = %status, "Search API response received");

        if !status.is_success() {
            return Err(PipelineError::SearchError(format!(
                "search API returned {}",
                status
            )));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.items)
    }
}

/// The `SourceCollector` runs planned queries against a [`SearchProvider`]
/// and normalizes the hits into [`RawSourceItem`]s.
///
/// A failing query contributes nothing; it never aborts the rest of the batch.
#[derive(Clone)]
pub struct SourceCollector {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
    language: String,
    concurrent_requests: usize,
}

impl SourceCollector {
    /// Creates a new `SourceCollector` over `provider`.
    ///
    /// # Arguments
    ///
    /// * `provider` - The search backend.
    /// * `config` - Supplies the per-query result cap, language and concurrency.
    ///
    /// # Returns
    ///
    /// A new `SourceCollector` instance.
    pub fn new(provider: Arc<dyn SearchProvider>, config: &SearchConfig) -> Self {
        Self {
            provider,
            max_results: config.max_results.clamp(1, MAX_RESULTS_PER_QUERY),
            language: config.language.clone(),
            concurrent_requests: config.concurrent_requests.max(1),
        }
    }

    /// Runs one query. Errors are logged and turned into an empty list.
    #[instrument(skip(self))]
    pub async fn collect(&self, query: &str, region: &str) -> Vec<RawSourceItem> {
        match self.try_collect(query, region).await {
            Ok(items) => items,
            Err(PipelineError::MissingCredentials(var)) => {
                warn!(stage = "collect", query, missing = var, "Search credentials not configured");
                Vec::new()
            }
            Err(e) => {
                warn!(stage = "collect", query, error = %e, "Search failed");
                Vec::new()
            }
        }
    }

    /// Runs one query, keeping the failure visible to the caller.
    pub async fn try_collect(&self, query: &str, region: &str) -> Result<Vec<RawSourceItem>> {
        let request = SearchRequest {
            query: query.to_string(),
            max_results: self.max_results,
            region: region.to_string(),
            language: self.language.clone(),
        };

        let hits = self.provider.search(&request).await?;
        let items: Vec<RawSourceItem> = hits
            .into_iter()
            .filter_map(normalize_hit)
            .take(self.max_results)
            .collect();

        debug!(query, count = items.len(), "Collected sources");
        Ok(items)
    }

    /// Runs every query concurrently and returns the URL-deduplicated union.
    ///
    /// Results are concatenated in planning order, not completion order, so
    /// the same plan always yields the same source order.
    #[instrument(skip(self, queries), fields(queries = queries.len()))]
    pub async fn collect_all(&self, queries: &[String], region: &str) -> Vec<RawSourceItem> {
        let futures: Vec<_> = queries.iter().map(|query| self.collect(query, region)).collect();
        let per_query: Vec<Vec<RawSourceItem>> = stream::iter(futures)
            .buffered(self.concurrent_requests)
            .collect()
            .await;

        let total: usize = per_query.iter().map(Vec::len).sum();
        let sources = dedup_by_url(per_query.into_iter().flatten());

        info!(raw = total, unique = sources.len(), "Source collection complete");
        sources
    }
}

/// Converts a search hit into a source record; hits without a link are dropped.
fn normalize_hit(hit: SearchHit) -> Option<RawSourceItem> {
    let url = hit.link.trim().to_string();
    if url.is_empty() {
        return None;
    }

    let snippet = hit
        .snippet
        .as_deref()
        .map(clean_html_text)
        .filter(|s| !s.is_empty());

    Some(RawSourceItem {
        title: clean_html_text(&hit.title),
        domain: extract_domain(&url),
        published_at: published_at_from_pagemap(hit.metadata.as_ref()),
        snippet,
        url,
    })
}

/// Keeps the first item seen for each URL, preserving order of first appearance.
pub fn dedup_by_url(items: impl IntoIterator<Item = RawSourceItem>) -> Vec<RawSourceItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.url.clone()))
        .collect()
}
