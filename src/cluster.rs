use crate::extract::extract_json;
use crate::llm::{LlmClient, LlmRequest};
use crate::normalize::{collapse_whitespace, extract_domain};
use crate::prompt::cluster_prompt;
use crate::types::{Outcome, RawSourceItem, SourceCluster};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Claims longer than this are cut at a character boundary.
pub const MAX_CLAIM_CHARS: usize = 120;
/// Sources kept in the single catch-all cluster.
const FALLBACK_ITEMS: usize = 10;
const ID_HEX_CHARS: usize = 16;

pub fn cluster_ttl() -> Duration {
    Duration::days(3)
}

/// Context shared by every cluster produced for one topic.
#[derive(Debug, Clone, Default)]
pub struct ClusterRequest {
    pub topic: String,
    pub region: String,
    pub category: String,
    /// Queries that produced the sources.
    pub queries: Vec<String>,
}

/// Groups sources into claim-centric clusters with one model call.
#[derive(Clone)]
pub struct ClusteringEngine {
    llm: Arc<dyn LlmClient>,
}

impl ClusteringEngine {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Clusters `sources`.
    ///
    /// Empty input makes no call and returns nothing. Any model or parse failure
    /// yields one fallback cluster holding the topic and the first ten sources.
    #[instrument(skip(self, sources, request), fields(topic = %request.topic, sources = sources.len()))]
    pub async fn cluster(&self, sources: &[RawSourceItem], request: &ClusterRequest) -> Outcome<Vec<SourceCluster>> {
        if sources.is_empty() {
            return Outcome::llm(Vec::new());
        }

        let now = Utc::now();
        let llm_request = LlmRequest::new(cluster_prompt(
            sources,
            &request.topic,
            &request.region,
            &request.category,
        ))
        .temperature(0.2)
        .max_output_tokens(4096);

        let text = match self.llm.generate(&llm_request).await {
            Ok(response) => response.text,
            Err(e) => {
                warn!(stage = "cluster", error = %e, "Clustering call failed, using catch-all cluster");
                return Outcome::fallback(vec![fallback_cluster(sources, request, now)]);
            }
        };

        let clusters = match extract_json(&text) {
            Ok(value) => parse_clusters(&value, sources, request, now),
            Err(e) => {
                warn!(stage = "cluster", error = %e, "Clustering output unparseable, using catch-all cluster");
                Vec::new()
            }
        };

        if clusters.is_empty() {
            return Outcome::fallback(vec![fallback_cluster(sources, request, now)]);
        }

        info!(clusters = clusters.len(), "Sources clustered");
        Outcome::llm(clusters)
    }
}

/// Stable identifier: hash of claim, topic, region and the first three item URLs.
pub fn cluster_id(claim: &str, topic: &str, region: &str, items: &[RawSourceItem]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(claim.as_bytes());
    hasher.update(b"|");
    hasher.update(topic.as_bytes());
    hasher.update(b"|");
    hasher.update(region.as_bytes());
    for item in items.iter().take(3) {
        hasher.update(b"|");
        hasher.update(item.url.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..ID_HEX_CHARS].to_string()
}

fn build_cluster(claim: String, items: Vec<RawSourceItem>, request: &ClusterRequest, now: DateTime<Utc>) -> SourceCluster {
    SourceCluster {
        id: cluster_id(&claim, &request.topic, &request.region, &items),
        claim,
        category: request.category.clone(),
        region: request.region.clone(),
        items,
        created_at: now,
        expire_at: now + cluster_ttl(),
        queries: request.queries.clone(),
    }
}

pub fn fallback_cluster(sources: &[RawSourceItem], request: &ClusterRequest, now: DateTime<Utc>) -> SourceCluster {
    let items = sources.iter().take(FALLBACK_ITEMS).cloned().collect();
    build_cluster(truncate_claim(&request.topic), items, request, now)
}

fn parse_clusters(
    value: &Value,
    sources: &[RawSourceItem],
    request: &ClusterRequest,
    now: DateTime<Utc>,
) -> Vec<SourceCluster> {
    let Some(entries) = value.get("clusters").and_then(Value::as_array) else {
        warn!(stage = "cluster", "Clustering output has no clusters array");
        return Vec::new();
    };

    let by_url: HashMap<&str, &RawSourceItem> = sources.iter().map(|s| (s.url.as_str(), s)).collect();

    entries
        .iter()
        .filter_map(|entry| {
            let claim = truncate_claim(entry.get("claim")?.as_str()?);
            if claim.is_empty() {
                return None;
            }
            let items: Vec<RawSourceItem> = entry
                .get("items")?
                .as_array()?
                .iter()
                .filter_map(|stub| item_from_stub(stub, &by_url))
                .collect();
            if items.is_empty() {
                return None;
            }
            Some(build_cluster(claim, items, request, now))
        })
        .collect()
}

/// Rebuilds a source from the model's stub, preferring the collected record
/// for the same URL so snippets survive.
fn item_from_stub(stub: &Value, by_url: &HashMap<&str, &RawSourceItem>) -> Option<RawSourceItem> {
    let url = stub.get("url")?.as_str()?.trim();
    if url.is_empty() {
        return None;
    }
    if let Some(original) = by_url.get(url) {
        return Some((*original).clone());
    }

    let text = |key: &str| {
        stub.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(RawSourceItem {
        title: text("title").unwrap_or_default(),
        url: url.to_string(),
        snippet: None,
        domain: text("domain").unwrap_or_else(|| extract_domain(url)),
        published_at: text("publishedAt"),
    })
}

fn truncate_claim(claim: &str) -> String {
    collapse_whitespace(claim).chars().take(MAX_CLAIM_CHARS).collect()
}
