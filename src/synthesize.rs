use crate::extract::extract_json;
use crate::llm::{LlmClient, LlmRequest};
use crate::normalize::{collapse_whitespace, extract_domain};
use crate::prompt::PromptBuilder;
use crate::ratelimit::RateLimiter;
use crate::types::{
    Category, LocationRelevance, RawSourceItem, SourceInfo, SynthesizedArticle, Urgency,
};
use crate::PipelineError;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const MAX_SOURCES: usize = 15;
const MAX_TAGS: usize = 5;
const MIN_SUMMARY_WORDS: usize = 150;
const MIN_SOURCES: usize = 3;

/// Non-blocking quality problems of an otherwise valid article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualitySignal {
    ShortSummary { words: usize },
    FewSources { count: usize },
}

/// One article to write: the query it answers plus any seed sources.
///
/// `query` is stamped on the article as is. A cluster's claim narrows the
/// prompt but never replaces the query.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub query: String,
    pub category: Option<Category>,
    pub claim: Option<String>,
    pub sources: Vec<RawSourceItem>,
}

impl SynthesisJob {
    pub fn new(query: impl Into<String>, category: Option<Category>) -> Self {
        Self {
            query: query.into(),
            category,
            claim: None,
            sources: Vec::new(),
        }
    }

    pub fn with_claim(mut self, claim: Option<String>) -> Self {
        self.claim = claim;
        self
    }

    pub fn with_sources(mut self, sources: Vec<RawSourceItem>) -> Self {
        self.sources = sources;
        self
    }
}

/// The model's answer before validation. Everything is optional here; the
/// gate in [`validate_article`] decides what is required.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    title: Option<String>,
    summary: Option<String>,
    key_insights: Option<Vec<Value>>,
    category: Option<String>,
    tags: Option<Vec<Value>>,
    urgency: Option<String>,
    location_relevance: Option<String>,
    sources: Option<Vec<RawSourceInfo>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSourceInfo {
    name: Option<String>,
    title: Option<String>,
    url: Option<String>,
    domain: Option<String>,
}

/// Writes one article per query with a single grounded model call.
#[derive(Clone)]
pub struct ArticleSynthesizer {
    llm: Arc<dyn LlmClient>,
    max_output_tokens: u32,
    temperature: f32,
}

impl ArticleSynthesizer {
    /// Creates a synthesizer with the default generation settings.
    ///
    /// # Arguments
    ///
    /// * `llm` - The model used for every article call.
    ///
    /// # Returns
    ///
    /// A synthesizer using temperature 0.4 and 4096 output tokens.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_output_tokens: 4096,
            temperature: 0.4,
        }
    }

    pub fn with_generation(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Synthesizes an article for `query`.
    ///
    /// Returns `None` on any failure; a returned article always has a title,
    /// summary, key insights and sources.
    pub async fn synthesize(&self, query: &str, category: Option<Category>) -> Option<SynthesizedArticle> {
        self.synthesize_with_sources(query, category, Vec::new())
            .await
            .ok()
            .flatten()
    }

    /// Like [`Self::synthesize`], but keeps transport errors visible so batch
    /// callers can react to rate limiting.
    pub async fn synthesize_with_sources(
        &self,
        query: &str,
        category: Option<Category>,
        sources: Vec<RawSourceItem>,
    ) -> Result<Option<SynthesizedArticle>, PipelineError> {
        self.synthesize_job(&SynthesisJob::new(query, category).with_sources(sources))
            .await
    }

    /// Writes the article for one job.
    #[instrument(skip(self, job), fields(query = %job.query, sources = job.sources.len()))]
    pub async fn synthesize_job(&self, job: &SynthesisJob) -> Result<Option<SynthesizedArticle>, PipelineError> {
        let query = job.query.as_str();
        let prompt = PromptBuilder::new(job.query.clone())
            .with_category(job.category)
            .with_claim(job.claim.clone())
            .with_sources(job.sources.clone())
            .build();
        let request = LlmRequest::new(prompt)
            .temperature(self.temperature)
            .max_output_tokens(self.max_output_tokens)
            .with_web_search();

        let response = match self.llm.generate(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(stage = "synthesize", query, error = %e, "Article generation failed");
                return Err(e);
            }
        };

        let value = match extract_json(&response.text) {
            Ok(value) => value,
            Err(e) => {
                warn!(stage = "synthesize", query, error = %e, "Article output unparseable");
                return Ok(None);
            }
        };

        let article = validate_article(value, query, job.category);
        if let Some(article) = &article {
            for signal in quality_signals(article) {
                warn!(stage = "synthesize", query, signal = ?signal, "Article quality below target");
            }
            info!(title = %article.title, sources = article.sources.len(), "Article synthesized");
        }
        Ok(article)
    }

    /// Synthesizes articles in windows of `window` concurrent calls, waiting
    /// on `limiter` between windows. Failed items are dropped; later windows
    /// still run. Output order follows input order.
    pub async fn synthesize_batch(
        &self,
        jobs: &[SynthesisJob],
        window: usize,
        limiter: &dyn RateLimiter,
    ) -> Vec<SynthesizedArticle> {
        let window = window.max(1);
        let mut articles = Vec::new();

        for (index, chunk) in jobs.chunks(window).enumerate() {
            if index > 0 {
                limiter.wait().await;
            }

            let results = join_all(chunk.iter().map(|job| self.synthesize_job(job))).await;

            let mut throttled = false;
            for result in results {
                match result {
                    Ok(Some(article)) => articles.push(article),
                    Ok(None) => {}
                    Err(PipelineError::RateLimitError) => throttled = true,
                    Err(_) => {}
                }
            }
            if throttled {
                limiter.record_throttled();
            } else {
                limiter.record_success();
            }
        }

        info!(requested = jobs.len(), produced = articles.len(), "Article batch finished");
        articles
    }
}

/// Applies the validation gate and normalizes a parsed article.
///
/// `query` and `generated_at` are stamped from the caller, never the model.
pub fn validate_article(value: Value, query: &str, category_hint: Option<Category>) -> Option<SynthesizedArticle> {
    let raw: RawArticle = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(stage = "synthesize", error = %e, "Article JSON has unexpected shape");
            return None;
        }
    };

    let title = non_empty(raw.title);
    let summary = raw.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let key_insights = strings(raw.key_insights.unwrap_or_default());
    let sources = normalize_sources(raw.sources.unwrap_or_default());

    let (Some(title), Some(summary)) = (title, summary) else {
        warn!(stage = "synthesize", query, "Article missing title or summary");
        return None;
    };
    if key_insights.is_empty() || sources.is_empty() {
        warn!(stage = "synthesize", query, "Article missing key insights or sources");
        return None;
    }

    let category = raw
        .category
        .as_deref()
        .and_then(Category::parse_lenient)
        .or(category_hint)
        .unwrap_or(Category::GeneralHealth);

    let mut tags = Vec::new();
    for tag in strings(raw.tags.unwrap_or_default()) {
        let tag = tag.to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags.truncate(MAX_TAGS);

    Some(SynthesizedArticle {
        title,
        summary,
        key_insights,
        category,
        tags,
        urgency: raw
            .urgency
            .as_deref()
            .and_then(Urgency::parse_lenient)
            .unwrap_or(Urgency::Medium),
        location_relevance: raw
            .location_relevance
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(LocationRelevance::Global),
        sources,
        query: query.to_string(),
        generated_at: Utc::now(),
    })
}

pub fn quality_signals(article: &SynthesizedArticle) -> Vec<QualitySignal> {
    let mut signals = Vec::new();
    let words = article.summary.split_whitespace().count();
    if words < MIN_SUMMARY_WORDS {
        signals.push(QualitySignal::ShortSummary { words });
    }
    if article.sources.len() < MIN_SOURCES {
        signals.push(QualitySignal::FewSources {
            count: article.sources.len(),
        });
    }
    signals
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| collapse_whitespace(&s)).filter(|s| !s.is_empty())
}

/// Keeps the string entries of a JSON list, trimmed and non-empty.
fn strings(values: Vec<Value>) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drops sources without a URL, fills missing names and domains, dedups by URL.
fn normalize_sources(raw: Vec<RawSourceInfo>) -> Vec<SourceInfo> {
    let mut sources: Vec<SourceInfo> = Vec::new();
    for source in raw {
        let Some(url) = non_empty(source.url) else { continue };
        if sources.iter().any(|s| s.url == url) {
            continue;
        }
        let domain = non_empty(source.domain).unwrap_or_else(|| extract_domain(&url));
        let name = non_empty(source.name)
            .or_else(|| non_empty(source.title))
            .unwrap_or_else(|| domain.clone());
        sources.push(SourceInfo { name, url, domain });
    }
    sources.truncate(MAX_SOURCES);
    sources
}
