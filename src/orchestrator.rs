use crate::cluster::{ClusterRequest, ClusteringEngine};
use crate::config::PipelineConfig;
use crate::discovery::TopicDiscovery;
use crate::llm::{GeminiClient, LlmClient};
use crate::planner::SubqueryPlanner;
use crate::ratelimit::{AdaptiveBackoff, FixedDelay, RateLimiter};
use crate::search::{GoogleSearch, SearchProvider, SourceCollector};
use crate::store::{
    put, record_key, DocumentStore, QueryRecord, ARTICLES_COLLECTION, CLUSTERS_COLLECTION, QUERIES_COLLECTION,
};
use crate::synthesize::{ArticleSynthesizer, SynthesisJob};
use crate::types::{Category, DiscoveredTopic, Outcome, Query, QueryPriority, SynthesizedArticle};
use crate::Result;
use futures::future::join_all;
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What happened to one searched query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// Sources were found and persisted.
    Collected { sources: usize },
    /// The search ran and returned nothing; nothing was written.
    Empty,
    /// The search or the write failed.
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReport {
    pub query: String,
    pub status: QueryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryStatus {
    Completed { topics: usize, queries: Vec<QueryReport> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryReport {
    pub category: Category,
    pub status: CategoryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub categories: Vec<CategoryReport>,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories
            .iter()
            .filter(|c| matches!(c.status, CategoryStatus::Completed { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories
            .iter()
            .filter(|c| matches!(c.status, CategoryStatus::Failed(_)))
    }

    /// Number of query documents written across all categories.
    pub fn persisted(&self) -> usize {
        self.completed()
            .filter_map(|c| match &c.status {
                CategoryStatus::Completed { queries, .. } => Some(queries),
                CategoryStatus::Failed(_) => None,
            })
            .flatten()
            .filter(|q| matches!(q.status, QueryStatus::Collected { .. }))
            .count()
    }
}

/// Drives discovery, planning, collection, clustering and synthesis across
/// categories and topics.
///
/// Every fan-out joins all branches; a failing branch only loses its own
/// contribution.
#[derive(Clone)]
pub struct BatchOrchestrator {
    discovery: TopicDiscovery,
    planner: SubqueryPlanner,
    collector: SourceCollector,
    clusterer: ClusteringEngine,
    synthesizer: ArticleSynthesizer,
    store: Arc<dyn DocumentStore>,
    collection_limiter: Arc<dyn RateLimiter>,
    article_limiter: Arc<dyn RateLimiter>,
    config: PipelineConfig,
}

impl BatchOrchestrator {
    /// Creates a new `BatchOrchestrator` from its providers.
    ///
    /// # Arguments
    ///
    /// * `llm` - The model shared by discovery, planning, clustering and synthesis.
    /// * `search` - The search backend used for source collection.
    /// * `store` - Where query records, clusters and articles are written.
    /// * `config` - Batch sizes, pacing and generation settings.
    ///
    /// # Returns
    ///
    /// A new `BatchOrchestrator` paced by limiters derived from `config`.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn DocumentStore>,
        config: PipelineConfig,
    ) -> Self {
        let collection_limiter = limiter_for(config.collection_delay(), config.rate_limit.max_backoff_ms);
        let article_limiter = limiter_for(config.article_delay(), config.rate_limit.max_backoff_ms);

        Self {
            discovery: TopicDiscovery::new(llm.clone()),
            planner: SubqueryPlanner::new(llm.clone()).with_max_queries(config.batch.max_planned_queries),
            collector: SourceCollector::new(search, &config.search),
            clusterer: ClusteringEngine::new(llm.clone()),
            synthesizer: ArticleSynthesizer::new(llm)
                .with_generation(config.llm_config.temperature, config.llm_config.max_tokens),
            store,
            collection_limiter,
            article_limiter,
            config,
        }
    }

    /// Builds the production stack: Gemini for every model call and the
    /// Programmable Search API for sources.
    pub fn from_config(config: PipelineConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let llm = Arc::new(GeminiClient::new(config.llm_config.clone())?);
        let search = Arc::new(GoogleSearch::new(config.search.clone(), &config.user_agent)?);
        Ok(Self::new(llm, search, store, config))
    }

    /// Replaces both pacing strategies.
    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.collection_limiter = limiter.clone();
        self.article_limiter = limiter;
        self
    }

    /// Searches `queries` in `region` in batches and persists every query that
    /// found sources.
    pub async fn collect_queries(&self, queries: &[Query], region: &str) -> Vec<QueryReport> {
        let batch_size = self.config.rate_limit.collection_batch_size.max(1);
        let mut reports = Vec::with_capacity(queries.len());

        for (index, batch) in queries.chunks(batch_size).enumerate() {
            if index > 0 {
                self.collection_limiter.wait().await;
            }
            let results = join_all(batch.iter().map(|q| self.collect_and_persist(q, region))).await;
            reports.extend(results);
        }

        let collected = reports
            .iter()
            .filter(|r| matches!(r.status, QueryStatus::Collected { .. }))
            .count();
        let errored = reports
            .iter()
            .filter(|r| matches!(r.status, QueryStatus::Errored(_)))
            .count();
        info!(
            total = reports.len(),
            collected,
            empty = reports.len() - collected - errored,
            errored,
            "Query collection finished"
        );
        reports
    }

    async fn collect_and_persist(&self, query: &Query, region: &str) -> QueryReport {
        let status = match self.collector.try_collect(&query.text, region).await {
            Ok(sources) if sources.is_empty() => QueryStatus::Empty,
            Ok(sources) => {
                let count = sources.len();
                let record = QueryRecord::new(query.text.clone(), query.category, query.priority, sources);
                match put(self.store.as_ref(), QUERIES_COLLECTION, &record_key(&query.text), &record).await {
                    Ok(()) => QueryStatus::Collected { sources: count },
                    Err(e) => {
                        warn!(stage = "persist", query = %query.text, error = %e, "Failed to persist query");
                        QueryStatus::Errored(e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(stage = "collect", query = %query.text, error = %e, "Query collection failed");
                QueryStatus::Errored(e.to_string())
            }
        };

        QueryReport {
            query: query.text.clone(),
            status,
        }
    }

    /// Discovers, plans and collects one category.
    pub async fn run_category(&self, category: Category, region: &str) -> CategoryStatus {
        let topics = self
            .discovery
            .discover_category(category, region, self.config.batch.topics_per_category)
            .await;
        if topics.is_empty() {
            warn!(%category, "No topics discovered, try again later");
        }

        let mut queries = Vec::new();
        for topic in &topics {
            let planned = self.plan(&topic.topic, region, category.as_str()).await;
            let priority = QueryPriority::from_score(topic.priority);
            for text in planned.value {
                if queries.iter().any(|q: &Query| q.text == text) {
                    continue;
                }
                queries.push(Query {
                    text,
                    category,
                    region: Some(region.to_string()),
                    priority,
                });
            }
        }

        let reports = self.collect_queries(&queries, region).await;
        CategoryStatus::Completed {
            topics: topics.len(),
            queries: reports,
        }
    }

    /// Runs one task per category and reports each independently.
    pub async fn collect_categories(&self, categories: &[Category], region: &str) -> BatchReport {
        let handles: Vec<_> = categories
            .iter()
            .map(|&category| {
                let this = self.clone();
                let region = region.to_string();
                tokio::spawn(async move { this.run_category(category, &region).await })
            })
            .collect();

        let results = join_all(handles).await;
        let categories = categories
            .iter()
            .zip(results)
            .map(|(&category, result)| {
                let status = match result {
                    Ok(status) => status,
                    Err(e) => {
                        error!(%category, error = %e, "Category pipeline failed");
                        CategoryStatus::Failed(e.to_string())
                    }
                };
                CategoryReport { category, status }
            })
            .collect();

        let report = BatchReport { categories };
        info!(
            completed = report.completed().count(),
            failed = report.failed().count(),
            persisted = report.persisted(),
            "Category fan-out finished"
        );
        report
    }

    /// Plans, collects, optionally clusters and synthesizes articles for
    /// `topics`, persisting each finished article.
    ///
    /// Topics are prepared on their own tasks, at most `article_window` at a
    /// time. A topic whose task fails contributes no article.
    pub async fn run_articles(&self, topics: &[DiscoveredTopic], region: &str) -> Vec<SynthesizedArticle> {
        let concurrency = self.config.rate_limit.article_window.max(1);
        let prepared: Vec<_> = stream::iter(topics.iter().cloned())
            .map(|topic| {
                let this = self.clone();
                let region = region.to_string();
                tokio::spawn(async move { this.prepare_topic(&topic, &region).await })
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut jobs = Vec::new();
        for (topic, result) in topics.iter().zip(prepared) {
            match result {
                Ok(topic_jobs) => jobs.extend(topic_jobs),
                Err(e) => error!(topic = %topic.topic, error = %e, "Topic preparation failed"),
            }
        }

        let articles = self
            .synthesizer
            .synthesize_batch(&jobs, self.config.rate_limit.article_window, self.article_limiter.as_ref())
            .await;
        for article in &articles {
            self.persist_article(article).await;
        }

        info!(topics = topics.len(), jobs = jobs.len(), articles = articles.len(), "Article run finished");
        articles
    }

    /// Plans and collects sources for one topic and turns them into jobs:
    /// one per cluster, or a single job over all sources.
    ///
    /// Every job answers `topic.topic`; a cluster only adds its claim as focus.
    async fn prepare_topic(&self, topic: &DiscoveredTopic, region: &str) -> Vec<SynthesisJob> {
        let category = Category::parse_lenient(&topic.category);
        let planned = self.plan(&topic.topic, region, &topic.category).await;
        let sources = self.collector.collect_all(&planned.value, region).await;

        if !self.config.batch.cluster_before_synthesis || sources.is_empty() {
            return vec![SynthesisJob::new(topic.topic.clone(), category).with_sources(sources)];
        }

        let request = ClusterRequest {
            topic: topic.topic.clone(),
            region: region.to_string(),
            category: topic.category.clone(),
            queries: planned.value,
        };
        let clusters = self.clusterer.cluster(&sources, &request).await;

        let mut jobs = Vec::with_capacity(clusters.value.len());
        for cluster in clusters.value {
            if let Err(e) = put(self.store.as_ref(), CLUSTERS_COLLECTION, &cluster.id, &cluster).await {
                warn!(stage = "persist", cluster = %cluster.id, error = %e, "Failed to persist cluster");
            }
            jobs.push(
                SynthesisJob::new(topic.topic.clone(), category)
                    .with_claim(Some(cluster.claim))
                    .with_sources(cluster.items),
            );
        }
        jobs
    }

    async fn plan(&self, topic: &str, region: &str, category: &str) -> Outcome<Vec<String>> {
        let outcome = if self.config.batch.use_function_calling {
            self.planner.plan_with_functions(topic, region, category).await
        } else {
            self.planner.plan(topic, region, category).await
        };
        if outcome.is_fallback() {
            info!(topic, "Using fallback queries");
        }
        outcome
    }

    async fn persist_article(&self, article: &SynthesizedArticle) {
        let key = record_key(&format!("{}|{}", article.title, article.query));
        if let Err(e) = put(self.store.as_ref(), ARTICLES_COLLECTION, &key, article).await {
            warn!(stage = "persist", title = %article.title, error = %e, "Failed to persist article");
        }
    }
}

fn limiter_for(delay: Duration, max_backoff_ms: u64) -> Arc<dyn RateLimiter> {
    if max_backoff_ms > 0 {
        Arc::new(AdaptiveBackoff::new(delay, Duration::from_millis(max_backoff_ms)))
    } else {
        Arc::new(FixedDelay::new(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmRequest, LlmResponse};
    use crate::ratelimit::NoDelay;
    use crate::search::{SearchHit, SearchRequest};
    use crate::store::MemoryStore;
    use crate::testing::{CountingLimiter, InFlight, ScriptedLlm};
    use crate::PipelineError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    /// Two hits per query, one of them shared by every query.
    struct EchoSearch;

    #[async_trait]
    impl SearchProvider for EchoSearch {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
            if request.query.contains("nothing") {
                return Ok(Vec::new());
            }
            if request.query.contains("broken") {
                return Err(PipelineError::SearchError("503".into()));
            }
            let slug = request.query.replace(' ', "-");
            Ok(vec![
                SearchHit {
                    title: format!("{} story", request.query),
                    link: format!("https://news.example.com/{}", slug),
                    ..SearchHit::default()
                },
                SearchHit {
                    title: "shared".to_string(),
                    link: "https://who.int/shared".to_string(),
                    ..SearchHit::default()
                },
            ])
        }
    }

    /// Answers discovery prompts per category; panics for one of them.
    struct CategoryLlm {
        panic_on: &'static str,
    }

    #[async_trait]
    impl LlmClient for CategoryLlm {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
            if request.prompt.contains(&format!("\"{}\" category", self.panic_on)) {
                panic!("provider exploded");
            }
            if request.prompt.contains("trending right now") {
                return Ok(LlmResponse::text(
                    r#"{"topics": [{"topic": "specific event", "category": "x", "priority": 8, "reasoning": "r"}]}"#,
                ));
            }
            Ok(LlmResponse::text(r#"{"queries": ["alpha query", "beta query"]}"#))
        }
    }

    /// Plans, clusters and writes articles; planning panics for one topic.
    struct DeskLlm {
        panic_topic: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    impl DeskLlm {
        fn new(panic_topic: &'static str) -> Self {
            Self {
                panic_topic,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for DeskLlm {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
            let prompt = request.prompt.clone();
            self.prompts.lock().unwrap().push(prompt.clone());

            if prompt.contains("You plan web searches") {
                if prompt.contains(self.panic_topic) {
                    panic!("planner exploded");
                }
                return Ok(LlmResponse::text(r#"{"queries": ["alpha query", "beta query"]}"#));
            }
            if prompt.contains("Group these search results") {
                return Ok(LlmResponse::text(
                    r#"{"clusters": [{"claim": "Kerala starts free shots", "items": [{"url": "https://who.int/shared"}]}]}"#,
                ));
            }
            if prompt.contains("health news editor") {
                let article = json!({
                    "title": "Kerala starts free dengue shots for children",
                    "summary": "word ".repeat(200),
                    "keyInsights": ["free shots"],
                    "sources": [{"name": "WHO", "url": "https://who.int/shared"}]
                });
                return Ok(LlmResponse::text(article.to_string()));
            }
            Ok(LlmResponse::text("no"))
        }
    }

    /// One hit per query after a short delay.
    #[derive(Default)]
    struct SlowSearch {
        in_flight: InFlight,
    }

    #[async_trait]
    impl SearchProvider for SlowSearch {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
            self.in_flight.hold(Duration::from_millis(20)).await;
            Ok(vec![SearchHit {
                title: request.query.clone(),
                link: format!("https://news.example.com/{}", request.query.replace(' ', "-")),
                ..SearchHit::default()
            }])
        }
    }

    fn topic(name: &str) -> DiscoveredTopic {
        DiscoveredTopic {
            topic: name.to_string(),
            category: "infectious_disease".to_string(),
            priority: 7,
            reasoning: String::new(),
        }
    }

    fn query(text: &str) -> Query {
        Query {
            text: text.to_string(),
            category: Category::Research,
            region: None,
            priority: QueryPriority::Medium,
        }
    }

    fn orchestrator(llm: Arc<dyn LlmClient>, store: Arc<MemoryStore>) -> BatchOrchestrator {
        let mut config = PipelineConfig::default();
        config.rate_limit.collection_batch_size = 2;
        BatchOrchestrator::new(llm, Arc::new(EchoSearch), store, config).with_limiter(Arc::new(NoDelay))
    }

    #[tokio::test]
    async fn test_collect_queries_distinguishes_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::new(ScriptedLlm::failing()), store.clone());

        let queries = vec![query("measles"), query("nothing here"), query("broken search")];
        let reports = orchestrator.collect_queries(&queries, "US").await;

        assert_eq!(reports[0].status, QueryStatus::Collected { sources: 2 });
        assert_eq!(reports[1].status, QueryStatus::Empty);
        assert!(matches!(reports[2].status, QueryStatus::Errored(_)));

        // zero-result and failed queries leave no record behind
        assert_eq!(store.len(QUERIES_COLLECTION).await, 1);
        let record = store
            .get(QUERIES_COLLECTION, &record_key("measles"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["sourceCount"], 2);
        assert_eq!(record["synthesized"], false);
    }

    #[tokio::test]
    async fn test_repeated_collection_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::new(ScriptedLlm::failing()), store.clone());

        orchestrator.collect_queries(&[query("measles")], "US").await;
        orchestrator.collect_queries(&[query("measles")], "US").await;
        assert_eq!(store.len(QUERIES_COLLECTION).await, 1);
    }

    #[tokio::test]
    async fn test_category_fan_out_isolates_failures() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(CategoryLlm { panic_on: "nutrition" });
        let orchestrator = orchestrator(llm, store.clone());

        let categories = [Category::Pandemic, Category::Nutrition, Category::Policy];
        let report = orchestrator.collect_categories(&categories, "US").await;

        assert_eq!(report.categories.len(), 3);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.categories[1].category, Category::Nutrition);
        assert!(matches!(report.categories[1].status, CategoryStatus::Failed(_)));

        for index in [0, 2] {
            match &report.categories[index].status {
                CategoryStatus::Completed { topics, queries } => {
                    assert_eq!(*topics, 1);
                    assert_eq!(queries.len(), 2);
                }
                other => panic!("unexpected status {:?}", other),
            }
        }
        // "alpha query" and "beta query" are shared by both categories
        assert_eq!(store.len(QUERIES_COLLECTION).await, 2);
        assert_eq!(report.persisted(), 4);
    }

    #[tokio::test]
    async fn test_empty_discovery_completes_with_nothing() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::new(ScriptedLlm::failing()), store.clone());

        let status = orchestrator.run_category(Category::Fitness, "US").await;
        assert_eq!(
            status,
            CategoryStatus::Completed {
                topics: 0,
                queries: Vec::new()
            }
        );
        assert_eq!(store.len(QUERIES_COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn test_collect_queries_paces_batches() {
        let search = Arc::new(SlowSearch::default());
        let limiter = Arc::new(CountingLimiter::default());
        let mut config = PipelineConfig::default();
        config.rate_limit.collection_batch_size = 2;
        let orchestrator = BatchOrchestrator::new(
            Arc::new(ScriptedLlm::failing()),
            search.clone(),
            Arc::new(MemoryStore::new()),
            config,
        )
        .with_limiter(limiter.clone());

        let queries: Vec<Query> = (0..5).map(|i| query(&format!("query {}", i))).collect();
        let reports = orchestrator.collect_queries(&queries, "US").await;

        assert_eq!(reports.len(), 5);
        assert_eq!(search.in_flight.peak(), 2);
        assert_eq!(limiter.waits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cluster_claim_focuses_article_on_topic() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(DeskLlm::new("never planned"));
        let orchestrator = orchestrator(llm.clone(), store.clone());

        let articles = orchestrator
            .run_articles(&[topic("new dengue vaccine rollout India")], "IN")
            .await;

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].query, "new dengue vaccine rollout India");
        assert_eq!(store.len(CLUSTERS_COLLECTION).await, 1);
        assert_eq!(store.len(ARTICLES_COLLECTION).await, 1);

        let prompts = llm.prompts.lock().unwrap();
        let article_prompt = prompts
            .iter()
            .find(|p| p.contains("health news editor"))
            .unwrap();
        assert!(article_prompt.contains("Topic: new dengue vaccine rollout India\n"));
        assert!(article_prompt.contains("Focus on this specific development: Kerala starts free shots"));
    }

    #[tokio::test]
    async fn test_failed_topic_does_not_sink_the_run() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::new(DeskLlm::new("doomed topic")), store.clone());

        let topics = [topic("doomed topic"), topic("measles outbreak in Texas schools")];
        let articles = orchestrator.run_articles(&topics, "US").await;

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].query, "measles outbreak in Texas schools");
        assert_eq!(store.len(ARTICLES_COLLECTION).await, 1);
    }
}
