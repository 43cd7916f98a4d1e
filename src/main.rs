use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use pulse_pipeline::{
    discovery::TopicDiscovery,
    llm::GeminiClient,
    orchestrator::{BatchOrchestrator, CategoryStatus},
    querygen::generate_balanced_queries,
    store::{JsonDirStore, MemoryStore},
    Category, DiscoveredTopic, PipelineConfig,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

const USAGE: &str = "usage: pulse <queries [count] | discover [region] [max] | collect [region] [store-dir] | article <topic> [region] [category]>";

fn spinner(message: String) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    Ok(pb)
}

/// Entry point of the `pulse` CLI.
///
/// Configuration comes from `pulse.toml` in the working directory (when
/// present) and `PULSE__*` environment variables.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PipelineConfig::load(Some(Path::new("pulse.toml"))).context("loading configuration")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg = |i: usize| args.get(i).cloned();
    let start_time = Instant::now();

    match args.first().map(String::as_str) {
        Some("queries") => {
            let count = arg(1).map(|c| c.parse()).transpose().context("count must be a number")?.unwrap_or(50);
            for query in generate_balanced_queries(count, &mut rand::rng()) {
                println!("[{}] [{:?}] {}", query.category, query.priority, query.text);
            }
        }
        Some("discover") => {
            let region = arg(1).unwrap_or_else(|| config.batch.region.clone());
            let max = arg(2).map(|m| m.parse()).transpose().context("max must be a number")?.unwrap_or(10);
            let llm = Arc::new(GeminiClient::new(config.llm_config.clone())?);

            let pb = spinner(format!("Discovering topics for {}...", region))?;
            let topics = TopicDiscovery::new(llm).discover(&region, max).await;
            pb.finish_with_message(format!("Found {} topics", topics.len()));

            for topic in topics {
                println!("{:>2}  {:<20} {}", topic.priority, topic.category, topic.topic);
            }
        }
        Some("collect") => {
            let region = arg(1).unwrap_or_else(|| config.batch.region.clone());
            let dir = arg(2).unwrap_or_else(|| "pulse-data".to_string());
            let store = Arc::new(JsonDirStore::new(&dir));
            let orchestrator = BatchOrchestrator::from_config(config, store)?;

            let pb = spinner(format!("Collecting {} categories for {}...", Category::ALL.len(), region))?;
            let report = orchestrator.collect_categories(&Category::ALL, &region).await;
            pb.finish_with_message(format!(
                "Completed: {} of {} categories, {} queries persisted to {}",
                report.completed().count(),
                report.categories.len(),
                report.persisted(),
                dir
            ));

            for category in report.failed() {
                if let CategoryStatus::Failed(reason) = &category.status {
                    error!(category = %category.category, %reason, "Category failed");
                }
            }
        }
        Some("article") => {
            let Some(topic) = arg(1) else { bail!(USAGE) };
            let region = arg(2).unwrap_or_else(|| config.batch.region.clone());
            let category = arg(3).unwrap_or_else(|| Category::GeneralHealth.to_string());
            let orchestrator = BatchOrchestrator::from_config(config, Arc::new(MemoryStore::new()))?;

            let pb = spinner(format!("Writing article on '{}'...", topic))?;
            let request = DiscoveredTopic {
                topic,
                category,
                priority: 5,
                reasoning: String::new(),
            };
            let articles = orchestrator.run_articles(&[request], &region).await;
            pb.finish_with_message(format!("Produced {} articles", articles.len()));

            if articles.is_empty() {
                error!("No article could be produced, try again later");
            }
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }
        _ => bail!(USAGE),
    }

    info!("Finished in {:.2?}", start_time.elapsed());
    Ok(())
}
