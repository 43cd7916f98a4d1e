use crate::{PipelineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The `PipelineConfig` struct holds the configuration settings for a pipeline run.
/// It includes the LLM and search provider settings, rate limiting and batch sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// The user agent string to be used in HTTP requests.
    pub user_agent: String,
    /// The configuration settings for the Language Model (LLM).
    pub llm_config: LLMConfig,
    /// The configuration settings for the web search API.
    pub search: SearchConfig,
    /// The rate limit settings for batched stages.
    pub rate_limit: RateLimit,
    /// Sizing of the orchestrated batch stages.
    pub batch: BatchConfig,
}

/// The `LLMConfig` struct holds the configuration settings for the Language Model (LLM).
/// It includes the endpoint URL, model, temperature, and maximum number of tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    /// Base URL of the generative language API.
    pub endpoint: String,
    /// The model name used for every call.
    pub model: String,
    /// API key; empty means "not configured".
    pub api_key: String,
    /// The temperature setting for the LLM, controlling the randomness of the output.
    pub temperature: f32,
    /// The maximum number of tokens allowed in the LLM response.
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// The maximum number of retries for transient failures.
    pub max_retries: u32,
}

/// Settings for the search API used by the source collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Programmable search engine id (`cx`).
    pub engine_id: String,
    pub timeout_secs: u64,
    /// Results requested per query, capped at 10.
    pub max_results: usize,
    pub language: String,
    /// The number of concurrent search requests.
    pub concurrent_requests: usize,
}

/// The `RateLimit` struct holds the pacing settings for batched stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Articles synthesized concurrently per window.
    pub article_window: usize,
    /// Pause between article windows.
    pub article_delay_ms: u64,
    /// Queries searched per collection batch.
    pub collection_batch_size: usize,
    /// Pause between collection batches.
    pub collection_delay_ms: u64,
    /// Ceiling for adaptive backoff; 0 keeps a fixed delay.
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Topics requested from discovery for each category.
    pub topics_per_category: usize,
    /// Upper bound on planned queries per topic.
    pub max_planned_queries: usize,
    /// Plan queries through function calling instead of a JSON prompt.
    pub use_function_calling: bool,
    /// Group sources into claim clusters before synthesis.
    pub cluster_before_synthesis: bool,
    pub region: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: String::from("Mozilla/5.0 (compatible; PulseBot/1.0)"),
            llm_config: LLMConfig::default(),
            search: SearchConfig::default(),
            rate_limit: RateLimit::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://generativelanguage.googleapis.com"),
            model: String::from("gemini-2.0-flash"),
            api_key: String::new(),
            temperature: 0.4,
            max_tokens: 4096,
            timeout_secs: crate::DEFAULT_LLM_TIMEOUT.as_secs(),
            max_retries: crate::DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://www.googleapis.com/customsearch/v1"),
            api_key: String::new(),
            engine_id: String::new(),
            timeout_secs: crate::DEFAULT_SEARCH_TIMEOUT.as_secs(),
            max_results: crate::MAX_RESULTS_PER_QUERY,
            language: String::from("en"),
            concurrent_requests: crate::DEFAULT_CONCURRENT_REQUESTS,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            article_window: 5,
            article_delay_ms: 2000,
            collection_batch_size: 10,
            collection_delay_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            topics_per_category: 5,
            max_planned_queries: 5,
            use_function_calling: false,
            cluster_before_synthesis: true,
            region: String::from("US"),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from defaults, an optional TOML file and `PULSE_*`
    /// environment variables, in that order of precedence.
    ///
    /// Provider keys left empty are filled from `GEMINI_API_KEY`,
    /// `GOOGLE_SEARCH_API_KEY` and `GOOGLE_SEARCH_ENGINE_ID`.
    ///
    /// # Arguments
    ///
    /// * `path` - An optional TOML file; a missing file is skipped.
    ///
    /// # Returns
    ///
    /// A `Result` containing the merged configuration, or `ConfigError`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&PipelineConfig::default())
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("PULSE").separator("__"));

        let mut config: PipelineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;

        config.fill_credentials_from_env();
        Ok(config)
    }

    fn fill_credentials_from_env(&mut self) {
        fill_from_env(&mut self.llm_config.api_key, "GEMINI_API_KEY");
        fill_from_env(&mut self.search.api_key, "GOOGLE_SEARCH_API_KEY");
        fill_from_env(&mut self.search.engine_id, "GOOGLE_SEARCH_ENGINE_ID");
    }

    pub fn article_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit.article_delay_ms)
    }

    pub fn collection_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit.collection_delay_ms)
    }
}

fn fill_from_env(slot: &mut String, var: &str) {
    if slot.is_empty() {
        if let Ok(value) = std::env::var(var) {
            *slot = value.trim().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.search.timeout_secs, 10);
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.rate_limit.article_window, 5);
        assert_eq!(config.rate_limit.collection_batch_size, 10);
        assert_eq!(config.article_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("pulse-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[llm_config]\nmodel = \"gemini-test\"\n\n[batch]\nregion = \"IN\"").unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.llm_config.model, "gemini-test");
        assert_eq!(config.batch.region, "IN");
        // untouched keys keep their defaults
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("pulse-config-does-not-exist.toml");
        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rate_limit.article_window, 5);
    }

    #[test]
    fn test_manifest_include_names_existing_files() {
        let manifest = Config::builder()
            .add_source(File::from_str(include_str!("../Cargo.toml"), config::FileFormat::Toml))
            .build()
            .unwrap();
        let include: Vec<String> = manifest.get("package.include").unwrap();

        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        for entry in include.iter().filter(|e| !e.contains('*')) {
            assert!(root.join(entry).exists(), "{} is listed but missing", entry);
        }
    }
}
