use std::time::Duration;
use thiserror::Error;

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod planner;
pub mod prompt;
pub mod querygen;
pub mod ratelimit;
pub mod search;
pub mod session;
pub mod store;
pub mod synthesize;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use normalize::extract_domain;
pub use types::{
    Category, DiscoveredTopic, Outcome, OutcomeKind, Query, RawSourceItem, SourceCluster,
    SynthesizedArticle,
};

/// The `PipelineError` enum represents the errors that can occur while running the pipeline.
///
/// Most of these never leave the component that produced them: each stage converts
/// its own failures into an empty or fallback result.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Represents an error that occurs during an HTTP request.
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// The upstream provider answered with 429.
    #[error("Rate limit exceeded")]
    RateLimitError,
    /// A provider credential is not configured.
    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),
    /// Represents an error that occurs during LLM processing.
    #[error("LLM processing failed: {0}")]
    LLMError(String),
    /// The provider answered with a non-success HTTP status.
    #[error("Provider returned {status}: {body}")]
    ApiError {
        status: reqwest::StatusCode,
        body: String,
    },
    /// Represents an error that occurs during a search operation.
    #[error("Search failed: {0}")]
    SearchError(String),
    /// The document store rejected a read or write.
    #[error("Store operation failed: {0}")]
    StoreError(String),
    /// Configuration could not be assembled.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A type alias for `Result` with the `PipelineError` error type.
pub type Result<T> = std::result::Result<T, PipelineError>;

// Constants

/// The default timeout for LLM requests.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);
/// The timeout applied to every search API call.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
/// The default number of concurrent search requests.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 5;
/// The default maximum number of retries for transient LLM failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Upper bound on results requested per search query.
pub const MAX_RESULTS_PER_QUERY: usize = 10;
