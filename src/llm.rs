use crate::config::LLMConfig;
use crate::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// A tool made available to the model for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Tool {
    /// Ground the answer in live web search results.
    WebSearch,
    /// Let the model request calls to the declared functions.
    Functions(Vec<FunctionDeclaration>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A single completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub tools: Vec<Tool>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.4,
            max_output_tokens: 2048,
            tools: Vec::new(),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.tools.push(Tool::WebSearch);
        self
    }

    pub fn with_functions(mut self, functions: Vec<FunctionDeclaration>) -> Self {
        self.tools.push(Tool::Functions(functions));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }
}

/// The seam every LLM-consuming stage goes through.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

// --- Gemini wire format ---

#[derive(Serialize, Deserialize, Debug, Default)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiRequest {
    fn from_request(request: &LlmRequest) -> Self {
        let tools = request
            .tools
            .iter()
            .map(|tool| match tool {
                Tool::WebSearch => serde_json::json!({ "google_search": {} }),
                Tool::Functions(functions) => {
                    serde_json::json!({ "functionDeclarations": functions })
                }
            })
            .collect();

        Self {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(request.prompt.clone()),
                    function_call: None,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
            tools,
        }
    }
}

/// The `GeminiClient` talks to the `generateContent` REST endpoint.
pub struct GeminiClient {
    client: Client,
    config: LLMConfig,
}

impl GeminiClient {
    /// Creates a new `GeminiClient` instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, model, key, timeout and retry settings.
    ///
    /// # Returns
    ///
    /// A `Result` containing the client, or an error if the HTTP client cannot be built.
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self { client, config })
    }

    /// Attempts a single call without retrying.
    async fn try_generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        // The API key travels in the query string; never log this URL.
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model,
            urlencoding::encode(&self.config.api_key)
        );

        let response = self
            .client
            .post(&url)
            .json(&GeminiRequest::from_request(request))
            .send()
            .await?;

        let status = response.status();
        debug!(status = %status, "Gemini API response received");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimitError);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::ApiError { status, body });
        }

        let body: GeminiResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(PipelineError::LLMError(error.message));
        }

        let candidate = body
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| PipelineError::LLMError("No content returned from Gemini".into()))?;

        let mut text = String::new();
        let mut function_calls = Vec::new();
        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                function_calls.push(call);
            }
        }

        Ok(LlmResponse {
            text,
            function_calls,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    /// Calls Gemini, retrying transient failures with exponential delay.
    #[instrument(skip(self, request), fields(model = %self.config.model, prompt_len = request.prompt.len()))]
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if self.config.api_key.trim().is_empty() {
            return Err(PipelineError::MissingCredentials("GEMINI_API_KEY"));
        }

        let mut retries = 0;
        loop {
            match self.try_generate(request).await {
                Ok(response) => return Ok(response),
                Err(e) if is_transient(&e) && retries < self.config.max_retries => {
                    retries += 1;
                    let delay = Duration::from_secs(2u64.pow(retries));
                    warn!(error = %e, attempt = retries, "Transient Gemini error, retrying");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(error: &PipelineError) -> bool {
    match error {
        PipelineError::RateLimitError => true,
        PipelineError::RequestError(e) => e.is_timeout() || e.is_connect(),
        PipelineError::ApiError { status, .. } => status.is_server_error(),
        _ => false,
    }
}
