use crate::llm::{LlmClient, LlmRequest, LlmResponse};
use crate::ratelimit::RateLimiter;
use crate::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays canned responses in order and records every prompt it saw.
pub(crate) struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<LlmResponse>>>,
    pub(crate) prompts: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub(crate) fn new(responses: Vec<Result<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(LlmResponse::text(*t))).collect())
    }

    pub(crate) fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.prompts.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::LLMError("script exhausted".into())))
    }
}

/// Counts pacing calls instead of sleeping.
#[derive(Default)]
pub(crate) struct CountingLimiter {
    pub(crate) waits: AtomicUsize,
    pub(crate) throttled: AtomicUsize,
    pub(crate) successes: AtomicUsize,
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    async fn wait(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }

    fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::SeqCst);
    }

    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Highest number of calls seen running at the same time.
#[derive(Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    /// Occupies one slot for `duration`.
    pub(crate) async fn hold(&self, duration: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(duration).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
