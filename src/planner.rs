use crate::extract::extract_json;
use crate::llm::{FunctionDeclaration, LlmClient, LlmRequest};
use crate::normalize::collapse_whitespace;
use crate::prompt::{planner_function_prompt, planner_prompt};
use crate::types::Outcome;
use chrono::{Datelike, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Hard ceiling on planned queries per topic.
pub const MAX_QUERIES: usize = 5;
const MIN_QUERIES: usize = 3;

pub const WEB_SEARCH_FUNCTION: &str = "web_search";

/// Expands one topic into a handful of concrete search queries.
///
/// Both planning paths end in [`fallback_queries`] when the model gives
/// nothing usable, so a plan is never empty.
#[derive(Clone)]
pub struct SubqueryPlanner {
    llm: Arc<dyn LlmClient>,
    max_queries: usize,
}

impl SubqueryPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_queries: MAX_QUERIES,
        }
    }

    /// Sets the planned-query limit; values above 5 are capped.
    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries.clamp(1, MAX_QUERIES);
        self
    }

    /// Plans queries by asking for a JSON `{"queries": [...]}` object.
    #[instrument(skip(self))]
    pub async fn plan(&self, topic: &str, region: &str, category: &str) -> Outcome<Vec<String>> {
        let request = LlmRequest::new(planner_prompt(topic, region, category, self.max_queries))
            .temperature(0.3)
            .max_output_tokens(512);

        let text = match self.llm.generate(&request).await {
            Ok(response) => response.text,
            Err(e) => {
                warn!(stage = "planner", topic, error = %e, "Planner call failed, using fallback queries");
                return Outcome::fallback(self.fallback(topic, region, category));
            }
        };

        let queries = match extract_json(&text) {
            Ok(value) => parse_queries(&value),
            Err(e) => {
                warn!(stage = "planner", topic, error = %e, "Planner output unparseable, using fallback queries");
                Vec::new()
            }
        };

        let queries = self.cap(queries);
        if queries.is_empty() {
            return Outcome::fallback(self.fallback(topic, region, category));
        }
        debug!(count = queries.len(), "Planned queries");
        Outcome::llm(queries)
    }

    /// Plans queries by letting the model call a declared `web_search` tool
    /// once per query. Short plans are topped up from [`Self::plan`].
    #[instrument(skip(self))]
    pub async fn plan_with_functions(&self, topic: &str, region: &str, category: &str) -> Outcome<Vec<String>> {
        let request = LlmRequest::new(planner_function_prompt(topic, region, category, self.max_queries))
            .temperature(0.3)
            .max_output_tokens(512)
            .with_functions(vec![web_search_declaration()]);

        let mut queries = match self.llm.generate(&request).await {
            Ok(response) => {
                let mut planned = Vec::new();
                for call in response.function_calls.iter().filter(|c| c.name == WEB_SEARCH_FUNCTION) {
                    if let Some(query) = call.args.get("query").and_then(Value::as_str) {
                        push_unique(&mut planned, query);
                    }
                }
                planned
            }
            Err(e) => {
                warn!(stage = "planner", topic, error = %e, "Function-calling planner failed");
                Vec::new()
            }
        };

        let from_model = !queries.is_empty();
        if queries.len() < MIN_QUERIES.min(self.max_queries) {
            debug!(have = queries.len(), "Topping up function-call plan");
            let top_up = self.plan(topic, region, category).await;
            for query in &top_up.value {
                push_unique(&mut queries, query);
            }
            if !from_model {
                return Outcome {
                    kind: top_up.kind,
                    value: self.cap(queries),
                };
            }
        }

        Outcome::llm(self.cap(queries))
    }

    fn cap(&self, mut queries: Vec<String>) -> Vec<String> {
        queries.truncate(self.max_queries.min(MAX_QUERIES));
        queries
    }

    fn fallback(&self, topic: &str, region: &str, category: &str) -> Vec<String> {
        self.cap(fallback_queries(topic, region, category))
    }
}

/// Deterministic queries used when the model gives nothing usable.
///
/// Never empty, even for an empty topic.
pub fn fallback_queries(topic: &str, region: &str, category: &str) -> Vec<String> {
    let year = Utc::now().year();
    let topic = if topic.trim().is_empty() { category } else { topic };
    let candidates = [
        format!("latest {} updates {} {}", topic, region, year),
        format!("{} news {}", topic, year),
        format!("{} {} health officials", topic, region),
        format!("{} research findings {}", topic, year),
        format!("{} {} guidance", topic, category),
    ];

    let mut queries = Vec::new();
    for candidate in &candidates {
        push_unique(&mut queries, candidate);
    }
    if queries.is_empty() {
        queries.push(format!("health news {}", year));
    }
    queries
}

/// The `web_search(query, maxResults, region, language)` tool declaration.
pub fn web_search_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: WEB_SEARCH_FUNCTION.to_string(),
        description: "Search the web for recent reporting on a health topic.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "maxResults": {"type": "integer", "description": "Results to fetch, at most 10"},
                "region": {"type": "string", "description": "Region code, e.g. US or IN"},
                "language": {"type": "string", "description": "Language code, e.g. en"}
            },
            "required": ["query"]
        }),
    }
}

fn parse_queries(value: &Value) -> Vec<String> {
    let mut queries = Vec::new();
    if let Some(items) = value.get("queries").and_then(Value::as_array) {
        for item in items.iter().filter_map(Value::as_str) {
            push_unique(&mut queries, item);
        }
    }
    queries
}

/// Appends a whitespace-normalized query unless it is empty or already present.
fn push_unique(queries: &mut Vec<String>, candidate: &str) {
    let normalized = collapse_whitespace(candidate);
    if !normalized.is_empty() && !queries.contains(&normalized) {
        queries.push(normalized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FunctionCall, LlmResponse, Tool};
    use crate::testing::ScriptedLlm;
    use crate::types::OutcomeKind;

    fn call(query: &str) -> FunctionCall {
        FunctionCall {
            name: WEB_SEARCH_FUNCTION.to_string(),
            args: json!({"query": query, "maxResults": 10}),
        }
    }

    #[tokio::test]
    async fn test_plan_parses_model_queries() {
        let llm = Arc::new(ScriptedLlm::texts(&[
            "```json\n{\"queries\": [\"dengue vaccine India 2025\", \"  Qdenga rollout   Kerala \", \"dengue vaccine India 2025\"]}\n```",
        ]));
        let planner = SubqueryPlanner::new(llm);

        let outcome = planner.plan("dengue vaccine", "IN", "infectious_disease").await;
        assert_eq!(outcome.kind, OutcomeKind::Llm);
        assert_eq!(outcome.value, vec!["dengue vaccine India 2025", "Qdenga rollout Kerala"]);
    }

    #[tokio::test]
    async fn test_plan_caps_at_five() {
        let llm = Arc::new(ScriptedLlm::texts(&[
            r#"{"queries": ["a", "b", "c", "d", "e", "f", "g"]}"#,
        ]));
        let outcome = SubqueryPlanner::new(llm).with_max_queries(9).plan("t", "US", "policy").await;
        assert_eq!(outcome.value.len(), 5);
    }

    #[tokio::test]
    async fn test_plan_falls_back_on_garbage() {
        let llm = Arc::new(ScriptedLlm::texts(&["I cannot help with that."]));
        let outcome = SubqueryPlanner::new(llm).plan("measles outbreak", "US", "infectious_disease").await;

        assert!(outcome.is_fallback());
        assert!(!outcome.value.is_empty());
        assert!(outcome.value[0].starts_with("latest measles outbreak updates US"));
    }

    #[tokio::test]
    async fn test_plan_falls_back_on_empty_query_list() {
        let llm = Arc::new(ScriptedLlm::texts(&[r#"{"queries": []}"#]));
        let outcome = SubqueryPlanner::new(llm).plan("heatwave", "IN", "environmental").await;
        assert!(outcome.is_fallback());
        assert!(!outcome.value.is_empty());
    }

    #[tokio::test]
    async fn test_function_calls_are_collected() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(LlmResponse {
            text: String::new(),
            function_calls: vec![call("q1"), call("q2"), call("q3"), call("q4")],
        })]));
        let planner = SubqueryPlanner::new(llm.clone());

        let outcome = planner.plan_with_functions("topic", "US", "research").await;
        assert_eq!(outcome.kind, OutcomeKind::Llm);
        assert_eq!(outcome.value, vec!["q1", "q2", "q3", "q4"]);
        assert_eq!(llm.calls(), 1);

        let prompts = llm.prompts.lock().unwrap();
        match &prompts[0].tools[0] {
            Tool::Functions(functions) => assert_eq!(functions[0].name, "web_search"),
            other => panic!("unexpected tool {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_function_calls_topped_up_from_direct_plan() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(LlmResponse {
                text: String::new(),
                function_calls: vec![call("q1")],
            }),
            Ok(LlmResponse::text(r#"{"queries": ["q1", "q2", "q3"]}"#)),
        ]));

        let outcome = SubqueryPlanner::new(llm.clone())
            .plan_with_functions("topic", "US", "research")
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Llm);
        assert_eq!(outcome.value, vec!["q1", "q2", "q3"]);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_both_paths_empty_still_returns_queries() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(LlmResponse::default()),
            Ok(LlmResponse::text(r#"{"queries": []}"#)),
        ]));

        let outcome = SubqueryPlanner::new(llm)
            .plan_with_functions("new dengue vaccine rollout India", "IN", "health")
            .await;
        assert!(outcome.is_fallback());
        assert!(!outcome.value.is_empty());
        assert!(outcome.value.iter().all(|q| q.contains("dengue")));
    }

    #[test]
    fn test_fallback_queries_never_empty() {
        assert!(!fallback_queries("", "", "").is_empty());
        let queries = fallback_queries("bird flu", "US", "pandemic");
        assert_eq!(queries.len(), 5);
        assert!(queries[0].contains(&Utc::now().year().to_string()));
    }
}
