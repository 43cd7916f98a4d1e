use crate::extract::extract_json;
use crate::llm::{LlmClient, LlmRequest};
use crate::prompt::discovery_prompt;
use crate::types::{Category, DiscoveredTopic};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Asks the model for trending, specific health topics.
///
/// Failures of any kind produce an empty list: callers treat that as
/// "try again later".
#[derive(Clone)]
pub struct TopicDiscovery {
    llm: Arc<dyn LlmClient>,
}

impl TopicDiscovery {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Discovers topics across every category.
    #[instrument(skip(self))]
    pub async fn discover(&self, region: &str, max_topics: usize) -> Vec<DiscoveredTopic> {
        self.run(discovery_prompt(region, max_topics, None), max_topics).await
    }

    /// Discovers topics for one category.
    #[instrument(skip(self, category), fields(category = %category))]
    pub async fn discover_category(&self, category: Category, region: &str, max_topics: usize) -> Vec<DiscoveredTopic> {
        self.run(discovery_prompt(region, max_topics, Some(category)), max_topics)
            .await
    }

    async fn run(&self, prompt: String, max_topics: usize) -> Vec<DiscoveredTopic> {
        let request = LlmRequest::new(prompt)
            .temperature(0.7)
            .max_output_tokens(2048)
            .with_web_search();

        let response = match self.llm.generate(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(stage = "discovery", error = %e, "Topic discovery call failed");
                return Vec::new();
            }
        };

        let topics = match extract_json(&response.text) {
            Ok(value) => parse_topics(&value, max_topics),
            Err(e) => {
                warn!(stage = "discovery", error = %e, "Could not parse discovery output");
                return Vec::new();
            }
        };

        info!(count = topics.len(), "Topics discovered");
        topics
    }
}

/// Normalizes the `topics` array: trims strings, clamps priority into 1..=10,
/// lower-cases categories, sorts by priority (highest first) and truncates.
pub fn parse_topics(value: &Value, max_topics: usize) -> Vec<DiscoveredTopic> {
    let Some(entries) = value.get("topics").and_then(Value::as_array) else {
        warn!(stage = "discovery", "Discovery output has no topics array");
        return Vec::new();
    };

    let mut topics: Vec<DiscoveredTopic> = entries
        .iter()
        .filter_map(|entry| {
            let topic = entry.get("topic")?.as_str()?.trim().to_string();
            if topic.is_empty() {
                return None;
            }
            Some(DiscoveredTopic {
                topic,
                category: string_field(entry, "category").to_lowercase(),
                priority: priority_field(entry),
                reasoning: string_field(entry, "reasoning"),
            })
        })
        .collect();

    // stable: equal priorities keep model order
    topics.sort_by(|a, b| b.priority.cmp(&a.priority));
    topics.truncate(max_topics);
    topics
}

fn string_field(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn priority_field(entry: &Value) -> u8 {
    let raw = match entry.get("priority") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|p| p.is_finite())
        .map(|p| p.round().clamp(1.0, 10.0) as u8)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Tool;
    use crate::testing::ScriptedLlm;
    use serde_json::json;

    #[test]
    fn test_parse_topics_normalizes() {
        let value = json!({"topics": [
            {"topic": "  Measles outbreak in Texas schools ", "category": "Infectious_Disease", "priority": 14, "reasoning": " rising cases "},
            {"topic": "WHO dengue vaccine prequalification", "category": "MEDICATION", "priority": "7"},
            {"topic": "", "category": "policy", "priority": 9},
            {"topic": "Heatwave admissions in Delhi", "category": "environmental", "priority": -3}
        ]});

        let topics = parse_topics(&value, 10);
        assert_eq!(topics.len(), 3);
        assert_eq!(topics[0].topic, "Measles outbreak in Texas schools");
        assert_eq!(topics[0].priority, 10);
        assert_eq!(topics[0].category, "infectious_disease");
        assert_eq!(topics[0].reasoning, "rising cases");
        assert_eq!(topics[1].priority, 7);
        assert_eq!(topics[2].priority, 1);
    }

    #[test]
    fn test_parse_topics_truncates() {
        let value = json!({"topics": [
            {"topic": "a", "priority": 3},
            {"topic": "b", "priority": 9},
            {"topic": "c", "priority": 5}
        ]});
        let topics = parse_topics(&value, 2);
        let names: Vec<_> = topics.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_non_finite_priority_defaults_to_lowest() {
        let value = json!({"topics": [
            {"topic": "a", "priority": "NaN"},
            {"topic": "b", "priority": "inf"},
            {"topic": "c", "priority": "-infinity"}
        ]});
        let topics = parse_topics(&value, 5);
        assert_eq!(topics.len(), 3);
        assert!(topics.iter().all(|t| t.priority == 1));
    }

    #[test]
    fn test_missing_topics_array() {
        assert!(parse_topics(&json!({"items": []}), 5).is_empty());
    }

    #[tokio::test]
    async fn test_discover_uses_web_search_and_parses_fenced_output() {
        let llm = Arc::new(ScriptedLlm::texts(&[
            "```json\n{\"topics\": [{\"topic\": \"H5N1 found in Ohio dairy herd\", \"category\": \"pandemic\", \"priority\": 9, \"reasoning\": \"new state\"}]}\n```",
        ]));
        let discovery = TopicDiscovery::new(llm.clone());

        let topics = discovery.discover("US", 5).await;
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].category, "pandemic");

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].tools.contains(&Tool::WebSearch));
    }

    #[tokio::test]
    async fn test_discover_failure_is_silent() {
        let discovery = TopicDiscovery::new(Arc::new(ScriptedLlm::failing()));
        assert!(discovery.discover("US", 5).await.is_empty());

        let discovery = TopicDiscovery::new(Arc::new(ScriptedLlm::texts(&["no json here"])));
        assert!(discovery
            .discover_category(Category::Nutrition, "US", 5)
            .await
            .is_empty());
    }
}
