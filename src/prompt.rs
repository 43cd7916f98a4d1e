use crate::types::{Category, RawSourceItem};
use chrono::{Datelike, Utc};

/// The `PromptBuilder` struct is responsible for constructing the article synthesis prompt.
/// It combines the query with optional category guidance and source context.
pub struct PromptBuilder {
    /// The topic or question the article is about.
    query: String,
    /// Optional category hint passed by the caller.
    category: Option<Category>,
    /// Sources gathered upstream, cited as context.
    sources: Vec<RawSourceItem>,
    /// One development within the topic the article should center on.
    claim: Option<String>,
}

impl PromptBuilder {
    /// Creates a new `PromptBuilder` with the given query.
    ///
    /// # Arguments
    ///
    /// * `query` - The topic the article is about, used verbatim in the prompt.
    ///
    /// # Returns
    ///
    /// A new `PromptBuilder` with no category, sources or claim.
    pub fn new(query: String) -> Self {
        Self {
            query,
            category: None,
            sources: Vec::new(),
            claim: None,
        }
    }

    /// Sets the expected primary category.
    ///
    /// # Arguments
    ///
    /// * `category` - The category hint, or `None` to let the model choose.
    ///
    /// # Returns
    ///
    /// The updated `PromptBuilder`.
    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    /// Narrows the article to one claim within the topic.
    ///
    /// # Arguments
    ///
    /// * `claim` - The development to center on; blank claims are ignored.
    ///
    /// # Returns
    ///
    /// The updated `PromptBuilder`.
    pub fn with_claim(mut self, claim: Option<String>) -> Self {
        self.claim = claim.filter(|c| !c.trim().is_empty());
        self
    }

    /// Adds the given sources to the `PromptBuilder`.
    ///
    /// # Arguments
    ///
    /// * `sources` - Collected source items, listed in order as numbered context.
    ///
    /// # Returns
    ///
    /// The updated `PromptBuilder`.
    pub fn with_sources(mut self, sources: Vec<RawSourceItem>) -> Self {
        self.sources = sources;
        self
    }

    /// Builds the synthesis prompt.
    pub fn build(&self) -> String {
        let categories = category_list();
        let category_hint = match self.category {
            Some(c) => format!("The expected primary category is \"{}\".\n", c),
            None => String::new(),
        };
        let focus = match &self.claim {
            Some(claim) => format!("Focus on this specific development: {}\n", claim.trim()),
            None => String::new(),
        };

        let context = if self.sources.is_empty() {
            String::new()
        } else {
            let formatted = self
                .sources
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    Self::clean_text(&format!(
                        "[{}] {}\nURL: {}\nPublished: {}\n{}\n",
                        i + 1,
                        s.title,
                        s.url,
                        s.published_at.as_deref().unwrap_or("unknown"),
                        s.snippet.as_deref().unwrap_or("")
                    ))
                })
                .collect::<Vec<_>>()
                .join("\n---\n");
            format!("\nSources already collected (verify and extend with search):\n{}\n", formatted)
        };

        format!(
            r#"You are a health news editor. Use web search to research the topic below and write one factual, news-style article.

Topic: {query}
{focus}{category_hint}{context}
Requirements:
- "title": a specific headline of 10-15 words.
- "summary": 3-4 paragraphs, 250-350 words in total, separated by blank lines.
- "keyInsights": 5-7 short, concrete takeaways.
- "category": exactly one of: {categories}.
- "tags": 3-5 values drawn from the same list.
- "urgency": one of "low", "medium", "high", "critical".
- "locationRelevance": "global", "country:XX" (ISO country code) or "city:Name".
- "sources": 3-15 objects with "name", "url" and "domain" for every source you relied on.

Respond ONLY with a JSON object containing exactly these fields."#,
            query = self.query.trim(),
        )
    }

    /// Cleans the given text by removing blank lines and normalizing whitespace.
    fn clean_text(text: &str) -> String {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split_whitespace().collect::<Vec<&str>>().join(" "))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Topic discovery across every category, or just one when `category` is set.
pub fn discovery_prompt(region: &str, max_topics: usize, category: Option<Category>) -> String {
    let today = Utc::now().format("%B %d, %Y");
    let scope = match category {
        Some(c) => format!(
            "Focus only on the \"{}\" category ({}). Good examples for this category: {}.",
            c,
            c.label(),
            category_examples(c).join("; ")
        ),
        None => format!("Cover these categories: {}.", category_list()),
    };

    format!(
        r#"Today is {today}. Search the web for health news that is trending right now in region "{region}".
{scope}

Name SPECIFIC, dated events, never generic subjects.
GOOD: "WHO prequalifies second dengue vaccine (May 2025)", "FDA approves first RSV shot for infants under 8 months"
BAD: "dengue", "vaccines", "mental health"

Return up to {max_topics} topics as JSON:
{{"topics": [{{"topic": "...", "category": "one category value", "priority": 1-10, "reasoning": "why it matters now"}}]}}
Respond ONLY with JSON."#
    )
}

fn category_examples(category: Category) -> &'static [&'static str] {
    match category {
        Category::Pandemic => &["H5N1 detected in dairy herds in a new state", "WHO pandemic agreement vote"],
        Category::InfectiousDisease => &["Dengue cases surge after monsoon in Kerala", "Measles outbreak closes schools in Texas"],
        Category::ChronicDisease => &["New ADA guidance on GLP-1 drugs for type 2 diabetes"],
        Category::MentalHealth => &["988 crisis line adds text support in Spanish"],
        Category::Nutrition => &["FDA finalizes front-of-package nutrition labels"],
        Category::Fitness => &["Study links 4,000 daily steps to lower mortality"],
        Category::MaternalChild => &["RSV maternal vaccine uptake report for 2025"],
        Category::Medication => &["Generic semaglutide shortage ends in the US"],
        Category::Research => &["Phase 3 results for lecanemab subcutaneous dosing"],
        Category::Policy => &["Medicare drug price negotiation list for 2027"],
        Category::Environmental => &["Heatwave hospital admissions in Delhi"],
        Category::Emergency => &["Cholera response after flooding in Mozambique"],
        Category::GeneralHealth => &["CDC updates adult immunization schedule"],
    }
}

/// Subquery planning prompt for the direct JSON path.
pub fn planner_prompt(topic: &str, region: &str, category: &str, max_queries: usize) -> String {
    let year = Utc::now().year();
    format!(
        r#"You plan web searches for a health news desk.
Topic: "{topic}"
Region: {region}
Category: {category}

Write 3-{max_queries} search queries a person would actually type to find the latest reporting on this topic.
Each query must be concrete, mention the key entity, and prefer recent coverage ({year}).

Respond ONLY with JSON: {{"queries": ["...", "..."]}}"#
    )
}

/// Subquery planning prompt for the function-calling path.
pub fn planner_function_prompt(topic: &str, region: &str, category: &str, max_queries: usize) -> String {
    format!(
        r#"Research the health topic "{topic}" ({category}, region {region}).
Call the web_search function once for each distinct search you would run, between 3 and {max_queries} calls.
Use natural, specific queries; do not answer the question yourself."#
    )
}

/// Claim clustering prompt over a flat source list.
pub fn cluster_prompt(sources: &[RawSourceItem], topic: &str, region: &str, category: &str) -> String {
    let listing = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{}. {} | {} | {} | {}",
                i + 1,
                s.title,
                s.url,
                s.domain,
                s.published_at.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Group these search results about "{topic}" ({category}, region {region}) into 3-7 clusters.
Each cluster is ONE concrete claim: a specific event or finding reported by its sources, at most 120 characters.
Do not use broad themes as claims. Every cluster lists at least one of the sources below.

Sources:
{listing}

Respond ONLY with JSON:
{{"clusters": [{{"claim": "...", "items": [{{"title": "...", "url": "...", "domain": "...", "publishedAt": "..."}}]}}]}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RawSourceItem {
        RawSourceItem {
            title: "Dengue vaccine rollout begins".to_string(),
            url: "https://example.com/dengue".to_string(),
            snippet: Some("   The   rollout\n\n starts in Delhi".to_string()),
            domain: "example.com".to_string(),
            published_at: None,
        }
    }

    /// Tests the `PromptBuilder` functionality.
    #[test]
    fn test_prompt_builder() {
        let prompt = PromptBuilder::new("new dengue vaccine rollout India".to_string())
            .with_category(Some(Category::Pandemic))
            .with_sources(vec![source()])
            .build();

        assert!(prompt.contains("new dengue vaccine rollout India"));
        assert!(prompt.contains("https://example.com/dengue"));
        assert!(prompt.contains("The rollout\nstarts in Delhi"));
        assert!(prompt.contains("\"pandemic\""));
        assert!(prompt.contains("country:XX"));
        assert!(!prompt.contains("Focus on this specific development"));
    }

    #[test]
    fn test_claim_focus_keeps_topic_line() {
        let topic = "new dengue vaccine rollout India";
        let prompt = PromptBuilder::new(topic.to_string())
            .with_claim(Some("Kerala starts free shots for children".to_string()))
            .build();

        assert!(prompt.contains(&format!("Topic: {}\n", topic)));
        assert!(prompt.contains("Focus on this specific development: Kerala starts free shots for children"));

        let blank = PromptBuilder::new(topic.to_string())
            .with_claim(Some("   ".to_string()))
            .build();
        assert!(!blank.contains("Focus on this specific development"));
    }

    #[test]
    fn test_discovery_prompt_scoped_to_category() {
        let prompt = discovery_prompt("IN", 8, Some(Category::InfectiousDisease));
        assert!(prompt.contains("\"IN\""));
        assert!(prompt.contains("Dengue cases surge"));
        assert!(prompt.contains("up to 8 topics"));
    }

    #[test]
    fn test_cluster_prompt_lists_sources() {
        let prompt = cluster_prompt(&[source()], "dengue", "IN", "pandemic");
        assert!(prompt.contains("1. Dengue vaccine rollout begins | https://example.com/dengue"));
    }
}
