use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The fixed vocabulary of health categories used for queries and articles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    GeneralHealth,
    Pandemic,
    InfectiousDisease,
    ChronicDisease,
    MentalHealth,
    Nutrition,
    Fitness,
    MaternalChild,
    Medication,
    Research,
    Policy,
    Environmental,
    Emergency,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::GeneralHealth,
        Category::Pandemic,
        Category::InfectiousDisease,
        Category::ChronicDisease,
        Category::MentalHealth,
        Category::Nutrition,
        Category::Fitness,
        Category::MaternalChild,
        Category::Medication,
        Category::Research,
        Category::Policy,
        Category::Environmental,
        Category::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::GeneralHealth => "general_health",
            Category::Pandemic => "pandemic",
            Category::InfectiousDisease => "infectious_disease",
            Category::ChronicDisease => "chronic_disease",
            Category::MentalHealth => "mental_health",
            Category::Nutrition => "nutrition",
            Category::Fitness => "fitness",
            Category::MaternalChild => "maternal_child",
            Category::Medication => "medication",
            Category::Research => "research",
            Category::Policy => "policy",
            Category::Environmental => "environmental",
            Category::Emergency => "emergency",
        }
    }

    /// Human readable label used inside prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Category::GeneralHealth => "general health",
            Category::Pandemic => "pandemics and outbreaks",
            Category::InfectiousDisease => "infectious disease",
            Category::ChronicDisease => "chronic disease",
            Category::MentalHealth => "mental health",
            Category::Nutrition => "nutrition and diet",
            Category::Fitness => "fitness and exercise",
            Category::MaternalChild => "maternal and child health",
            Category::Medication => "medications and vaccines",
            Category::Research => "medical research",
            Category::Policy => "health policy",
            Category::Environmental => "environmental health",
            Category::Emergency => "health emergencies",
        }
    }

    /// Accepts model spellings such as `"Mental Health"` or `"mental-health"`.
    pub fn parse_lenient(raw: &str) -> Option<Category> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::parse_lenient(s).ok_or_else(|| format!("unknown category '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPriority {
    High,
    Medium,
    Low,
}

impl QueryPriority {
    /// Maps a 1..=10 topic priority onto the three query buckets.
    pub fn from_score(score: u8) -> Self {
        match score {
            8..=u8::MAX => QueryPriority::High,
            5..=7 => QueryPriority::Medium,
            _ => QueryPriority::Low,
        }
    }
}

/// A search query ready to be sent to the search API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub priority: QueryPriority,
}

/// A trending topic proposed by the discovery model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTopic {
    pub topic: String,
    pub category: String,
    pub priority: u8,
    pub reasoning: String,
}

/// One normalized search result. `url` is the dedup key within a collection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSourceItem {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// A group of sources corroborating one concrete claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCluster {
    pub id: String,
    pub claim: String,
    pub category: String,
    pub region: String,
    pub items: Vec<RawSourceItem>,
    pub created_at: DateTime<Utc>,
    /// Advisory; eviction belongs to the store.
    pub expire_at: DateTime<Utc>,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub name: String,
    pub url: String,
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn parse_lenient(raw: &str) -> Option<Urgency> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(Urgency::Low),
            "medium" => Some(Urgency::Medium),
            "high" => Some(Urgency::High),
            "critical" => Some(Urgency::Critical),
            _ => None,
        }
    }
}

/// Where an article matters: `global`, `country:XX` or `city:Name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationRelevance {
    Global,
    Country(String),
    City(String),
}

impl fmt::Display for LocationRelevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationRelevance::Global => f.write_str("global"),
            LocationRelevance::Country(code) => write!(f, "country:{}", code),
            LocationRelevance::City(name) => write!(f, "city:{}", name),
        }
    }
}

impl FromStr for LocationRelevance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("global") {
            return Ok(LocationRelevance::Global);
        }
        match s.split_once(':') {
            Some((kind, value)) if !value.trim().is_empty() => {
                let value = value.trim();
                match kind.trim().to_lowercase().as_str() {
                    "country" if value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic()) => {
                        Ok(LocationRelevance::Country(value.to_uppercase()))
                    }
                    "city" => Ok(LocationRelevance::City(value.to_string())),
                    _ => Err(format!("invalid location relevance '{}'", s)),
                }
            }
            _ => Err(format!("invalid location relevance '{}'", s)),
        }
    }
}

impl Serialize for LocationRelevance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LocationRelevance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A validated, write-once article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedArticle {
    pub title: String,
    pub summary: String,
    pub key_insights: Vec<String>,
    pub category: Category,
    pub tags: Vec<String>,
    pub urgency: Urgency,
    pub location_relevance: LocationRelevance,
    pub sources: Vec<SourceInfo>,
    pub query: String,
    pub generated_at: DateTime<Utc>,
}

/// Whether a value came from the model or from a deterministic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Llm,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub kind: OutcomeKind,
    pub value: T,
}

impl<T> Outcome<T> {
    pub fn llm(value: T) -> Self {
        Self { kind: OutcomeKind::Llm, value }
    }

    pub fn fallback(value: T) -> Self {
        Self { kind: OutcomeKind::Fallback, value }
    }

    pub fn is_fallback(&self) -> bool {
        self.kind == OutcomeKind::Fallback
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
