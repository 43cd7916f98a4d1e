//! Synthetic search queries built from templates.
//!
//! Every generator takes the RNG explicitly so runs can be seeded. Generation
//! stops after `3 × count` attempts, which bounds the loop when the template
//! space holds fewer distinct strings than requested.

use crate::normalize::collapse_whitespace;
use crate::types::{Category, Query, QueryPriority};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

const ATTEMPTS_PER_QUERY: usize = 3;

const TEMPLATES: &[&str] = &[
    "latest {subject} news",
    "{subject} news {timeframe}",
    "{subject} updates {region}",
    "{subject} {region} {timeframe}",
    "new {subject} study {timeframe}",
    "{subject} guidelines {timeframe}",
    "{subject} outbreak {region}",
    "what experts say about {subject}",
    "{subject} health officials {region}",
    "breaking {subject} report",
];

const REGIONS: &[&str] = &[
    "United States",
    "India",
    "United Kingdom",
    "Brazil",
    "Nigeria",
    "Europe",
    "Southeast Asia",
    "Canada",
    "Australia",
    "Kenya",
];

const TIMEFRAMES: &[&str] = &["today", "this week", "this month", "2025", "latest"];

/// Topics that are trending regardless of category, weighted by priority (1..=10).
const TRENDING: &[(&str, Category, u8)] = &[
    ("H5N1 bird flu", Category::Pandemic, 10),
    ("measles outbreak", Category::InfectiousDisease, 9),
    ("dengue vaccine", Category::InfectiousDisease, 8),
    ("GLP-1 weight loss drugs", Category::Medication, 9),
    ("long covid", Category::ChronicDisease, 6),
    ("heat stroke", Category::Environmental, 7),
    ("antimicrobial resistance", Category::Research, 6),
    ("youth mental health crisis", Category::MentalHealth, 8),
    ("ultra-processed food", Category::Nutrition, 5),
    ("drug price negotiation", Category::Policy, 5),
];

fn subjects(category: Category) -> &'static [&'static str] {
    match category {
        Category::GeneralHealth => &["public health", "preventive care", "immunization schedule", "life expectancy"],
        Category::Pandemic => &["pandemic preparedness", "bird flu", "covid variant", "mpox"],
        Category::InfectiousDisease => &["dengue", "measles", "tuberculosis", "cholera", "malaria"],
        Category::ChronicDisease => &["type 2 diabetes", "heart disease", "hypertension", "cancer screening"],
        Category::MentalHealth => &["depression treatment", "anxiety", "suicide prevention", "burnout"],
        Category::Nutrition => &["nutrition labels", "sugar tax", "vitamin d", "plant-based diet"],
        Category::Fitness => &["exercise and longevity", "strength training", "daily steps"],
        Category::MaternalChild => &["maternal mortality", "childhood vaccination", "breastfeeding", "preterm birth"],
        Category::Medication => &["drug shortage", "vaccine approval", "generic drugs", "antibiotics"],
        Category::Research => &["clinical trial results", "alzheimer research", "gene therapy", "cancer immunotherapy"],
        Category::Policy => &["health insurance", "medicare", "health budget", "tobacco regulation"],
        Category::Environmental => &["air pollution", "heatwave", "water contamination", "wildfire smoke"],
        Category::Emergency => &["hospital capacity", "disaster response", "mass casualty", "flood disease risk"],
    }
}

fn category_priority(category: Category) -> QueryPriority {
    match category {
        Category::Pandemic | Category::InfectiousDisease | Category::Emergency => QueryPriority::High,
        Category::Fitness | Category::Nutrition => QueryPriority::Low,
        _ => QueryPriority::Medium,
    }
}

/// Fills one template. Placeholders without a value are left out.
fn render<R: Rng + ?Sized>(template: &str, subject: &str, rng: &mut R) -> (String, Option<String>) {
    let mut text = template.replace("{subject}", subject);
    let mut region = None;

    if text.contains("{region}") {
        let picked = REGIONS.choose(rng).copied().unwrap_or_default();
        text = text.replace("{region}", picked);
        region = Some(picked.to_string());
    }
    if text.contains("{timeframe}") {
        let picked = TIMEFRAMES.choose(rng).copied().unwrap_or_default();
        text = text.replace("{timeframe}", picked);
    }

    (collapse_whitespace(&text), region)
}

/// Samples one query for `category`, or `None` if the category has no subjects.
fn sample<R: Rng + ?Sized>(category: Category, rng: &mut R) -> Option<Query> {
    let subject = subjects(category).choose(rng)?;
    let template = TEMPLATES.choose(rng)?;
    let (text, region) = render(template, subject, rng);

    Some(Query {
        text,
        category,
        region,
        priority: category_priority(category),
    })
}

fn generate_with<R, F>(count: usize, seen: &mut HashSet<String>, rng: &mut R, mut next: F) -> Vec<Query>
where
    R: Rng + ?Sized,
    F: FnMut(&mut R) -> Option<Query>,
{
    let mut queries = Vec::with_capacity(count);
    let max_attempts = count.saturating_mul(ATTEMPTS_PER_QUERY);
    let mut attempts = 0;

    while queries.len() < count && attempts < max_attempts {
        attempts += 1;
        let Some(query) = next(rng) else { continue };
        if query.text.is_empty() || !seen.insert(query.text.clone()) {
            continue;
        }
        queries.push(query);
    }

    debug!(requested = count, produced = queries.len(), attempts, "Query generation finished");
    queries
}

/// Generates up to `count` distinct queries across every category.
pub fn generate_queries<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Query> {
    let mut seen = HashSet::new();
    generate_with(count, &mut seen, rng, |rng| {
        let category = *Category::ALL.choose(rng)?;
        sample(category, rng)
    })
}

/// Generates up to `count` distinct queries for one category.
pub fn generate_category_queries<R: Rng + ?Sized>(category: Category, count: usize, rng: &mut R) -> Vec<Query> {
    let mut seen = HashSet::new();
    generate_with(count, &mut seen, rng, |rng| sample(category, rng))
}

/// Generates `total` queries spread evenly over all categories, tops up the
/// remainder with priority-weighted trending topics and shuffles the result.
///
/// Returns fewer than `total` only when the template space is exhausted.
pub fn generate_balanced_queries<R: Rng + ?Sized>(total: usize, rng: &mut R) -> Vec<Query> {
    let per_category = total / Category::ALL.len();
    let mut seen = HashSet::new();
    let mut queries = Vec::with_capacity(total);

    for category in Category::ALL {
        let batch = generate_with(per_category, &mut seen, rng, |rng| sample(category, rng));
        queries.extend(batch);
    }

    let remainder = total.saturating_sub(queries.len());
    let trending = generate_with(remainder, &mut seen, rng, |rng| {
        let (topic, category, weight) = TRENDING.choose_weighted(rng, |t| t.2).ok()?;
        let template = TEMPLATES.choose(rng)?;
        let (text, region) = render(template, topic, rng);
        Some(Query {
            text,
            category: *category,
            region,
            priority: QueryPriority::from_score(*weight),
        })
    });
    queries.extend(trending);

    // Fisher-Yates
    queries.shuffle(rng);
    queries
}
