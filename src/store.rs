//! The document store the pipeline hands its results to.
//!
//! Writes are keyed by content hashes, so re-running the same inputs
//! overwrites rather than duplicates.

use crate::types::{Category, QueryPriority, RawSourceItem};
use crate::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

pub const QUERIES_COLLECTION: &str = "pulse_queries_with_sources";
pub const ARTICLES_COLLECTION: &str = "pulse_articles";
pub const CLUSTERS_COLLECTION: &str = "pulse_clusters";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;
    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<()>;
    /// Documents whose top-level `field` equals `value`.
    async fn query(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<(String, Value)>>;
}

/// The persisted shape of one searched query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub query: String,
    pub category: Category,
    pub priority: QueryPriority,
    pub sources: Vec<RawSourceItem>,
    pub source_count: usize,
    pub collected_at: DateTime<Utc>,
    /// Set by the downstream article generator.
    pub synthesized: bool,
}

impl QueryRecord {
    pub fn new(query: String, category: Category, priority: QueryPriority, sources: Vec<RawSourceItem>) -> Self {
        Self {
            query,
            category,
            priority,
            source_count: sources.len(),
            sources,
            collected_at: Utc::now(),
            synthesized: false,
        }
    }
}

/// Document id for a piece of text: hex SHA-256, truncated to 32 characters.
pub fn record_key(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{:x}", digest)[..32].to_string()
}

pub async fn put<T: Serialize + Sync>(store: &dyn DocumentStore, collection: &str, id: &str, document: &T) -> Result<()> {
    let value = serde_json::to_value(document).map_err(|e| PipelineError::StoreError(e.to_string()))?;
    store.set(collection, id, value).await
}

/// In-process store, mainly for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn query(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<(String, Value)>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }
}

/// Stores each document as `<root>/<collection>/<id>.json`.
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, collection: &str, id: &str) -> PathBuf {
        self.root.join(collection).join(format!("{}.json", id))
    }
}

fn io_error(e: std::io::Error) -> PipelineError {
    PipelineError::StoreError(e.to_string())
}

#[async_trait]
impl DocumentStore for JsonDirStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.path(collection, id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PipelineError::StoreError(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        let path = self.path(collection, id);
        tokio::fs::create_dir_all(self.root.join(collection))
            .await
            .map_err(io_error)?;
        let bytes = serde_json::to_vec_pretty(&document).map_err(|e| PipelineError::StoreError(e.to_string()))?;
        tokio::fs::write(&path, bytes).await.map_err(io_error)?;
        debug!(path = %path.display(), "Document written");
        Ok(())
    }

    async fn query(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<(String, Value)>> {
        let mut entries = match tokio::fs::read_dir(self.root.join(collection)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if let Some(doc) = self.get(collection, &id).await? {
                if doc.get(field) == Some(value) {
                    matches.push((id, doc));
                }
            }
        }
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }
}
