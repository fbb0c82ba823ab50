//! Search engine and key/value interfaces.
//!
//! The indexing pipeline and the query path only talk to these traits. The
//! crate ships [`MemoryEngine`], which implements both in process.

pub mod memory;

pub use memory::MemoryEngine;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::EngineResult;
use crate::query::SearchQuery;
use crate::types::site::SchemaField;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Record key
    pub key: String,
    pub score: f64,
    /// Returned fields, with summaries and highlights applied
    pub fields: HashMap<String, String>,
}

impl SearchHit {
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }
}

/// A page of search hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Matches across all pages
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Full-text search engine with index aliases.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Create an index over every record whose key starts with `prefix`.
    async fn create_index(
        &self,
        name: &str,
        prefix: &str,
        schema: &[SchemaField],
    ) -> EngineResult<()>;

    /// Drop an index, and its records when `delete_documents` is set.
    async fn drop_index(&self, name: &str, delete_documents: bool) -> EngineResult<()>;

    /// Point an existing alias at `index`.
    async fn alias_update(&self, alias: &str, index: &str) -> EngineResult<()>;

    /// Create a new alias for `index`.
    async fn alias_add(&self, alias: &str, index: &str) -> EngineResult<()>;

    /// Register a synonym group on an index.
    async fn add_synonyms(&self, index: &str, group_id: &str, terms: &[String])
        -> EngineResult<()>;

    /// Write (or overwrite) a record.
    async fn write_record(&self, key: &str, fields: HashMap<String, String>) -> EngineResult<()>;

    /// Delete records; returns how many existed.
    async fn delete_records(&self, keys: &[String]) -> EngineResult<usize>;

    /// Names of every index (not aliases).
    async fn list_indexes(&self) -> EngineResult<Vec<String>>;

    /// Whether an index is reachable under `name`, directly or via an alias.
    async fn index_exists(&self, name: &str) -> EngineResult<bool>;

    async fn search(&self, query: &SearchQuery) -> EngineResult<SearchResults>;

    async fn ping(&self) -> EngineResult<()>;
}

/// Small key/value side store for locks and timestamps.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> EngineResult<()>;

    /// Set `key` only if it does not exist; returns whether it was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<bool>;

    async fn exists(&self, key: &str) -> EngineResult<bool>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> EngineResult<bool>;
}
