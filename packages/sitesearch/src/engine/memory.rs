//! In-memory search engine for tests and dry runs.
//!
//! Models the parts of the engine the pipeline relies on: prefix-scoped
//! indexes, aliases, synonym groups, weighted text fields, the ad-hoc
//! `__score` multiplier, snippets, highlighting and an expiring key/value
//! side. Not suitable for production as data is lost on restart.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use super::{KeyValueStore, SearchEngine, SearchHit, SearchResults};
use crate::error::{EngineError, EngineResult};
use crate::query::{QueryExpr, SearchQuery, Summarize};
use crate::types::document::SCORE_FIELD;
use crate::types::site::{FieldKind, SchemaField};

#[derive(Debug, Clone)]
struct IndexDef {
    prefix: String,
    schema: Vec<SchemaField>,
    synonyms: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, HashMap<String, String>>,
    indexes: BTreeMap<String, IndexDef>,
    aliases: HashMap<String, String>,
    kv: HashMap<String, KvEntry>,
    rejected_writes: Vec<String>,
}

impl State {
    fn resolve(&self, name: &str) -> Option<(&str, &IndexDef)> {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.indexes
            .get_key_value(name)
            .map(|(name, def)| (name.as_str(), def))
    }
}

/// In-process [`SearchEngine`] and [`KeyValueStore`].
pub struct MemoryEngine {
    state: RwLock<State>,
    available: AtomicBool,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> EngineResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Unavailable("memory engine is offline".to_string()))
        }
    }

    /// Simulate the engine going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make writes to any key containing `needle` fail.
    pub fn reject_writes_containing(&self, needle: impl Into<String>) {
        self.write().rejected_writes.push(needle.into());
    }

    /// Total number of stored records across all indexes.
    pub fn record_count(&self) -> usize {
        self.read().records.len()
    }

    /// Keys of every stored record starting with `prefix`.
    pub fn record_keys(&self, prefix: &str) -> Vec<String> {
        self.read()
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn record(&self, key: &str) -> Option<HashMap<String, String>> {
        self.read().records.get(key).cloned()
    }

    /// Index an alias currently points at.
    pub fn alias_target(&self, alias: &str) -> Option<String> {
        self.read().aliases.get(alias).cloned()
    }

    /// `doc_id`s of every record covered by the index behind `name`.
    pub fn doc_ids(&self, name: &str) -> BTreeSet<String> {
        let state = self.read();
        let Some((_, def)) = state.resolve(name) else {
            return BTreeSet::new();
        };
        state
            .records
            .iter()
            .filter(|(key, _)| key.starts_with(&def.prefix))
            .filter_map(|(_, fields)| fields.get("doc_id").cloned())
            .collect()
    }

    /// Synonym groups registered on an index.
    pub fn synonyms(&self, index: &str) -> BTreeMap<String, BTreeSet<String>> {
        self.read()
            .resolve(index)
            .map(|(_, def)| def.synonyms.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn create_index(
        &self,
        name: &str,
        prefix: &str,
        schema: &[SchemaField],
    ) -> EngineResult<()> {
        self.check_available()?;
        let mut state = self.write();
        if state.indexes.contains_key(name) {
            return Err(EngineError::IndexExists(name.to_string()));
        }
        state.indexes.insert(
            name.to_string(),
            IndexDef {
                prefix: prefix.to_string(),
                schema: schema.to_vec(),
                synonyms: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_index(&self, name: &str, delete_documents: bool) -> EngineResult<()> {
        self.check_available()?;
        let mut state = self.write();
        let def = state
            .indexes
            .remove(name)
            .ok_or_else(|| EngineError::UnknownIndex(name.to_string()))?;

        state.aliases.retain(|_, target| target.as_str() != name);
        if delete_documents {
            state.records.retain(|key, _| !key.starts_with(&def.prefix));
        }
        Ok(())
    }

    async fn alias_update(&self, alias: &str, index: &str) -> EngineResult<()> {
        self.check_available()?;
        let mut state = self.write();
        if !state.indexes.contains_key(index) {
            return Err(EngineError::UnknownIndex(index.to_string()));
        }
        match state.aliases.get_mut(alias) {
            Some(target) => {
                *target = index.to_string();
                Ok(())
            }
            None => Err(EngineError::UnknownAlias(alias.to_string())),
        }
    }

    async fn alias_add(&self, alias: &str, index: &str) -> EngineResult<()> {
        self.check_available()?;
        let mut state = self.write();
        if !state.indexes.contains_key(index) {
            return Err(EngineError::UnknownIndex(index.to_string()));
        }
        if state.aliases.contains_key(alias) {
            return Err(EngineError::AliasExists(alias.to_string()));
        }
        state.aliases.insert(alias.to_string(), index.to_string());
        Ok(())
    }

    async fn add_synonyms(
        &self,
        index: &str,
        group_id: &str,
        terms: &[String],
    ) -> EngineResult<()> {
        self.check_available()?;
        let mut state = self.write();
        let def = state
            .indexes
            .get_mut(index)
            .ok_or_else(|| EngineError::UnknownIndex(index.to_string()))?;
        def.synonyms
            .entry(group_id.to_string())
            .or_default()
            .extend(terms.iter().map(|term| term.to_lowercase()));
        Ok(())
    }

    async fn write_record(&self, key: &str, fields: HashMap<String, String>) -> EngineResult<()> {
        self.check_available()?;
        let mut state = self.write();
        if state
            .rejected_writes
            .iter()
            .any(|needle| key.contains(needle.as_str()))
        {
            return Err(EngineError::Response(format!("write rejected: {}", key)));
        }
        state.records.insert(key.to_string(), fields);
        Ok(())
    }

    async fn delete_records(&self, keys: &[String]) -> EngineResult<usize> {
        self.check_available()?;
        let mut state = self.write();
        Ok(keys
            .iter()
            .filter(|key| state.records.remove(key.as_str()).is_some())
            .count())
    }

    async fn list_indexes(&self) -> EngineResult<Vec<String>> {
        self.check_available()?;
        Ok(self.read().indexes.keys().cloned().collect())
    }

    async fn index_exists(&self, name: &str) -> EngineResult<bool> {
        self.check_available()?;
        Ok(self.read().resolve(name).is_some())
    }

    async fn search(&self, query: &SearchQuery) -> EngineResult<SearchResults> {
        self.check_available()?;
        let state = self.read();
        let (_, def) = state
            .resolve(&query.index)
            .ok_or_else(|| EngineError::UnknownIndex(query.index.clone()))?;

        let matcher = Matcher::new(def, &query.expr);
        let mut hits: Vec<SearchHit> = state
            .records
            .iter()
            .filter(|(key, _)| key.starts_with(&def.prefix))
            .filter_map(|(key, fields)| {
                let score = matcher.eval(&query.expr, fields)?;
                let boost = fields
                    .get(SCORE_FIELD)
                    .and_then(|value| value.parse::<f64>().ok())
                    .unwrap_or(1.0);
                Some(SearchHit {
                    key: key.clone(),
                    score: score * boost,
                    fields: fields.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.key.cmp(&b.key))
        });

        let total = hits.len();
        let hits = hits
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|mut hit| {
                if let Some(summarize) = &query.summarize {
                    matcher.summarize(&mut hit.fields, summarize);
                }
                for field in &query.highlight {
                    matcher.highlight(&mut hit.fields, field);
                }
                if let Some(returned) = &query.return_fields {
                    hit.fields.retain(|name, _| returned.contains(name));
                }
                hit
            })
            .collect();

        Ok(SearchResults { total, hits })
    }

    async fn ping(&self) -> EngineResult<()> {
        self.check_available()
    }
}

#[async_trait]
impl KeyValueStore for MemoryEngine {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .read()
            .kv
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> EngineResult<()> {
        self.check_available()?;
        let entry = KvEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.write().kv.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.write();
        if state.kv.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        state.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> EngineResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .write()
            .kv
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }
}

/// Lowercased tokens split on punctuation and whitespace. A backslash keeps
/// the next character inside the token, so `active\-active` is one token.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                current.extend(escaped.to_lowercase());
            }
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    text: String,
    prefix: bool,
}

fn query_terms(text: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    for word in text.split_whitespace() {
        let prefix = word.ends_with('*');
        let tokens = tokenize(word);
        let count = tokens.len();
        for (i, token) in tokens.into_iter().enumerate() {
            terms.push(Term {
                text: token,
                prefix: prefix && i + 1 == count,
            });
        }
    }
    terms
}

/// Evaluates a query expression against records of one index.
struct Matcher<'a> {
    def: &'a IndexDef,
    highlight_terms: Vec<Term>,
}

impl<'a> Matcher<'a> {
    fn new(def: &'a IndexDef, expr: &QueryExpr) -> Self {
        let mut highlight_terms = Vec::new();
        collect_terms(expr, &mut highlight_terms);
        Self {
            def,
            highlight_terms,
        }
    }

    /// Terms `term` stands for, including its synonyms.
    fn expansions(&self, term: &str) -> HashSet<String> {
        let mut expanded = HashSet::from([term.to_string()]);
        for group in self.def.synonyms.values() {
            if group.iter().any(|synonym| synonym == term) {
                expanded.extend(group.iter().flat_map(|synonym| tokenize(synonym)));
            }
        }
        expanded
    }

    fn term_matches(&self, term: &Term, token: &str) -> bool {
        if term.prefix && token.starts_with(&term.text) {
            return true;
        }
        self.expansions(&term.text).contains(token)
    }

    fn eval(&self, expr: &QueryExpr, fields: &HashMap<String, String>) -> Option<f64> {
        match expr {
            QueryExpr::All => Some(1.0),
            QueryExpr::Text(text) => self.eval_text(text, fields),
            QueryExpr::FieldMatch { field, value } => {
                let wanted = tokenize(value);
                let have = tokenize(fields.get(field)?);
                if !wanted.is_empty() && wanted.iter().all(|token| have.contains(token)) {
                    Some(1.0)
                } else {
                    None
                }
            }
            QueryExpr::Weighted { expr, weight } => self.eval(expr, fields).map(|s| s * weight),
            QueryExpr::And(clauses) => clauses
                .iter()
                .map(|clause| self.eval(clause, fields))
                .sum::<Option<f64>>(),
            QueryExpr::Or(clauses) => {
                let scores: Vec<f64> = clauses
                    .iter()
                    .filter_map(|clause| self.eval(clause, fields))
                    .collect();
                if scores.is_empty() {
                    None
                } else {
                    Some(scores.iter().sum())
                }
            }
            QueryExpr::Group(expr) => self.eval(expr, fields),
        }
    }

    /// Every term must appear in some text field; the score is the
    /// field-weighted count of matching tokens.
    fn eval_text(&self, text: &str, fields: &HashMap<String, String>) -> Option<f64> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return None;
        }

        let mut total = 0.0;
        for term in &terms {
            let mut term_score = 0.0;
            for field in self.def.schema.iter().filter(|f| f.kind == FieldKind::Text) {
                let Some(value) = fields.get(&field.name) else {
                    continue;
                };
                let count = tokenize(value)
                    .iter()
                    .filter(|token| self.term_matches(term, token))
                    .count();
                term_score += field.weight * count as f64;
            }
            if term_score == 0.0 {
                return None;
            }
            total += term_score;
        }
        Some(total)
    }

    fn word_matches(&self, word: &str) -> bool {
        tokenize(word).iter().any(|token| {
            self.highlight_terms
                .iter()
                .any(|term| self.term_matches(term, token))
        })
    }

    /// Replace each summarized field with a fragment starting at the first
    /// matching word.
    fn summarize(&self, fields: &mut HashMap<String, String>, summarize: &Summarize) {
        for name in &summarize.fields {
            let Some(value) = fields.get_mut(name) else {
                continue;
            };
            let words: Vec<&str> = value.split_whitespace().collect();
            let start = words
                .iter()
                .position(|word| self.word_matches(word))
                .unwrap_or(0);
            let end = (start + summarize.len).min(words.len());

            let mut fragment = words[start..end].join(" ");
            if end < words.len() {
                fragment.push_str("... ");
            }
            *value = fragment;
        }
    }

    fn highlight(&self, fields: &mut HashMap<String, String>, name: &str) {
        let Some(value) = fields.get_mut(name) else {
            return;
        };
        let highlighted: Vec<String> = value
            .split(' ')
            .map(|word| {
                if !word.is_empty() && self.word_matches(word) {
                    format!("<b>{}</b>", word)
                } else {
                    word.to_string()
                }
            })
            .collect();
        *value = highlighted.join(" ");
    }
}

fn collect_terms(expr: &QueryExpr, out: &mut Vec<Term>) {
    match expr {
        QueryExpr::Text(text) => out.extend(query_terms(text)),
        QueryExpr::Weighted { expr, .. } | QueryExpr::Group(expr) => collect_terms(expr, out),
        QueryExpr::And(clauses) | QueryExpr::Or(clauses) => {
            for clause in clauses {
                collect_terms(clause, out);
            }
        }
        QueryExpr::All | QueryExpr::FieldMatch { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::site::default_schema;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn engine_with_docs() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.create_index("idx-1", "idx-1:doc:", &default_schema()).await.unwrap();
        engine.alias_add("idx", "idx-1").await.unwrap();

        engine
            .write_record(
                "idx-1:doc:a",
                fields(&[
                    ("doc_id", "a"),
                    ("title", "Clustering"),
                    ("body", "A cluster spreads shards across nodes."),
                    ("s", "concepts"),
                    (SCORE_FIELD, "1.0"),
                ]),
            )
            .await
            .unwrap();
        engine
            .write_record(
                "idx-1:doc:b",
                fields(&[
                    ("doc_id", "b"),
                    ("title", "Install"),
                    ("body", "Install a cluster with the installer."),
                    ("s", "installing"),
                    (SCORE_FIELD, "1.0"),
                ]),
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_search_through_alias() {
        let engine = engine_with_docs().await;

        let results = engine
            .search(&SearchQuery::new("idx", QueryExpr::text("cluster")))
            .await
            .unwrap();

        assert_eq!(results.total, 2);
        // equal scores fall back to key order
        let keys: Vec<_> = results.hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["idx-1:doc:a", "idx-1:doc:b"]);
    }

    #[test]
    fn test_tokenize_keeps_escaped_characters() {
        assert_eq!(
            tokenize(r"Active\-Active setup, redis\.conf"),
            vec!["active-active", "setup", "redis.conf"]
        );
    }

    #[tokio::test]
    async fn test_escaped_term_matches_escaped_text() {
        let engine = engine_with_docs().await;
        engine
            .write_record(
                "idx-1:doc:c",
                fields(&[
                    ("doc_id", "c"),
                    ("title", "Geo Replication"),
                    ("body", r"Active\-Active databases replicate writes."),
                    ("s", "concepts"),
                ]),
            )
            .await
            .unwrap();

        let results = engine
            .search(&SearchQuery::new("idx", QueryExpr::text(r"active\-active")))
            .await
            .unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].field("doc_id"), "c");

        // The bare word is a different token
        let results = engine
            .search(&SearchQuery::new("idx", QueryExpr::text("active")))
            .await
            .unwrap();
        assert_eq!(results.total, 0);
    }

    #[tokio::test]
    async fn test_title_weight_and_prefix() {
        let engine = engine_with_docs().await;

        let results = engine
            .search(&SearchQuery::new("idx", QueryExpr::text("cluster*")))
            .await
            .unwrap();

        assert_eq!(results.hits[0].field("doc_id"), "a");
        assert!(results.hits[0].score > results.hits[1].score);
    }

    #[tokio::test]
    async fn test_weighted_section_clause() {
        let engine = engine_with_docs().await;
        let expr = QueryExpr::Or(vec![
            QueryExpr::And(vec![
                QueryExpr::field("s", "installing").group().weighted(10.0),
                QueryExpr::text("cluster"),
            ])
            .group(),
            QueryExpr::text("cluster"),
        ]);

        let results = engine.search(&SearchQuery::new("idx", expr)).await.unwrap();

        assert_eq!(results.total, 2);
        assert_eq!(results.hits[0].field("doc_id"), "b");
    }

    #[tokio::test]
    async fn test_synonyms_expand_terms() {
        let engine = engine_with_docs().await;
        engine
            .add_synonyms("idx-1", "nodes", &["node".to_string(), "shards".to_string()])
            .await
            .unwrap();

        let results = engine
            .search(&SearchQuery::new("idx", QueryExpr::text("node")))
            .await
            .unwrap();

        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].field("doc_id"), "a");
    }

    #[tokio::test]
    async fn test_summarize_and_highlight() {
        let engine = engine_with_docs().await;
        let query = SearchQuery::new("idx", QueryExpr::text("shards"))
            .summarize(Summarize {
                fields: vec!["body".to_string()],
                frags: 1,
                len: 2,
            })
            .highlight(["body"]);

        let results = engine.search(&query).await.unwrap();

        assert_eq!(results.hits[0].field("body"), "<b>shards</b> across... ");
    }

    #[tokio::test]
    async fn test_paging_and_return_fields() {
        let engine = engine_with_docs().await;
        let query = SearchQuery::new("idx", QueryExpr::All)
            .paging(1, 10)
            .return_fields(["doc_id"]);

        let results = engine.search(&query).await.unwrap();

        assert_eq!(results.total, 2);
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].fields.len(), 1);
    }

    #[tokio::test]
    async fn test_alias_update_requires_existing_alias() {
        let engine = engine_with_docs().await;
        engine.create_index("idx-2", "idx-2:doc:", &default_schema()).await.unwrap();

        assert!(matches!(
            engine.alias_update("other", "idx-2").await,
            Err(EngineError::UnknownAlias(_))
        ));
        engine.alias_update("idx", "idx-2").await.unwrap();
        assert_eq!(engine.alias_target("idx").as_deref(), Some("idx-2"));
    }

    #[tokio::test]
    async fn test_drop_index_with_documents() {
        let engine = engine_with_docs().await;

        engine.drop_index("idx-1", true).await.unwrap();

        assert_eq!(engine.record_count(), 0);
        assert!(!engine.index_exists("idx").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_and_expiry() {
        let engine = MemoryEngine::new();

        assert!(engine.set_if_absent("lock", "1", Duration::from_secs(60)).await.unwrap());
        assert!(!engine.set_if_absent("lock", "2", Duration::from_secs(60)).await.unwrap());
        assert_eq!(engine.get("lock").await.unwrap().as_deref(), Some("1"));

        engine.set("short", "1", Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!engine.exists("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_engine() {
        let engine = MemoryEngine::new();
        engine.set_available(false);

        assert!(matches!(engine.ping().await, Err(EngineError::Unavailable(_))));
        assert!(engine.list_indexes().await.is_err());
    }
}
