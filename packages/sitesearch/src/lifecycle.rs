//! Index lifecycle: one site, one run.
//!
//! ```text
//! Idle ─► Locked ─► Building ─► Promoting ─► Done
//!   │        └──────────┴─► Aborted (nothing indexed)
//!   └─► Skipped (debounced, or another run holds the lock)
//! ```
//!
//! Every run writes into a fresh index generation (`{alias}-{timestamp}`).
//! Queries keep hitting the alias, which still points at the previous
//! generation, until the new one is fully drained and promoted. Superseded
//! generations are then dropped together with their records.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::crawler::{CrawlEvent, CrawlSettings, CrawlSummary, FetchedPage, PageFetcher, SiteCrawler};
use crate::engine::{KeyValueStore, SearchEngine};
use crate::error::{EngineError, IndexResult};
use crate::hierarchy::HierarchyResolver;
use crate::keys::Keys;
use crate::parser::DocumentParser;
use crate::query::{QueryExpr, SearchQuery};
use crate::scoring::score_document;
use crate::types::site::SiteConfiguration;
use crate::urls;

/// Page size used when listing a generation's documents.
const STALE_PAGE_SIZE: usize = 200;

/// Writers per CPU in the default pool size.
const WRITERS_PER_CPU: usize = 5;

pub fn default_write_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * WRITERS_PER_CPU
}

/// Tuning for indexing runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Minimum time between two non-forced runs of a site
    pub debounce: Duration,
    /// Lock expiry, in case a run dies without releasing it
    pub lock_ttl: Duration,
    /// Size of the document writer pool
    pub write_workers: usize,
    /// Bound of the write queue
    pub queue_capacity: usize,
    pub crawl: CrawlSettings,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(3600),
            write_workers: default_write_workers(),
            queue_capacity: 1000,
            crawl: CrawlSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The site was indexed within the debounce window
    Debounced,
    /// Another run holds the site's lock
    LockHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Locked,
    Building,
    Promoting,
    Done,
    Aborted,
    Skipped(SkipReason),
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub crawl: CrawlSummary,
    /// Pages received from the crawler
    pub pages_seen: usize,
    /// Pages that produced documents
    pub pages_indexed: usize,
    /// Pages dropped by the parser or a validator
    pub pages_rejected: usize,
    /// Distinct documents produced
    pub documents: usize,
    pub documents_written: usize,
    pub write_failures: usize,
    /// Records removed by stale cleanup
    pub stale_deleted: usize,
    /// Superseded generations dropped after promotion
    pub generations_dropped: usize,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub site: String,
    pub generation: String,
    pub state: RunState,
    /// Every state the run passed through, `Idle` first
    pub transitions: Vec<RunState>,
    pub stats: RunStats,
}

impl RunOutcome {
    pub fn promoted(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.state {
            RunState::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

struct WriteJob {
    key: String,
    fields: HashMap<String, String>,
}

#[derive(Default)]
struct WriteCounters {
    written: AtomicUsize,
    failed: AtomicUsize,
}

/// Owns one site's index generation for the duration of a run.
pub struct IndexLifecycleManager {
    site: Arc<SiteConfiguration>,
    engine: Arc<dyn SearchEngine>,
    kv: Arc<dyn KeyValueStore>,
    keys: Keys,
    settings: IndexerSettings,
    alias: String,
    generation: String,
    state: RunState,
    transitions: Vec<RunState>,
    lock_held: bool,
    index_created: bool,
    alias_switched: bool,
    seen_urls: HashSet<String>,
    seen_ids: HashSet<String>,
    hierarchy: HierarchyResolver,
    stats: RunStats,
}

impl IndexLifecycleManager {
    pub fn new(
        site: Arc<SiteConfiguration>,
        engine: Arc<dyn SearchEngine>,
        kv: Arc<dyn KeyValueStore>,
        keys: Keys,
        settings: IndexerSettings,
    ) -> Self {
        let alias = keys.index_alias(&site.url);
        let generation = keys.generation(&site.url, Utc::now());
        let hierarchy = HierarchyResolver::new(&site.url);

        Self {
            site,
            engine,
            kv,
            keys,
            settings,
            alias,
            generation,
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
            lock_held: false,
            index_created: false,
            alias_switched: false,
            seen_urls: HashSet::new(),
            seen_ids: HashSet::new(),
            hierarchy,
            stats: RunStats::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Canonical URLs of every page the crawler delivered.
    pub fn seen_urls(&self) -> &HashSet<String> {
        &self.seen_urls
    }

    fn transition(&mut self, state: RunState) {
        debug!(site = %self.site.url, from = ?self.state, to = ?state, "Run state change");
        self.state = state;
        self.transitions.push(state);
    }

    /// Entry guard: debounce, then take the lock.
    ///
    /// Returns the skip reason when the run should not proceed. `force`
    /// bypasses both checks and (re)sets the lock unconditionally.
    pub async fn acquire(&mut self, force: bool) -> IndexResult<Option<SkipReason>> {
        let lock_key = self.keys.index_lock(&self.site.url);

        if force {
            self.kv
                .set(&lock_key, &self.generation, Some(self.settings.lock_ttl))
                .await?;
        } else {
            if let Some(elapsed) = self.since_last_index().await? {
                if elapsed < self.settings.debounce {
                    info!(
                        site = %self.site.url,
                        elapsed_secs = elapsed.as_secs(),
                        "Debounced indexing run"
                    );
                    self.transition(RunState::Skipped(SkipReason::Debounced));
                    return Ok(Some(SkipReason::Debounced));
                }
            }

            let acquired = self
                .kv
                .set_if_absent(&lock_key, &self.generation, self.settings.lock_ttl)
                .await?;
            if !acquired {
                info!(site = %self.site.url, "Index lock held; skipping run");
                self.transition(RunState::Skipped(SkipReason::LockHeld));
                return Ok(Some(SkipReason::LockHeld));
            }
        }

        self.lock_held = true;
        self.transition(RunState::Locked);
        Ok(None)
    }

    async fn since_last_index(&self) -> IndexResult<Option<Duration>> {
        let last = self.kv.get(&self.keys.last_index(&self.site.url)).await?;
        let Some(last) = last.and_then(|value| value.parse::<f64>().ok()) else {
            return Ok(None);
        };

        // An out-of-range timestamp counts as no prior index
        let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        Ok(Duration::try_from_secs_f64((now - last).max(0.0)).ok())
    }

    /// Crawl into the new generation, then promote it (or abort when the
    /// crawl produced nothing).
    ///
    /// On failure before promotion the generation is discarded. The lock is
    /// left to [`release`](Self::release).
    pub async fn build(&mut self, fetcher: Arc<dyn PageFetcher>) -> IndexResult<()> {
        self.transition(RunState::Building);
        info!(site = %self.site.url, generation = %self.generation, "Building index generation");

        let result = self.build_generation(fetcher).await;
        if result.is_err() && !self.alias_switched {
            self.discard_generation().await;
        }
        result
    }

    async fn build_generation(&mut self, fetcher: Arc<dyn PageFetcher>) -> IndexResult<()> {
        // Nothing is searchable yet, so the new index can exist right away
        if !self.engine.index_exists(&self.alias).await? {
            self.create_generation_index().await?;
        }

        let (queue, workers, counters) = self.start_writers();

        let crawler = SiteCrawler::new(self.site.clone(), fetcher, self.settings.crawl.clone());
        let (mut events, crawl_task) = crawler.start();
        let parser = DocumentParser::new(self.site.clone());

        while let Some(event) = events.recv().await {
            match event {
                CrawlEvent::Page(page) => self.handle_page(&parser, page, &queue).await,
                CrawlEvent::Finished(summary) => {
                    self.stats.crawl = summary;
                    break;
                }
            }
        }
        crawl_task.await?;

        // Drain: closing the queue stops the writers once it is empty
        drop(queue);
        let mut workers = workers;
        while let Some(joined) = workers.join_next().await {
            joined?;
        }

        self.stats.documents = self.seen_ids.len();
        self.stats.documents_written = counters.written.load(Ordering::SeqCst);
        self.stats.write_failures = counters.failed.load(Ordering::SeqCst);

        if self.stats.documents_written == 0 {
            warn!(
                site = %self.site.url,
                pages = self.stats.pages_seen,
                "No documents indexed; aborting run"
            );
            self.discard_generation().await;
            self.transition(RunState::Aborted);
            return Ok(());
        }

        self.promote().await?;
        self.stats.stale_deleted = self.clear_stale().await?;
        self.transition(RunState::Done);

        info!(
            site = %self.site.url,
            generation = %self.generation,
            pages = self.stats.pages_indexed,
            documents = self.stats.documents_written,
            rejected = self.stats.pages_rejected,
            stale = self.stats.stale_deleted,
            "Index generation promoted"
        );
        Ok(())
    }

    fn start_writers(
        &self,
    ) -> (
        mpsc::Sender<WriteJob>,
        JoinSet<()>,
        Arc<WriteCounters>,
    ) {
        let (tx, rx) = mpsc::channel::<WriteJob>(self.settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(WriteCounters::default());

        let mut workers = JoinSet::new();
        for _ in 0..self.settings.write_workers.max(1) {
            let engine = self.engine.clone();
            let rx = rx.clone();
            let counters = counters.clone();
            workers.spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };

                    match engine.write_record(&job.key, job.fields).await {
                        Ok(()) => {
                            counters.written.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            error!(key = %job.key, error = %e, "Failed to write document");
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            });
        }

        (tx, workers, counters)
    }

    async fn handle_page(
        &mut self,
        parser: &DocumentParser,
        page: FetchedPage,
        queue: &mpsc::Sender<WriteJob>,
    ) {
        self.stats.pages_seen += 1;
        let url = urls::canonicalize(&page.url);
        self.seen_urls.insert(url.clone());

        let parsed = match parser.parse(&url, &page.html, &self.hierarchy) {
            Ok(parsed) => parsed,
            Err(e) => {
                info!(url = %url, reason = %e, "Skipping page");
                self.stats.pages_rejected += 1;
                return;
            }
        };

        self.stats.pages_indexed += 1;
        self.hierarchy.record(&url, &parsed.page.title);

        for doc in parsed.into_documents() {
            if !self.seen_ids.insert(doc.doc_id.clone()) {
                debug!(doc_id = %doc.doc_id, "Duplicate document in run");
                continue;
            }

            let score = score_document(&doc, &self.site.scorers, self.site.score_floor);
            let job = WriteJob {
                key: self.keys.document(&self.generation, &doc.doc_id),
                fields: doc.to_fields(score),
            };
            if queue.send(job).await.is_err() {
                error!(doc_id = %doc.doc_id, "Write queue closed");
            }
        }
    }

    async fn create_generation_index(&mut self) -> IndexResult<()> {
        let prefix = self.keys.index_prefix(&self.generation);
        self.engine
            .create_index(&self.generation, &prefix, &self.site.schema)
            .await?;
        self.index_created = true;

        for group in &self.site.synonym_groups {
            let terms: Vec<String> = group.synonyms.iter().cloned().collect();
            self.engine
                .add_synonyms(&self.generation, &group.group_id, &terms)
                .await?;
        }

        debug!(index = %self.generation, prefix = %prefix, "Created index generation");
        Ok(())
    }

    /// Record the index time, point the alias at the new generation and
    /// drop superseded generations.
    async fn promote(&mut self) -> IndexResult<()> {
        self.transition(RunState::Promoting);

        let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        self.kv
            .set(&self.keys.last_index(&self.site.url), &format!("{:.6}", now), None)
            .await?;

        if !self.index_created {
            self.create_generation_index().await?;
        }

        match self.engine.alias_update(&self.alias, &self.generation).await {
            Ok(()) => {}
            Err(EngineError::UnknownAlias(_)) => {
                self.engine.alias_add(&self.alias, &self.generation).await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.alias_switched = true;
        info!(alias = %self.alias, index = %self.generation, "Alias promoted");

        let superseded: Vec<String> = self
            .engine
            .list_indexes()
            .await?
            .into_iter()
            .filter(|name| name != &self.generation)
            .filter(|name| self.keys.is_generation_of(&self.site.url, name))
            .collect();

        for name in superseded {
            match self.engine.drop_index(&name, true).await {
                Ok(()) => {
                    debug!(index = %name, "Dropped old generation");
                    self.stats.generations_dropped += 1;
                }
                Err(e) => warn!(index = %name, error = %e, "Failed to drop old generation"),
            }
        }

        Ok(())
    }

    /// Delete records in the promoted index whose ids this run did not
    /// produce.
    async fn clear_stale(&self) -> IndexResult<usize> {
        let mut stale = Vec::new();
        let mut offset = 0;

        loop {
            let query = SearchQuery::new(&self.alias, QueryExpr::All)
                .paging(offset, STALE_PAGE_SIZE)
                .return_fields(["doc_id"]);
            let results = self.engine.search(&query).await?;
            if results.hits.is_empty() {
                break;
            }

            offset += results.hits.len();
            stale.extend(
                results
                    .hits
                    .into_iter()
                    .filter(|hit| !self.seen_ids.contains(hit.field("doc_id")))
                    .map(|hit| hit.key),
            );
        }

        if stale.is_empty() {
            return Ok(0);
        }

        debug!(site = %self.site.url, count = stale.len(), "Deleting stale documents");
        Ok(self.engine.delete_records(&stale).await?)
    }

    /// Best-effort removal of an unpromoted generation and its records.
    async fn discard_generation(&mut self) {
        if self.index_created {
            match self.engine.drop_index(&self.generation, true).await {
                Ok(()) => self.index_created = false,
                Err(e) => {
                    warn!(index = %self.generation, error = %e, "Failed to drop generation")
                }
            }
            return;
        }

        let keys: Vec<String> = self
            .seen_ids
            .iter()
            .map(|id| self.keys.document(&self.generation, id))
            .collect();
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.engine.delete_records(&keys).await {
            warn!(index = %self.generation, error = %e, "Failed to delete unpromoted records");
        }
    }

    /// Release the lock if this run holds it.
    pub async fn release(&mut self) {
        if !self.lock_held {
            return;
        }

        let lock_key = self.keys.index_lock(&self.site.url);
        match self.kv.delete(&lock_key).await {
            Ok(_) => self.lock_held = false,
            Err(e) => error!(site = %self.site.url, error = %e, "Failed to release index lock"),
        }
    }

    pub fn outcome(self) -> RunOutcome {
        RunOutcome {
            site: self.site.url.clone(),
            generation: self.generation,
            state: self.state,
            transitions: self.transitions,
            stats: self.stats,
        }
    }
}

/// Runs indexing for any number of sites against shared collaborators.
#[derive(Clone)]
pub struct Indexer {
    engine: Arc<dyn SearchEngine>,
    kv: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn PageFetcher>,
    keys: Keys,
    settings: IndexerSettings,
}

impl Indexer {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        kv: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn PageFetcher>,
        keys: Keys,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            engine,
            kv,
            fetcher,
            keys,
            settings,
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Index `site` once: guard, build, release.
    pub async fn run(&self, site: Arc<SiteConfiguration>, force: bool) -> IndexResult<RunOutcome> {
        info!(site = %site.url, force = force, "Indexing run requested");

        let mut manager = IndexLifecycleManager::new(
            site,
            self.engine.clone(),
            self.kv.clone(),
            self.keys.clone(),
            self.settings.clone(),
        );

        if manager.acquire(force).await?.is_some() {
            return Ok(manager.outcome());
        }

        let result = manager.build(self.fetcher.clone()).await;
        manager.release().await;
        result?;

        Ok(manager.outcome())
    }

    /// Scheduler entry point: `true` when the site is up to date (promoted
    /// or skipped), `false` when the run aborted or failed.
    pub async fn run_index(&self, site: Arc<SiteConfiguration>, force: bool) -> bool {
        let url = site.url.clone();
        match self.run(site, force).await {
            Ok(outcome) => matches!(outcome.state, RunState::Done | RunState::Skipped(_)),
            Err(e) => {
                error!(site = %url, error = %e, "Indexing run failed");
                false
            }
        }
    }
}
