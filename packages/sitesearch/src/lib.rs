//! Documentation Site Search
//!
//! Crawls documentation sites into versioned full-text indexes and answers
//! section-aware queries against them.
//!
//! # Indexing
//!
//! Every run builds a new generation of a site's index and only then points
//! the site's alias at it, so searches never see a half-built index.
//!
//! ```rust,ignore
//! use sitesearch::{Indexer, IndexerSettings, Keys, MemoryEngine, HttpFetcher};
//!
//! let engine = Arc::new(MemoryEngine::new());
//! let indexer = Indexer::new(
//!     engine.clone(),
//!     engine.clone(),
//!     Arc::new(HttpFetcher::new()?),
//!     Keys::default(),
//!     IndexerSettings::default(),
//! );
//! let outcome = indexer.run(site, false).await?;
//! ```
//!
//! # Searching
//!
//! ```rust,ignore
//! let service = SearchService::new(engine, Keys::default(), sites, "https://docs.example.com")?;
//! let response = service.search(&SearchRequest::new("cluster")).await;
//! ```
//!
//! # Modules
//!
//! - [`crawler`] - Concurrent same-site crawler and page fetchers
//! - [`parser`] - Page and section extraction from HTML
//! - [`lifecycle`] - Indexing runs: locking, building, promotion, cleanup
//! - [`engine`] - Search engine abstraction and the in-memory engine
//! - [`query`] - Query expressions and escaping
//! - [`search`] - Query-time service and result shaping
//! - [`testing`] - Mock fetcher and fixture sites

pub mod config;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod hierarchy;
pub mod keys;
pub mod lifecycle;
pub mod parser;
pub mod query;
pub mod scoring;
pub mod search;
pub mod testing;
pub mod types;
pub mod urls;
pub mod validators;

// Re-export core types at crate root
pub use config::AppConfig;
pub use crawler::{CrawlEvent, CrawlSettings, CrawlSummary, HttpFetcher, PageFetcher, SiteCrawler};
pub use engine::{KeyValueStore, MemoryEngine, SearchEngine, SearchHit, SearchResults};
pub use error::{CrawlError, EngineError, IndexError, ParseError, SiteError};
pub use hierarchy::HierarchyResolver;
pub use keys::Keys;
pub use lifecycle::{
    IndexLifecycleManager, Indexer, IndexerSettings, RunOutcome, RunState, RunStats, SkipReason,
};
pub use parser::{DocumentParser, ParsedPage};
pub use query::{QueryBuilder, QueryExpr, SearchQuery, TokenEscaper};
pub use search::{HealthStatus, SearchRequest, SearchResponse, SearchResult, SearchService};
pub use types::{
    document::{DocumentType, SearchDocument},
    site::{LandingPage, SiteConfiguration, SiteDefinition, SynonymGroup},
};
