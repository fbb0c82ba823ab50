//! Typed errors for the indexing pipeline and query path.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! rejected page from a broken engine connection.

use thiserror::Error;

/// Errors raised while fetching pages during a crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Response was not an HTML document (PDF, archive, image...)
    #[error("not an HTML page: {url} ({content_type})")]
    NotHtml { url: String, content_type: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Why a page produced no documents.
///
/// A page is indexed as a unit: any of these drops the page document and all
/// of its sections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The page has no usable `<title>`
    #[error("missing title: {url}")]
    MissingTitle { url: String },

    /// A configured validator rejected one of the page's documents
    #[error("rejected by {validator}: {reason} ({url})")]
    Rejected {
        url: String,
        validator: String,
        reason: String,
    },
}

/// Errors reported by the search engine or its key/value side.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine could not be reached
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// Index (or alias) does not exist
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    /// Index name already taken
    #[error("index already exists: {0}")]
    IndexExists(String),

    /// Alias does not exist yet
    #[error("unknown alias: {0}")]
    UnknownAlias(String),

    /// Alias already points at an index
    #[error("alias already exists: {0}")]
    AliasExists(String),

    /// Engine rejected the command
    #[error("engine response error: {0}")]
    Response(String),
}

/// Errors that abort an indexing run.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Engine command failed at a point where the run cannot continue
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A crawl or writer task died
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors building a site configuration from its definition.
#[derive(Debug, Error)]
pub enum SiteError {
    /// Seed URL is not a valid absolute URL
    #[error("invalid site URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Allow/deny pattern does not compile
    #[error("invalid URL pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Content selector is not valid CSS
    #[error("invalid content selector: {0}")]
    InvalidSelector(String),

    /// Score floor must stay above zero
    #[error("score floor must be > 0, got {0}")]
    InvalidScoreFloor(f64),

    /// The default search site is not among the configured sites
    #[error("default site is not configured: {0}")]
    UnknownDefaultSite(String),
}

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for indexing runs.
pub type IndexResult<T> = std::result::Result<T, IndexError>;
