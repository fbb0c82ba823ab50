//! Site crawler.
//!
//! Walks a site from its seed URL with bounded concurrency and streams every
//! fetched page over a channel, followed by exactly one
//! [`CrawlEvent::Finished`]. A failed fetch is logged and skipped; it never
//! stops the crawl.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CrawlError, CrawlResult};
use crate::types::site::SiteConfiguration;
use crate::urls;

/// Default number of in-flight requests per site.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Link schemes that never lead to a page.
const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:"];

/// Body of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: String,
    pub html: String,
}

/// Network access for the crawler.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one HTML page.
    ///
    /// Non-success statuses and non-HTML content types are errors.
    async fn fetch(&self, url: &str) -> CrawlResult<FetchResponse>;
}

/// [`PageFetcher`] over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("sitesearch/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        Ok(Self { client })
    }

    /// Use a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> CrawlResult<FetchResponse> {
        debug!(url = %url, "HTTP fetch starting");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Capture final URL after redirects
        let final_url = response.url().to_string();

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.is_empty()
            && !content_type.contains("text/html")
            && !content_type.contains("application/xhtml")
        {
            return Err(CrawlError::NotHtml {
                url: final_url,
                content_type,
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        Ok(FetchResponse {
            url: final_url,
            html,
        })
    }
}

/// One page handed to the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
}

/// Counters for a finished crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// URLs handed to the fetcher
    pub scheduled: usize,
    /// Pages emitted
    pub pages: usize,
    /// Fetches that failed
    pub failures: usize,
    /// Pages dropped after fetching (redirected off-site or duplicate)
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlEvent {
    Page(FetchedPage),
    Finished(CrawlSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Maximum in-flight requests
    pub concurrency: usize,
    /// Stop scheduling after this many URLs
    pub max_pages: Option<usize>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_pages: None,
        }
    }
}

/// Crawls one site.
pub struct SiteCrawler {
    site: Arc<SiteConfiguration>,
    fetcher: Arc<dyn PageFetcher>,
    settings: CrawlSettings,
}

impl SiteCrawler {
    pub fn new(
        site: Arc<SiteConfiguration>,
        fetcher: Arc<dyn PageFetcher>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            site,
            fetcher,
            settings,
        }
    }

    /// Run the crawl in a background task and return its event stream.
    pub fn start(self) -> (mpsc::Receiver<CrawlEvent>, JoinHandle<CrawlSummary>) {
        let (tx, rx) = mpsc::channel(self.settings.concurrency.max(1) * 2);
        let handle = tokio::spawn(async move { self.crawl(tx).await });
        (rx, handle)
    }

    /// Crawl the site, sending every page and then one `Finished` event.
    pub async fn crawl(&self, events: mpsc::Sender<CrawlEvent>) -> CrawlSummary {
        info!(
            site = %self.site.url,
            concurrency = self.settings.concurrency,
            max_pages = ?self.settings.max_pages,
            "Starting crawl"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks: JoinSet<(String, CrawlResult<FetchResponse>)> = JoinSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut summary = CrawlSummary::default();

        match Url::parse(&self.site.url) {
            Ok(seed) => self.schedule(seed, &mut visited, &mut summary, &mut tasks, &semaphore),
            Err(e) => warn!(site = %self.site.url, error = %e, "Invalid seed URL"),
        }

        while let Some(joined) = tasks.join_next().await {
            let (requested, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Fetch task failed");
                    summary.failures += 1;
                    continue;
                }
            };

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %requested, error = %e, "Fetch failed");
                    summary.failures += 1;
                    continue;
                }
            };

            if !urls::is_under(&self.site.url, &response.url) {
                debug!(url = %requested, final_url = %response.url, "Redirected outside site");
                summary.dropped += 1;
                continue;
            }

            let final_key = urls::canonicalize(&response.url);
            if final_key != urls::canonicalize(&requested) && !visited.insert(final_key) {
                debug!(url = %requested, final_url = %response.url, "Redirected to visited page");
                summary.dropped += 1;
                continue;
            }

            if let Ok(page_url) = Url::parse(&response.url) {
                for link in extract_links(&response.html, &page_url) {
                    if self.should_follow(&link) {
                        self.schedule(link, &mut visited, &mut summary, &mut tasks, &semaphore);
                    }
                }
            }

            summary.pages += 1;
            let page = FetchedPage {
                url: response.url,
                html: response.html,
            };
            if events.send(CrawlEvent::Page(page)).await.is_err() {
                warn!(site = %self.site.url, "Crawl receiver dropped; stopping");
                tasks.abort_all();
                break;
            }
        }

        info!(
            site = %self.site.url,
            pages = summary.pages,
            failures = summary.failures,
            dropped = summary.dropped,
            "Crawl finished"
        );

        let _ = events.send(CrawlEvent::Finished(summary.clone())).await;
        summary
    }

    fn schedule(
        &self,
        url: Url,
        visited: &mut HashSet<String>,
        summary: &mut CrawlSummary,
        tasks: &mut JoinSet<(String, CrawlResult<FetchResponse>)>,
        semaphore: &Arc<Semaphore>,
    ) {
        if let Some(max_pages) = self.settings.max_pages {
            if summary.scheduled >= max_pages {
                return;
            }
        }
        if !visited.insert(urls::canonicalize(url.as_str())) {
            return;
        }

        summary.scheduled += 1;
        let fetcher = self.fetcher.clone();
        let semaphore = semaphore.clone();
        let url = url.to_string();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            debug!(url = %url, "Fetching page");
            let result = fetcher.fetch(&url).await;
            (url, result)
        });
    }

    /// Whether a discovered link belongs to this crawl.
    pub fn should_follow(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        if !self.site.allowed_domains.is_empty() {
            let host = url.host_str().unwrap_or_default();
            let allowed = self
                .site
                .allowed_domains
                .iter()
                .any(|domain| host == domain || host.ends_with(&format!(".{}", domain)));
            if !allowed {
                return false;
            }
        }

        let link = url.as_str();
        if !self.site.allow.is_empty() && !self.site.allow.iter().any(|re| re.is_match(link)) {
            return false;
        }
        if self.site.deny.iter().any(|re| re.is_match(link)) {
            return false;
        }

        urls::is_under(&self.site.url, link)
    }
}

/// Absolute, fragment-free targets of every `a[href]` on a page.
pub fn extract_links(html: &str, page_url: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter(|href| {
            let lower = href.to_lowercase();
            !SKIPPED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
        })
        .filter_map(|href| page_url.join(href).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}
