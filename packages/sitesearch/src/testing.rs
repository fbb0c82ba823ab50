//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the indexing pipeline without making
//! network calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::crawler::{FetchResponse, PageFetcher};
use crate::error::{CrawlError, CrawlResult};
use crate::urls;

#[derive(Debug, Clone)]
enum MockResponse {
    Html(String),
    Status(u16),
    NotHtml(String),
    Redirect(String),
}

/// A mock fetcher for testing.
///
/// Serves predefined pages by canonical URL; anything unknown is a 404.
/// Pages can be edited between crawls through a shared `Arc`.
#[derive(Default)]
pub struct MockFetcher {
    /// Predefined responses by canonical URL
    responses: Arc<RwLock<HashMap<String, MockResponse>>>,

    /// Delay before every response
    latency: Option<Duration>,

    /// Call tracking
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockFetcher {
    /// Create a new mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predefined page.
    pub fn with_page(self, url: impl AsRef<str>, html: impl Into<String>) -> Self {
        self.set_page(url, html);
        self
    }

    /// Answer `url` with a non-success status.
    pub fn with_status(self, url: impl AsRef<str>, status: u16) -> Self {
        self.insert(url.as_ref(), MockResponse::Status(status));
        self
    }

    /// Answer `url` with a non-HTML content type.
    pub fn with_non_html(self, url: impl AsRef<str>, content_type: impl Into<String>) -> Self {
        self.insert(url.as_ref(), MockResponse::NotHtml(content_type.into()));
        self
    }

    /// Redirect `from` to `to`; `to` is served from its own entry.
    pub fn with_redirect(self, from: impl AsRef<str>, to: impl Into<String>) -> Self {
        self.insert(from.as_ref(), MockResponse::Redirect(to.into()));
        self
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace a page.
    pub fn set_page(&self, url: impl AsRef<str>, html: impl Into<String>) {
        self.insert(url.as_ref(), MockResponse::Html(html.into()));
    }

    /// Remove a page; it answers 404 from now on.
    pub fn remove_page(&self, url: impl AsRef<str>) {
        self.responses
            .write()
            .unwrap()
            .remove(&urls::canonicalize(url.as_ref()));
    }

    /// URLs fetched so far, in request order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn insert(&self, url: &str, response: MockResponse) {
        self.responses
            .write()
            .unwrap()
            .insert(urls::canonicalize(url), response);
    }

    fn lookup(&self, url: &str) -> Option<MockResponse> {
        self.responses
            .read()
            .unwrap()
            .get(&urls::canonicalize(url))
            .cloned()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> CrawlResult<FetchResponse> {
        self.calls.write().unwrap().push(url.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut current = url.to_string();
        // Follow a bounded number of redirects
        for _ in 0..5 {
            match self.lookup(&current) {
                Some(MockResponse::Html(html)) => {
                    return Ok(FetchResponse { url: current, html });
                }
                Some(MockResponse::Redirect(to)) => current = to,
                Some(MockResponse::Status(status)) => {
                    return Err(CrawlError::Status { url: current, status });
                }
                Some(MockResponse::NotHtml(content_type)) => {
                    return Err(CrawlError::NotHtml {
                        url: current,
                        content_type,
                    });
                }
                None => {
                    return Err(CrawlError::Status {
                        url: current,
                        status: 404,
                    });
                }
            }
        }

        Err(CrawlError::Http(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "Mock redirect loop",
        ))))
    }
}

/// A documentation-style page: `<title>`, a `.main-content` region with
/// an intro paragraph, one `h2` per section, and a nav of links.
pub fn page_html(title: &str, intro: &str, sections: &[(&str, &str)], links: &[&str]) -> String {
    let nav: String = links
        .iter()
        .map(|href| format!(r#"<li><a href="{}">{}</a></li>"#, href, href))
        .collect();
    let parts: String = sections
        .iter()
        .map(|(heading, body)| format!("<h2>{}</h2>\n<p>{}</p>\n", heading, body))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title} | Example Docs</title></head>
<body>
<nav><ul>{nav}</ul></nav>
<div class="main-content">
<h1>{title}</h1>
<p>{intro}</p>
{parts}</div>
</body>
</html>"#
    )
}

/// A small documentation site rooted at `root`:
///
/// - `/` Home
/// - `/concepts` Concepts (two sections)
/// - `/concepts/clustering` Clustering (two sections)
/// - `/installing` Installing (one section)
/// - `/release-notes/2019` Release Notes 2019 (one section)
pub fn docs_site(root: &str) -> MockFetcher {
    let root = root.trim_end_matches('/');
    let nav = [
        "concepts",
        "concepts/clustering",
        "installing",
        "release-notes/2019",
    ]
    .map(|path| format!("{}/{}", root, path));
    let nav: Vec<&str> = nav.iter().map(String::as_str).collect();

    MockFetcher::new()
        .with_page(
            root,
            page_html("Home", "Welcome to the example documentation.", &[], &nav),
        )
        .with_page(
            format!("{}/concepts", root),
            page_html(
                "Concepts",
                "Core ideas behind the database.",
                &[
                    ("Data model", "Keys map to values of several types."),
                    ("Persistence", "Snapshots and append-only files."),
                ],
                &nav,
            ),
        )
        .with_page(
            format!("{}/concepts/clustering", root),
            page_html(
                "Clustering",
                "A cluster spreads data across nodes.",
                &[
                    ("Shards", "Each shard holds a slice of the key space."),
                    ("Replication", "Replicas keep copies of every cluster shard."),
                ],
                &nav,
            ),
        )
        .with_page(
            format!("{}/installing", root),
            page_html(
                "Installing",
                "Install the server on Linux or macOS.",
                &[("Cluster setup", "Create a cluster with three nodes.")],
                &nav,
            ),
        )
        .with_page(
            format!("{}/release-notes/2019", root),
            page_html(
                "Release Notes 2019",
                "Changes shipped in 2019.",
                &[("Fixes", "Cluster failover is faster.")],
                &nav,
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetcher_serves_canonical_urls() {
        let fetcher = MockFetcher::new().with_page("https://example.com/a", "<html></html>");

        let response = fetcher.fetch("https://example.com/a/?ref=nav").await.unwrap();

        assert_eq!(response.url, "https://example.com/a/?ref=nav");
        assert_eq!(fetcher.calls(), vec!["https://example.com/a/?ref=nav"]);
    }

    #[tokio::test]
    async fn test_mock_fetcher_unknown_is_404() {
        let fetcher = MockFetcher::new();

        let result = fetcher.fetch("https://example.com/missing").await;

        assert!(matches!(result, Err(CrawlError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_remove_page() {
        let fetcher = MockFetcher::new().with_page("https://example.com/a", "<html></html>");
        fetcher.remove_page("https://example.com/a/");

        assert!(fetcher.fetch("https://example.com/a").await.is_err());
    }

    #[test]
    fn test_page_html_fixture() {
        let html = page_html("Guide", "Intro.", &[("Setup", "Run it.")], &["/a"]);

        assert!(html.contains("<title>Guide | Example Docs</title>"));
        assert!(html.contains("<h2>Setup</h2>"));
        assert!(html.contains(r#"<a href="/a">"#));
    }
}
