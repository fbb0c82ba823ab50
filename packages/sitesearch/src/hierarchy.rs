//! Breadcrumb reconstruction from URLs seen during a run.
//!
//! Resolution is best-effort and order-dependent: documents are resolved as
//! they are produced, so an ancestor page that has not been crawled yet is
//! simply missing from a descendant's trail.

use std::collections::HashMap;
use tracing::debug;

use crate::urls;

/// Map of canonical URL to page title, owned by one run.
#[derive(Debug, Clone)]
pub struct HierarchyResolver {
    root_url: String,
    titles: HashMap<String, String>,
}

impl HierarchyResolver {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into().trim_end_matches('/').to_string(),
            titles: HashMap::new(),
        }
    }

    /// Remember the title of a page.
    pub fn record(&mut self, url: &str, title: &str) {
        self.titles.insert(urls::canonicalize(url), title.to_string());
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Titles of every known page along `url`'s path, root excluded.
    ///
    /// For `https://docs.example.com/ri/using/cluster` this looks up
    /// `.../ri`, `.../ri/using` and `.../ri/using/cluster` in that order.
    pub fn resolve(&self, url: &str) -> Vec<String> {
        let url = urls::canonicalize(url);
        let segments = urls::relative_segments(&self.root_url, &url);

        let mut prefix = self.root_url.clone();
        let mut hierarchy = Vec::new();
        for segment in segments {
            prefix.push('/');
            prefix.push_str(segment);
            if let Some(title) = self.titles.get(&prefix) {
                hierarchy.push(title.clone());
            }
        }

        if hierarchy.is_empty() {
            debug!(url = %url, "URL lacks hierarchy");
        }

        hierarchy
    }

    /// Trail for a page that is being parsed and has not been recorded yet:
    /// its known ancestors followed by its own `title`.
    pub fn trail(&self, url: &str, title: &str) -> Vec<String> {
        let url = urls::canonicalize(url);
        let mut hierarchy = self.resolve(&url);

        let is_root = urls::relative_segments(&self.root_url, &url).is_empty();
        if !is_root && !self.titles.contains_key(&url) {
            hierarchy.push(title.to_string());
        }

        hierarchy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_known_prefixes_in_order() {
        let mut resolver = HierarchyResolver::new("https://docs.example.com/latest/");
        resolver.record("https://docs.example.com/latest", "Docs");
        resolver.record("https://docs.example.com/latest/ri/", "RedisInsight");
        resolver.record("https://docs.example.com/latest/ri/using", "Using RedisInsight");
        resolver.record(
            "https://docs.example.com/latest/ri/using/cluster-management",
            "Cluster Management",
        );

        assert_eq!(
            resolver.resolve("https://docs.example.com/latest/ri/using/cluster-management/"),
            vec!["RedisInsight", "Using RedisInsight", "Cluster Management"]
        );
    }

    #[test]
    fn test_unknown_ancestors_are_skipped() {
        let mut resolver = HierarchyResolver::new("https://docs.example.com");
        resolver.record("https://docs.example.com/a/b/c", "C");

        // "/a" and "/a/b" have not been crawled yet
        assert_eq!(resolver.resolve("https://docs.example.com/a/b/c"), vec!["C"]);
    }

    #[test]
    fn test_trail_ends_with_own_title() {
        let mut resolver = HierarchyResolver::new("https://docs.example.com");
        resolver.record("https://docs.example.com/concepts", "Concepts");

        assert_eq!(
            resolver.trail("https://docs.example.com/concepts/clustering/", "Clustering"),
            vec!["Concepts", "Clustering"]
        );
        assert!(resolver.trail("https://docs.example.com", "Home").is_empty());
    }

    #[test]
    fn test_root_is_excluded() {
        let mut resolver = HierarchyResolver::new("https://docs.example.com");
        resolver.record("https://docs.example.com", "Home");

        assert!(resolver.resolve("https://docs.example.com/").is_empty());
    }
}
