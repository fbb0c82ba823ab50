//! Query-time service: site selection, query building, result shaping.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::engine::{SearchEngine, SearchHit};
use crate::error::SiteError;
use crate::keys::Keys;
use crate::query::QueryBuilder;
use crate::types::site::{LandingPage, SiteConfiguration};
use crate::urls;

pub const DEFAULT_NUM: usize = 30;
pub const MAX_NUM: usize = 100;

/// Bodies longer than this many characters are cut and end in `...`.
pub const MAX_BODY_LENGTH: usize = 100;

/// Search parameters as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub q: String,
    /// Page the user is searching from; selects the boosted section
    #[serde(default)]
    pub from_url: Option<String>,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub num: Option<usize>,
    /// Site URL; the default site when absent or unknown
    #[serde(default)]
    pub site: Option<String>,
}

impl SearchRequest {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            ..Default::default()
        }
    }

    pub fn from_url(mut self, url: impl Into<String>) -> Self {
        self.from_url = Some(url.into());
        self
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn paging(mut self, start: usize, num: usize) -> Self {
        self.start = start;
        self.num = Some(num);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub section_title: String,
    pub hierarchy: Vec<String>,
    pub body: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub engine: bool,
    pub default_index: bool,
}

impl HealthStatus {
    pub fn healthy(&self) -> bool {
        self.engine && self.default_index
    }
}

struct SearchSite {
    config: Arc<SiteConfiguration>,
    builder: QueryBuilder,
}

/// Serves queries for every configured site.
pub struct SearchService {
    engine: Arc<dyn SearchEngine>,
    keys: Keys,
    sites: HashMap<String, SearchSite>,
    default_site: String,
}

impl SearchService {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        keys: Keys,
        sites: Vec<Arc<SiteConfiguration>>,
        default_site: &str,
    ) -> Result<Self, SiteError> {
        let sites: HashMap<String, SearchSite> = sites
            .into_iter()
            .map(|config| {
                let builder = QueryBuilder::new(config.clone());
                (config.url.clone(), SearchSite { config, builder })
            })
            .collect();

        if !sites.contains_key(default_site) {
            return Err(SiteError::UnknownDefaultSite(default_site.to_string()));
        }

        Ok(Self {
            engine,
            keys,
            sites,
            default_site: default_site.to_string(),
        })
    }

    fn resolve_site(&self, url: Option<&str>) -> Option<&SearchSite> {
        url.and_then(|url| self.sites.get(url))
            .or_else(|| self.sites.get(&self.default_site))
    }

    /// Configuration of `url`, or of the default site.
    pub fn site(&self, url: Option<&str>) -> Option<Arc<SiteConfiguration>> {
        self.resolve_site(url).map(|site| site.config.clone())
    }

    /// Run a search. Engine errors are logged and yield an empty response.
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        let Some(site) = self.resolve_site(request.site.as_deref()) else {
            return SearchResponse::default();
        };
        if request.q.trim().is_empty() {
            return SearchResponse::default();
        }

        let section = request
            .from_url
            .as_deref()
            .map(|from_url| urls::section_of(&site.config.url, from_url))
            .unwrap_or_default();
        let num = request.num.unwrap_or(DEFAULT_NUM).min(MAX_NUM);

        let alias = self.keys.index_alias(&site.config.url);
        let query = site
            .builder
            .build(&alias, &request.q, Some(section.as_str()), request.start, num);
        debug!(site = %site.config.url, command = %query.to_command(), "Running search");

        let (total, hits) = match self.engine.search(&query).await {
            Ok(results) => (results.total, results.hits),
            Err(e) => {
                error!(site = %site.config.url, query = %query.query_string(), error = %e, "Search query failed");
                (0, Vec::new())
            }
        };

        SearchResponse {
            total,
            results: transform(&hits, site.config.landing_page(&request.q)),
        }
    }

    /// Engine reachable and the default site's index searchable.
    pub async fn health(&self) -> HealthStatus {
        if let Err(e) = self.engine.ping().await {
            error!(error = %e, "Search engine ping failed");
            return HealthStatus {
                engine: false,
                default_index: false,
            };
        }

        let alias = self.keys.index_alias(&self.default_site);
        let default_index = match self.engine.index_exists(&alias).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(alias = %alias, error = %e, "Default index check failed");
                false
            }
        };

        HealthStatus {
            engine: true,
            default_index,
        }
    }
}

/// Shape engine hits into results, pinning `landing` first.
pub fn transform(hits: &[SearchHit], landing: Option<LandingPage>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = hits.iter().map(to_result).collect();

    if let Some(landing) = landing {
        // The landing page replaces a hit for the same page
        results.retain(|result| strip_highlight(&result.title) != landing.title);
        results.insert(
            0,
            SearchResult {
                body: elide(&landing.body, MAX_BODY_LENGTH),
                title: landing.title,
                section_title: landing.section_title,
                hierarchy: landing.hierarchy,
                url: landing.url,
            },
        );
    }

    results
}

fn to_result(hit: &SearchHit) -> SearchResult {
    let hierarchy = match serde_json::from_str::<Vec<String>>(hit.field("hierarchy")) {
        Ok(hierarchy) => hierarchy,
        Err(e) => {
            warn!(key = %hit.key, error = %e, "Bad hierarchy data");
            Vec::new()
        }
    };

    SearchResult {
        title: hit.field("title").to_string(),
        section_title: hit.field("section_title").to_string(),
        hierarchy,
        body: elide(hit.field("body"), MAX_BODY_LENGTH),
        url: hit.field("url").to_string(),
    }
}

/// Cut `text` to `max_length` characters followed by `...`.
pub fn elide(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_length).collect();
    format!("{}...", cut)
}

fn strip_highlight(text: &str) -> String {
    text.replace("<b>", "").replace("</b>", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, hierarchy: &str, body: &str) -> SearchHit {
        SearchHit {
            key: format!("k:{}", title),
            score: 1.0,
            fields: HashMap::from([
                ("title".to_string(), title.to_string()),
                ("section_title".to_string(), String::new()),
                ("hierarchy".to_string(), hierarchy.to_string()),
                ("body".to_string(), body.to_string()),
                ("url".to_string(), "https://docs.example.com/a".to_string()),
            ]),
        }
    }

    fn landing() -> LandingPage {
        LandingPage {
            title: "Clustering".to_string(),
            section_title: String::new(),
            hierarchy: vec!["Concepts".to_string()],
            body: "All about clusters.".to_string(),
            url: "https://docs.example.com/concepts/clustering".to_string(),
        }
    }

    #[test]
    fn test_elide() {
        assert_eq!(elide("short", 100), "short");
        let long = "x".repeat(150);
        let elided = elide(&long, 100);
        assert_eq!(elided.len(), 103);
        assert!(elided.ends_with("..."));
        assert_eq!(elide("ééé", 2), "éé...");
    }

    #[test]
    fn test_transform_decodes_hierarchy() {
        let results = transform(&[hit("A", r#"["One","Two"]"#, "Body")], None);

        assert_eq!(results[0].hierarchy, vec!["One", "Two"]);
        assert_eq!(results[0].body, "Body");
    }

    #[test]
    fn test_bad_hierarchy_becomes_empty() {
        let results = transform(&[hit("A", "not json", "Body")], None);

        assert!(results[0].hierarchy.is_empty());
    }

    #[test]
    fn test_landing_page_pinned_and_deduplicated() {
        let hits = vec![
            hit("Install", "[]", "Install it."),
            hit("<b>Clustering</b>", "[]", "Clusters."),
        ];

        let results = transform(&hits, Some(landing()));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Clustering");
        assert_eq!(results[0].url, "https://docs.example.com/concepts/clustering");
        assert_eq!(results[1].title, "Install");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: SearchRequest = serde_json::from_str(r#"{"q": "cluster"}"#).unwrap();

        assert_eq!(request, SearchRequest::new("cluster"));
        assert_eq!(request.num, None);
    }
}
