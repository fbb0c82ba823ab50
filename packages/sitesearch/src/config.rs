use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::crawler::{CrawlSettings, DEFAULT_CONCURRENCY};
use crate::keys::Keys;
use crate::lifecycle::{default_write_workers, IndexerSettings};
use crate::types::site::{SiteConfiguration, SiteDefinition};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub key_prefix: String,
    /// JSON file holding an array of site definitions
    pub sites_file: Option<PathBuf>,
    /// Site searched when a request names none
    pub default_site: Option<String>,
    pub indexer: IndexerSettings,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |name: &str, default: String| -> Result<u64> {
            parse_var(lookup(name).unwrap_or(default).as_str(), name)
        };

        Ok(Self {
            key_prefix: lookup("SITESEARCH_KEY_PREFIX").unwrap_or_else(|| "sitesearch".to_string()),
            sites_file: lookup("SITESEARCH_SITES_FILE").map(PathBuf::from),
            default_site: lookup("SITESEARCH_DEFAULT_SITE"),
            indexer: IndexerSettings {
                debounce: Duration::from_secs(parse("INDEX_DEBOUNCE_SECS", "300".to_string())?),
                lock_ttl: Duration::from_secs(parse("INDEX_LOCK_TTL_SECS", "3600".to_string())?),
                write_workers: parse("INDEX_WRITE_WORKERS", default_write_workers().to_string())?
                    as usize,
                queue_capacity: parse("INDEX_QUEUE_CAPACITY", "1000".to_string())? as usize,
                crawl: CrawlSettings {
                    concurrency: parse("CRAWL_CONCURRENCY", DEFAULT_CONCURRENCY.to_string())?
                        as usize,
                    max_pages: lookup("CRAWL_MAX_PAGES")
                        .map(|value| parse_var(&value, "CRAWL_MAX_PAGES"))
                        .transpose()?,
                },
            },
        })
    }

    pub fn keys(&self) -> Keys {
        Keys::new(self.key_prefix.clone())
    }

    /// Sites from `sites_file`, or none when it is not set.
    pub fn load_sites(&self) -> Result<Vec<Arc<SiteConfiguration>>> {
        match &self.sites_file {
            Some(path) => load_sites(path),
            None => Ok(Vec::new()),
        }
    }
}

fn parse_var<T>(value: &str, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a valid number", name))
}

/// Read a JSON array of site definitions.
pub fn load_sites(path: &Path) -> Result<Vec<Arc<SiteConfiguration>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sites file {}", path.display()))?;
    parse_sites(&raw).with_context(|| format!("Invalid sites file {}", path.display()))
}

pub fn parse_sites(raw: &str) -> Result<Vec<Arc<SiteConfiguration>>> {
    let definitions: Vec<SiteDefinition> =
        serde_json::from_str(raw).context("Sites must be a JSON array of site definitions")?;

    definitions
        .into_iter()
        .map(|definition| {
            let url = definition.url.clone();
            SiteConfiguration::from_definition(definition)
                .map(Arc::new)
                .with_context(|| format!("Invalid site {}", url))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.key_prefix, "sitesearch");
        assert_eq!(config.sites_file, None);
        assert_eq!(config.indexer.debounce, Duration::from_secs(300));
        assert_eq!(config.indexer.lock_ttl, Duration::from_secs(3600));
        assert_eq!(config.indexer.queue_capacity, 1000);
        assert_eq!(config.indexer.crawl, CrawlSettings::default());
        assert_eq!(config.keys().prefix(), "sitesearch");
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SITESEARCH_KEY_PREFIX", "docs"),
            ("SITESEARCH_DEFAULT_SITE", "https://docs.example.com"),
            ("INDEX_DEBOUNCE_SECS", "0"),
            ("INDEX_WRITE_WORKERS", "3"),
            ("CRAWL_CONCURRENCY", "2"),
            ("CRAWL_MAX_PAGES", "50"),
        ]))
        .unwrap();

        assert_eq!(config.key_prefix, "docs");
        assert_eq!(config.default_site.as_deref(), Some("https://docs.example.com"));
        assert_eq!(config.indexer.debounce, Duration::ZERO);
        assert_eq!(config.indexer.write_workers, 3);
        assert_eq!(config.indexer.crawl.concurrency, 2);
        assert_eq!(config.indexer.crawl.max_pages, Some(50));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("INDEX_LOCK_TTL_SECS", "soon")])).unwrap_err();

        assert!(err.to_string().contains("INDEX_LOCK_TTL_SECS"));
    }

    #[test]
    fn test_parse_sites() {
        let sites = parse_sites(
            r#"[
                {"url": "https://docs.example.com", "content_selectors": [".main-content"]},
                {"url": "https://other.example.com", "literal_terms": ["active-active"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(sites.len(), 2);
        assert_eq!(sites[1].url, "https://other.example.com");
    }

    #[test]
    fn test_parse_sites_names_bad_site() {
        let err = parse_sites(r#"[{"url": "https://docs.example.com", "deny": ["("]}]"#).unwrap_err();

        assert!(format!("{:#}", err).contains("https://docs.example.com"));
    }
}
