//! Engine and key/value key names.
//!
//! Everything lives under a per-deployment prefix:
//!
//! - `{prefix}:{site_url}`: the alias queries go through
//! - `{prefix}:{site_url}-{secs}.{micros}`: one index generation
//! - `{generation}:doc:{doc_id}`: a document record written by that generation
//! - `{prefix}:{site_url}:last_indexing_time`
//! - `{prefix}:{site_url}:lock`

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The alias a site is searched through.
    pub fn index_alias(&self, site_url: &str) -> String {
        format!("{}:{}", self.prefix, site_url)
    }

    /// Name of the index generation started at `at`.
    pub fn generation(&self, site_url: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}-{}.{:06}",
            self.index_alias(site_url),
            at.timestamp(),
            at.timestamp_subsec_micros()
        )
    }

    /// Whether `index_name` is a generation of `site_url`'s alias.
    pub fn is_generation_of(&self, site_url: &str, index_name: &str) -> bool {
        let alias = self.index_alias(site_url);
        index_name
            .strip_prefix(&alias)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|stamp| {
                !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit() || c == '.')
            })
    }

    /// Key prefix the generation's index definition covers.
    pub fn index_prefix(&self, generation: &str) -> String {
        format!("{}:doc:", generation)
    }

    /// Record key for one document in a generation.
    pub fn document(&self, generation: &str, doc_id: &str) -> String {
        format!("{}{}", self.index_prefix(generation), doc_id)
    }

    /// When the site was last indexed (unix seconds).
    pub fn last_index(&self, site_url: &str) -> String {
        format!("{}:{}:last_indexing_time", self.prefix, site_url)
    }

    /// Lock held while a run for the site is in flight.
    pub fn index_lock(&self, site_url: &str) -> String {
        format!("{}:{}:lock", self.prefix, site_url)
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new("sitesearch")
    }
}
