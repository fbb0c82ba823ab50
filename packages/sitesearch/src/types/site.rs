//! Per-site configuration.
//!
//! A `SiteConfiguration` is built once at startup (usually from a JSON
//! `SiteDefinition`) and shared read-only as `Arc<SiteConfiguration>` by the
//! crawler, the parser, the lifecycle manager and the query builder.

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::SiteError;
use crate::scoring::{Scorer, ScorerKind};
use crate::validators::{Validator, ValidatorKind};

/// Default lower bound for a document's ad-hoc score.
///
/// The engine multiplies this score by the term-frequency score, so zero
/// would hide a document from every query.
pub const DEFAULT_SCORE_FLOOR: f64 = 0.1;

/// A set of interchangeable terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymGroup {
    pub group_id: String,
    pub synonyms: BTreeSet<String>,
}

impl SynonymGroup {
    pub fn new<I, S>(group_id: impl Into<String>, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_id: group_id.into(),
            synonyms: synonyms.into_iter().map(Into::into).collect(),
        }
    }
}

/// Engine field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Tag,
}

/// One field of the engine schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub no_stem: bool,
}

fn default_weight() -> f64 {
    1.0
}

impl SchemaField {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Text,
            weight: 1.0,
            no_stem: false,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Tag,
            ..Self::text(name)
        }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn no_stem(mut self) -> Self {
        self.no_stem = true;
        self
    }
}

/// The schema every documentation site uses unless it says otherwise.
pub fn default_schema() -> Vec<SchemaField> {
    vec![
        SchemaField::text("title").weight(10.0),
        SchemaField::text("section_title"),
        SchemaField::text("body").weight(1.5),
        SchemaField::text("url"),
        SchemaField::text("s").no_stem(),
        SchemaField::tag("doc_id"),
    ]
}

/// A curated result pinned to the top for an exact query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandingPage {
    pub title: String,
    #[serde(default)]
    pub section_title: String,
    #[serde(default)]
    pub hierarchy: Vec<String>,
    pub body: String,
    /// Path relative to the site URL
    pub url: String,
}

/// Static, immutable configuration for one indexed site.
#[derive(Clone)]
pub struct SiteConfiguration {
    /// Seed URL; also the root every indexed URL must start with
    pub url: String,
    pub allowed_domains: Vec<String>,
    pub allow: Vec<Regex>,
    pub deny: Vec<Regex>,
    /// CSS selectors for the main content region, first match wins
    pub content_selectors: Vec<String>,
    pub validators: Vec<Arc<dyn Validator>>,
    pub scorers: Vec<Arc<dyn Scorer>>,
    pub score_floor: f64,
    pub synonym_groups: Vec<SynonymGroup>,
    pub literal_terms: Vec<String>,
    pub schema: Vec<SchemaField>,
    pub landing_pages: HashMap<String, LandingPage>,
}

impl fmt::Debug for SiteConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConfiguration")
            .field("url", &self.url)
            .field("allowed_domains", &self.allowed_domains)
            .field("allow", &self.allow)
            .field("deny", &self.deny)
            .field("content_selectors", &self.content_selectors)
            .field(
                "validators",
                &self.validators.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .field(
                "scorers",
                &self.scorers.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("score_floor", &self.score_floor)
            .field("synonym_groups", &self.synonym_groups.len())
            .field("literal_terms", &self.literal_terms.len())
            .finish()
    }
}

impl SiteConfiguration {
    /// Create a configuration with the default schema and no rules.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            allowed_domains: Vec::new(),
            allow: Vec::new(),
            deny: Vec::new(),
            content_selectors: Vec::new(),
            validators: Vec::new(),
            scorers: Vec::new(),
            score_floor: DEFAULT_SCORE_FLOOR,
            synonym_groups: Vec::new(),
            literal_terms: Vec::new(),
            schema: default_schema(),
            landing_pages: HashMap::new(),
        }
    }

    pub fn with_allowed_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.push(domain.into());
        self
    }

    pub fn with_allow(mut self, pattern: Regex) -> Self {
        self.allow.push(pattern);
        self
    }

    pub fn with_deny(mut self, pattern: Regex) -> Self {
        self.deny.push(pattern);
        self
    }

    pub fn with_content_selector(mut self, selector: impl Into<String>) -> Self {
        self.content_selectors.push(selector.into());
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn with_scorer(mut self, scorer: impl Scorer + 'static) -> Self {
        self.scorers.push(Arc::new(scorer));
        self
    }

    pub fn with_synonym_group(mut self, group: SynonymGroup) -> Self {
        self.synonym_groups.push(group);
        self
    }

    pub fn with_literal_term(mut self, term: impl Into<String>) -> Self {
        self.literal_terms.push(term.into());
        self
    }

    pub fn with_landing_page(mut self, query: impl Into<String>, page: LandingPage) -> Self {
        self.landing_pages.insert(query.into().to_lowercase(), page);
        self
    }

    /// Every synonym across all groups, lowercased.
    pub fn all_synonyms(&self) -> HashSet<String> {
        self.synonym_groups
            .iter()
            .flat_map(|group| group.synonyms.iter())
            .map(|term| term.to_lowercase())
            .collect()
    }

    /// The landing page pinned to `query`, with its URL made absolute.
    pub fn landing_page(&self, query: &str) -> Option<LandingPage> {
        let page = self.landing_pages.get(&query.trim().to_lowercase())?;
        let separator = if self.url.ends_with('/') { "" } else { "/" };
        Some(LandingPage {
            url: format!("{}{}{}", self.url, separator, page.url),
            ..page.clone()
        })
    }

    /// Build a configuration from its serialized definition, compiling
    /// patterns and checking selectors up front.
    pub fn from_definition(definition: SiteDefinition) -> Result<Self, SiteError> {
        Url::parse(&definition.url).map_err(|source| SiteError::InvalidUrl {
            url: definition.url.clone(),
            source,
        })?;

        let compile = |patterns: &[String]| -> Result<Vec<Regex>, SiteError> {
            patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| SiteError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect()
        };

        for selector in &definition.content_selectors {
            Selector::parse(selector)
                .map_err(|_| SiteError::InvalidSelector(selector.clone()))?;
        }

        let score_floor = definition.score_floor.unwrap_or(DEFAULT_SCORE_FLOOR);
        if score_floor <= 0.0 {
            return Err(SiteError::InvalidScoreFloor(score_floor));
        }

        Ok(Self {
            allow: compile(&definition.allow)?,
            deny: compile(&definition.deny)?,
            validators: definition
                .validators
                .iter()
                .map(ValidatorKind::build)
                .collect(),
            scorers: definition
                .scorers
                .iter()
                .map(|kind| kind.build(&definition.url))
                .collect(),
            score_floor,
            schema: definition.schema.unwrap_or_else(default_schema),
            landing_pages: definition
                .landing_pages
                .into_iter()
                .map(|(query, page)| (query.to_lowercase(), page))
                .collect(),
            url: definition.url,
            allowed_domains: definition.allowed_domains,
            content_selectors: definition.content_selectors,
            synonym_groups: definition.synonym_groups,
            literal_terms: definition.literal_terms,
        })
    }
}

/// Serialized form of a site, as stored in the sites file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDefinition {
    pub url: String,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub content_selectors: Vec<String>,
    #[serde(default)]
    pub validators: Vec<ValidatorKind>,
    #[serde(default)]
    pub scorers: Vec<ScorerKind>,
    #[serde(default)]
    pub score_floor: Option<f64>,
    #[serde(default)]
    pub synonym_groups: Vec<SynonymGroup>,
    #[serde(default)]
    pub literal_terms: Vec<String>,
    #[serde(default)]
    pub schema: Option<Vec<SchemaField>>,
    #[serde(default)]
    pub landing_pages: HashMap<String, LandingPage>,
}
