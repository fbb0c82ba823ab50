//! Ad-hoc document scoring.
//!
//! Every document starts at 1.0 and each configured scorer adjusts the
//! running score in order. The engine multiplies the result by its own
//! term-frequency score at query time, so the final value is clamped to the
//! site's floor rather than allowed to reach zero.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::document::SearchDocument;
use crate::urls;

/// Adjusts a document's running score.
pub trait Scorer: Send + Sync {
    fn score(&self, doc: &SearchDocument, current: f64) -> f64;

    fn name(&self) -> &str;
}

/// Multiply page documents by `factor` (below 1.0 favours sections).
#[derive(Debug, Clone)]
pub struct BoostPages {
    pub factor: f64,
}

impl Scorer for BoostPages {
    fn score(&self, doc: &SearchDocument, current: f64) -> f64 {
        if doc.is_page() {
            current * self.factor
        } else {
            current
        }
    }

    fn name(&self) -> &str {
        "boost_pages"
    }
}

/// Multiply section documents by `factor`.
#[derive(Debug, Clone)]
pub struct BoostSections {
    pub factor: f64,
}

impl Scorer for BoostSections {
    fn score(&self, doc: &SearchDocument, current: f64) -> f64 {
        if doc.is_page() {
            current
        } else {
            current * self.factor
        }
    }

    fn name(&self) -> &str {
        "boost_sections"
    }
}

/// Shallower pages rank higher: `score / (1 + rate * depth)`, where depth
/// counts path segments below the site root.
#[derive(Debug, Clone)]
pub struct DepthDecay {
    pub root_url: String,
    pub rate: f64,
}

impl Scorer for DepthDecay {
    fn score(&self, doc: &SearchDocument, current: f64) -> f64 {
        let depth = urls::relative_segments(&self.root_url, &doc.url).len();
        current / (1.0 + self.rate * depth as f64)
    }

    fn name(&self) -> &str {
        "depth_decay"
    }
}

/// Serialized scorer choice in a site definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScorerKind {
    BoostPages { factor: f64 },
    BoostSections { factor: f64 },
    DepthDecay { rate: f64 },
}

impl ScorerKind {
    pub fn build(&self, root_url: &str) -> Arc<dyn Scorer> {
        match self {
            ScorerKind::BoostPages { factor } => Arc::new(BoostPages { factor: *factor }),
            ScorerKind::BoostSections { factor } => Arc::new(BoostSections { factor: *factor }),
            ScorerKind::DepthDecay { rate } => Arc::new(DepthDecay {
                root_url: root_url.to_string(),
                rate: *rate,
            }),
        }
    }
}

/// Run the scorer chain and clamp the result to `floor`.
pub fn score_document(doc: &SearchDocument, scorers: &[Arc<dyn Scorer>], floor: f64) -> f64 {
    let score = scorers
        .iter()
        .fold(1.0, |running, scorer| scorer.score(doc, running));
    score.max(floor)
}
