//! Search documents - the indexable units produced from crawled pages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Field holding the ad-hoc document score in an engine record.
pub const SCORE_FIELD: &str = "__score";

/// Whether a document covers a whole page or one heading's section of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Page,
    Section,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Page => "page",
            DocumentType::Section => "section",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexable unit.
///
/// Documents are never updated in place: `doc_id` is derived from content, so
/// an edited page produces new identifiers and the old ones become stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Content-addressed identifier, unique within a run
    pub doc_id: String,

    /// Page title
    pub title: String,

    /// Heading text; empty for page documents
    pub section_title: String,

    /// Breadcrumb titles above this document, root excluded
    pub hierarchy: Vec<String>,

    /// Top-level path segment of the URL relative to the site root
    pub s: String,

    /// Canonical URL (no query string, no trailing slash)
    pub url: String,

    /// Normalized plain text
    pub body: String,

    #[serde(rename = "type")]
    pub doc_type: DocumentType,

    /// Ordinal among sibling sections; 0 for pages
    pub position: usize,
}

impl SearchDocument {
    pub fn is_page(&self) -> bool {
        self.doc_type == DocumentType::Page
    }

    /// Flatten into the field map written to the engine.
    ///
    /// The hierarchy is stored as a JSON array so it survives the engine's
    /// string-only fields.
    pub fn to_fields(&self, score: f64) -> HashMap<String, String> {
        let hierarchy =
            serde_json::to_string(&self.hierarchy).unwrap_or_else(|_| "[]".to_string());

        HashMap::from([
            ("doc_id".to_string(), self.doc_id.clone()),
            ("title".to_string(), self.title.clone()),
            ("section_title".to_string(), self.section_title.clone()),
            ("hierarchy".to_string(), hierarchy),
            ("s".to_string(), self.s.clone()),
            ("url".to_string(), self.url.clone()),
            ("body".to_string(), self.body.clone()),
            ("type".to_string(), self.doc_type.to_string()),
            ("position".to_string(), self.position.to_string()),
            (SCORE_FIELD.to_string(), score.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> SearchDocument {
        SearchDocument {
            doc_id: "https://docs.example.com/a:section:abc".to_string(),
            title: "Clustering".to_string(),
            section_title: "Shards".to_string(),
            hierarchy: vec!["Concepts".to_string(), "Clustering".to_string()],
            s: "concepts".to_string(),
            url: "https://docs.example.com/a".to_string(),
            body: "Shards hold data.".to_string(),
            doc_type: DocumentType::Section,
            position: 2,
        }
    }

    #[test]
    fn test_to_fields_encodes_hierarchy_as_json() {
        let fields = section().to_fields(0.5);

        assert_eq!(fields["hierarchy"], r#"["Concepts","Clustering"]"#);
        assert_eq!(fields["type"], "section");
        assert_eq!(fields["position"], "2");
        assert_eq!(fields[SCORE_FIELD], "0.5");
    }

    #[test]
    fn test_document_type_serializes_lowercase() {
        let json = serde_json::to_string(&section()).unwrap();
        assert!(json.contains(r#""type":"section""#));
    }
}
