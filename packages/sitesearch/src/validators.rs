//! Document validators.
//!
//! Validators run against every document produced for a page. A single
//! rejection discards the whole page, so a page is never indexed without its
//! sections (or vice versa).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::document::SearchDocument;

const NOT_FOUND_TITLE: &str = "404 Page not found";

/// Decides whether a document may be indexed.
pub trait Validator: Send + Sync {
    /// `Err(reason)` rejects the document (and with it, the page).
    fn validate(&self, doc: &SearchDocument) -> Result<(), String>;

    /// Name used in logs and rejection reports.
    fn name(&self) -> &str;
}

/// Rejects release-notes pages.
#[derive(Debug, Clone, Default)]
pub struct SkipReleaseNotes;

impl Validator for SkipReleaseNotes {
    fn validate(&self, doc: &SearchDocument) -> Result<(), String> {
        if doc.title.contains("Release Notes") {
            return Err(format!("release notes page: {}", doc.title));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "skip_release_notes"
    }
}

/// Rejects the site's "not found" page.
#[derive(Debug, Clone, Default)]
pub struct SkipNotFoundPage;

impl Validator for SkipNotFoundPage {
    fn validate(&self, doc: &SearchDocument) -> Result<(), String> {
        if doc.title.contains(NOT_FOUND_TITLE)
            || doc.hierarchy.iter().any(|title| title == NOT_FOUND_TITLE)
            || doc.url.ends_with("404.html")
        {
            return Err("404 page".to_string());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "skip_not_found_page"
    }
}

/// Rejects pages whose title contains a fixed string.
#[derive(Debug, Clone)]
pub struct SkipTitleContaining {
    pub text: String,
}

impl Validator for SkipTitleContaining {
    fn validate(&self, doc: &SearchDocument) -> Result<(), String> {
        if doc.title.contains(&self.text) {
            return Err(format!("title contains {:?}", self.text));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "skip_title_containing"
    }
}

/// Serialized validator choice in a site definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorKind {
    SkipReleaseNotes,
    SkipNotFoundPage,
    SkipTitleContaining { text: String },
}

impl ValidatorKind {
    pub fn build(&self) -> Arc<dyn Validator> {
        match self {
            ValidatorKind::SkipReleaseNotes => Arc::new(SkipReleaseNotes),
            ValidatorKind::SkipNotFoundPage => Arc::new(SkipNotFoundPage),
            ValidatorKind::SkipTitleContaining { text } => {
                Arc::new(SkipTitleContaining { text: text.clone() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::DocumentType;

    fn doc(title: &str, url: &str) -> SearchDocument {
        SearchDocument {
            doc_id: "1".to_string(),
            title: title.to_string(),
            section_title: String::new(),
            hierarchy: vec![],
            s: String::new(),
            url: url.to_string(),
            body: "body".to_string(),
            doc_type: DocumentType::Page,
            position: 0,
        }
    }

    #[test]
    fn test_skip_release_notes() {
        assert!(SkipReleaseNotes
            .validate(&doc("Title", "https://example.com/1"))
            .is_ok());
        assert!(SkipReleaseNotes
            .validate(&doc("RediSearch Release Notes 2020", "https://example.com/1"))
            .is_err());
    }

    #[test]
    fn test_skip_not_found_page() {
        assert!(SkipNotFoundPage
            .validate(&doc("Missing", "https://example.com/404.html"))
            .is_err());

        let mut nested = doc("Whatever", "https://example.com/x");
        nested.hierarchy = vec![NOT_FOUND_TITLE.to_string()];
        assert!(SkipNotFoundPage.validate(&nested).is_err());

        assert!(SkipNotFoundPage
            .validate(&doc("Guide", "https://example.com/guide"))
            .is_ok());
    }

    #[test]
    fn test_kind_builds_named_validator() {
        let kind: ValidatorKind =
            serde_json::from_str(r#"{"kind": "skip_title_containing", "text": "Draft"}"#).unwrap();
        let validator = kind.build();

        assert_eq!(validator.name(), "skip_title_containing");
        assert!(validator.validate(&doc("Draft: Setup", "https://example.com")).is_err());
    }
}
