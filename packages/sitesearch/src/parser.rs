//! HTML page → search documents.
//!
//! One fetched page becomes one page document plus one section document per
//! heading in the content region. The page is accepted or rejected as a
//! unit.

use scraper::{ElementRef, Html, Node, Selector};
use std::sync::Arc;
use tracing::debug;

use crate::error::ParseError;
use crate::fingerprint;
use crate::hierarchy::HierarchyResolver;
use crate::query::{escape_all, TokenEscaper};
use crate::types::document::{DocumentType, SearchDocument};
use crate::types::site::SiteConfiguration;
use crate::urls;

/// Elements whose text is never content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements that flow inside a sentence and get no separating space.
const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "code", "em", "i", "kbd", "mark", "small", "span", "strong", "sub", "sup",
];

/// Documents produced from one accepted page.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub page: SearchDocument,
    pub sections: Vec<SearchDocument>,
}

impl ParsedPage {
    /// Page document first, then sections in document order.
    pub fn documents(&self) -> impl Iterator<Item = &SearchDocument> {
        std::iter::once(&self.page).chain(self.sections.iter())
    }

    pub fn into_documents(self) -> Vec<SearchDocument> {
        let mut docs = Vec::with_capacity(self.sections.len() + 1);
        docs.push(self.page);
        docs.extend(self.sections);
        docs
    }
}

/// Turns fetched HTML into documents for one site.
pub struct DocumentParser {
    site: Arc<SiteConfiguration>,
    content_selectors: Vec<Selector>,
    escaper: TokenEscaper,
}

impl DocumentParser {
    pub fn new(site: Arc<SiteConfiguration>) -> Self {
        // Selectors are checked when the site definition is loaded; anything
        // that still fails to parse here is ignored.
        let content_selectors = site
            .content_selectors
            .iter()
            .filter_map(|selector| Selector::parse(selector).ok())
            .collect();

        let escaper = TokenEscaper::new(&site.literal_terms);

        Self {
            site,
            content_selectors,
            escaper,
        }
    }

    /// Parse one page.
    ///
    /// `hierarchy` holds the titles of pages accepted earlier in the run;
    /// the caller records this page's title once the page is accepted.
    pub fn parse(
        &self,
        url: &str,
        html: &str,
        hierarchy: &HierarchyResolver,
    ) -> Result<ParsedPage, ParseError> {
        let url = urls::canonicalize(url);
        let document = Html::parse_document(html);

        let title = extract_title(&document)
            .map(|title| self.escaper.escape(&title))
            .ok_or_else(|| ParseError::MissingTitle { url: url.clone() })?;

        let region = self
            .content_selectors
            .iter()
            .find_map(|selector| document.select(selector).next())
            .unwrap_or_else(|| document.root_element());

        let s = escape_all(&urls::section_of(&self.site.url, &url));
        let trail = hierarchy.trail(&url, &title);

        // Indexed text carries the same literal-term escaping as queries
        let body = self.escaper.escape(&element_text(region));
        let page = SearchDocument {
            doc_id: fingerprint::page_id(&url, &body, &title),
            title: title.clone(),
            section_title: String::new(),
            hierarchy: trail.clone(),
            s: s.clone(),
            url: url.clone(),
            body,
            doc_type: DocumentType::Page,
            position: 0,
        };

        let sections = extract_sections(region)
            .into_iter()
            .enumerate()
            .map(|(position, (section_title, body))| {
                let section_title = self.escaper.escape(&section_title);
                let body = self.escaper.escape(&body);
                SearchDocument {
                    doc_id: fingerprint::section_id(&url, position, &body, &title, &section_title),
                    title: title.clone(),
                    section_title,
                    hierarchy: trail.clone(),
                    s: s.clone(),
                    url: url.clone(),
                    body,
                    doc_type: DocumentType::Section,
                    position,
                }
            })
            .collect::<Vec<_>>();

        let parsed = ParsedPage { page, sections };
        self.validate(&parsed)?;

        debug!(url = %url, sections = parsed.sections.len(), "Parsed page");
        Ok(parsed)
    }

    fn validate(&self, parsed: &ParsedPage) -> Result<(), ParseError> {
        for doc in parsed.documents() {
            for validator in &self.site.validators {
                if let Err(reason) = validator.validate(doc) {
                    return Err(ParseError::Rejected {
                        url: doc.url.clone(),
                        validator: validator.name().to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }
}

/// `<title>` text before the first `|`, normalized, `#` removed.
fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let raw = document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())?;

    let before_pipe = raw.split('|').next().unwrap_or_default();
    let title = normalize(&before_pipe.replace('#', ""));
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// (heading title, section body) pairs for the region's `h2`s, or its `h3`s
/// when it has no `h2`.
fn extract_sections(region: ElementRef) -> Vec<(String, String)> {
    for level in ["h2", "h3"] {
        let Ok(selector) = Selector::parse(level) else {
            continue;
        };
        let headings: Vec<ElementRef> = region.select(&selector).collect();
        if headings.is_empty() {
            continue;
        }

        return headings
            .into_iter()
            .map(|heading| (heading_title(heading), section_body(heading, level)))
            .collect();
    }
    Vec::new()
}

fn heading_title(heading: ElementRef) -> String {
    let has_own_text = heading.children().any(|child| match child.value() {
        Node::Text(text) => !text.trim().is_empty(),
        _ => false,
    });
    if has_own_text {
        return element_text(heading);
    }

    // Headings that only wrap an anchor take the link text
    if let Ok(link) = Selector::parse("a") {
        if let Some(anchor) = heading.select(&link).next() {
            let text = element_text(anchor);
            if !text.is_empty() {
                return text;
            }
        }
    }

    element_text(heading)
}

/// Text of every sibling after `heading` up to the next heading of the same
/// level.
fn section_body(heading: ElementRef, level: &str) -> String {
    let mut out = String::new();
    for sibling in heading.next_siblings() {
        match sibling.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                if element.name() == level {
                    break;
                }
                if let Some(sibling) = ElementRef::wrap(sibling) {
                    collect_text(sibling, &mut out);
                }
            }
            _ => {}
        }
    }
    normalize(&out)
}

/// Normalized plain text of an element, script and style excluded.
pub(crate) fn element_text(element: ElementRef) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    normalize(&out)
}

fn collect_text(element: ElementRef, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    let block = !INLINE_ELEMENTS.contains(&name);
    if block {
        out.push(' ');
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }

    if block {
        out.push(' ');
    }
}

/// Collapse whitespace runs (newlines included) into single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
