//! Query construction.
//!
//! User input goes through a fixed cleanup (unsafe characters, literal-term
//! escaping, exact-match synonyms) and an optional section boost, and comes
//! out as a typed [`SearchQuery`] that any [`SearchEngine`] can run.
//!
//! [`SearchEngine`]: crate::engine::SearchEngine

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::types::site::SiteConfiguration;

lazy_static! {
    // Characters the engine treats as syntax and users never mean literally
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[\[\]<>+]").unwrap();
}

/// Punctuation the engine tokenizer splits on or parses as syntax.
const RESERVED_CHARS: &str = ",.<>{}[]\"':;!@#$%^&*()-+=~/\\|?";

/// Weight applied to results from the section the user is browsing.
pub const SECTION_BOOST: f64 = 10.0;

/// Default page size when the caller does not ask for one.
pub const DEFAULT_LIMIT: usize = 10;

/// Engine query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    /// Every document (`*`)
    All,

    /// Free text in engine query syntax, already escaped
    Text(String),

    /// `@field:value`
    FieldMatch { field: String, value: String },

    /// `expr => {$weight: w}`
    Weighted { expr: Box<QueryExpr>, weight: f64 },

    /// Space-separated clauses; every one must match
    And(Vec<QueryExpr>),

    /// `a | b`; any clause may match
    Or(Vec<QueryExpr>),

    /// Parenthesized sub-expression
    Group(Box<QueryExpr>),
}

impl QueryExpr {
    pub fn text(text: impl Into<String>) -> Self {
        QueryExpr::Text(text.into())
    }

    pub fn field(field: impl Into<String>, value: impl Into<String>) -> Self {
        QueryExpr::FieldMatch {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn weighted(self, weight: f64) -> Self {
        QueryExpr::Weighted {
            expr: Box::new(self),
            weight,
        }
    }

    pub fn group(self) -> Self {
        QueryExpr::Group(Box::new(self))
    }

    /// Render in engine query syntax.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::All => f.write_str("*"),
            QueryExpr::Text(text) => f.write_str(text),
            QueryExpr::FieldMatch { field, value } => write!(f, "@{}:{}", field, value),
            QueryExpr::Weighted { expr, weight } => {
                write!(f, "{} => {{$weight: {}}}", expr, weight)
            }
            QueryExpr::And(clauses) => write_joined(f, clauses, " "),
            QueryExpr::Or(clauses) => write_joined(f, clauses, " | "),
            QueryExpr::Group(expr) => write!(f, "({})", expr),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, clauses: &[QueryExpr], separator: &str) -> fmt::Result {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", clause)?;
    }
    Ok(())
}

/// Snippet settings for one or more fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Summarize {
    pub fields: Vec<String>,
    pub frags: usize,
    /// Fragment length in words
    pub len: usize,
}

/// A complete engine search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Index name or alias
    pub index: String,
    pub expr: QueryExpr,
    pub offset: usize,
    pub limit: usize,
    pub summarize: Option<Summarize>,
    pub highlight: Vec<String>,
    /// Only return these fields; `None` returns every field
    pub return_fields: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn new(index: impl Into<String>, expr: QueryExpr) -> Self {
        Self {
            index: index.into(),
            expr,
            offset: 0,
            limit: DEFAULT_LIMIT,
            summarize: None,
            highlight: Vec::new(),
            return_fields: None,
        }
    }

    pub fn paging(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn summarize(mut self, summarize: Summarize) -> Self {
        self.summarize = Some(summarize);
        self
    }

    pub fn highlight<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.highlight = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn return_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn query_string(&self) -> String {
        self.expr.render()
    }

    /// The request as an `FT.SEARCH` command line.
    pub fn to_command(&self) -> String {
        let mut command = format!("FT.SEARCH {} {}", self.index, self.expr);

        if let Some(fields) = &self.return_fields {
            command.push_str(&format!(" RETURN {} {}", fields.len(), fields.join(" ")));
        }
        if let Some(summarize) = &self.summarize {
            command.push_str(&format!(
                " SUMMARIZE FIELDS {} {} FRAGS {} LEN {}",
                summarize.fields.len(),
                summarize.fields.join(" "),
                summarize.frags,
                summarize.len
            ));
        }
        if !self.highlight.is_empty() {
            command.push_str(&format!(
                " HIGHLIGHT FIELDS {} {}",
                self.highlight.len(),
                self.highlight.join(" ")
            ));
        }
        command.push_str(&format!(" LIMIT {} {}", self.offset, self.limit));
        command
    }
}

/// Backslash-escape every reserved character in `text`.
pub fn escape_all(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED_CHARS.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes configured literal terms so the engine treats them as one token.
///
/// Matching is case-insensitive and the longest term wins. Punctuation is
/// escaped only inside matched spans; outside them `-` becomes a space.
#[derive(Debug, Clone)]
pub struct TokenEscaper {
    pattern: Option<Regex>,
}

impl TokenEscaper {
    pub fn new<I, S>(literal_terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = literal_terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        terms.dedup();

        let alternatives: Vec<String> = terms.iter().map(|term| bounded(term)).collect();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!("(?i)(?:{})", alternatives.join("|"))).ok()
        };

        Self { pattern }
    }

    pub fn escape(&self, query: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return query.replace('-', " ");
        };

        let mut out = String::with_capacity(query.len());
        let mut last = 0;
        for span in pattern.find_iter(query) {
            out.push_str(&query[last..span.start()].replace('-', " "));
            out.push_str(&escape_all(span.as_str()));
            last = span.end();
        }
        out.push_str(&query[last..].replace('-', " "));
        out
    }
}

/// Regex for one literal term, anchored on word boundaries where the term
/// starts or ends with a word character.
fn bounded(term: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');

    let mut pattern = String::new();
    if is_word(term.chars().next()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(term));
    if is_word(term.chars().last()) {
        pattern.push_str(r"\b");
    }
    pattern
}

/// Builds engine queries for one site.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    escaper: TokenEscaper,
    synonyms: HashSet<String>,
}

impl QueryBuilder {
    pub fn new(site: Arc<SiteConfiguration>) -> Self {
        Self {
            escaper: TokenEscaper::new(&site.literal_terms),
            synonyms: site.all_synonyms(),
        }
    }

    /// Clean up raw user input: unsafe characters, literal terms, and a
    /// trailing `*` on exact-match synonyms.
    pub fn clean(&self, raw: &str) -> String {
        let query = raw.trim().replace("-*", "*");
        let query = UNSAFE_CHARS.replace_all(&query, " ");
        let query = self.escaper.escape(query.trim());
        let query = query.trim();

        if let Some(stem) = query.strip_suffix('*') {
            let stem = stem.trim_end_matches('*');
            if self.synonyms.contains(&stem.to_lowercase()) {
                return stem.to_string();
            }
        }

        query.to_string()
    }

    /// Query expression for `raw`, boosted towards `section` when given.
    pub fn expression(&self, raw: &str, section: Option<&str>) -> QueryExpr {
        let query = self.clean(raw);

        match section.map(str::trim).filter(|s| !s.is_empty()) {
            Some(section) if !query.is_empty() => {
                let in_section = QueryExpr::And(vec![
                    QueryExpr::field("s", escape_all(section))
                        .group()
                        .weighted(SECTION_BOOST),
                    QueryExpr::text(query.clone()),
                ]);
                QueryExpr::Or(vec![in_section.group(), QueryExpr::text(query)])
            }
            _ => QueryExpr::text(query),
        }
    }

    /// Full search request: paging, a 10-word body snippet and highlighted
    /// title, body and section title.
    pub fn build(
        &self,
        index: &str,
        raw: &str,
        section: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> SearchQuery {
        SearchQuery::new(index, self.expression(raw, section))
            .paging(offset, limit)
            .summarize(Summarize {
                fields: vec!["body".to_string()],
                frags: 1,
                len: 10,
            })
            .highlight(["title", "body", "section_title"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::site::SynonymGroup;

    fn builder(site: SiteConfiguration) -> QueryBuilder {
        QueryBuilder::new(Arc::new(site))
    }

    fn plain() -> QueryBuilder {
        builder(SiteConfiguration::new("https://docs.example.com"))
    }

    #[test]
    fn test_strips_dash_star_postfixes() {
        assert_eq!(plain().clean("python-*"), "python*");
    }

    #[test]
    fn test_strips_unsafe_chars() {
        assert_eq!(
            plain().clean("this is a [test] of <b> and subtraction- chars+"),
            "this is a  test  of  b  and subtraction  chars"
        );
    }

    #[test]
    fn test_escapes_literal_terms_only() {
        let builder =
            builder(SiteConfiguration::new("https://docs.example.com").with_literal_term("active-active"));

        assert_eq!(
            builder.clean("Active-Active geo-distribution"),
            r"Active\-Active geo distribution"
        );
    }

    #[test]
    fn test_longest_literal_term_wins() {
        let escaper = TokenEscaper::new(["redis", "redis.conf"]);
        assert_eq!(escaper.escape("edit redis.conf"), r"edit redis\.conf");
    }

    #[test]
    fn test_literal_terms_match_whole_words() {
        let escaper = TokenEscaper::new(["6.0"]);
        assert_eq!(escaper.escape("version 6.0"), r"version 6\.0");
        assert_eq!(escaper.escape("version 16.01"), "version 16.01");
    }

    #[test]
    fn test_exact_search_for_synonym_terms() {
        let builder = builder(
            SiteConfiguration::new("https://docs.example.com")
                .with_synonym_group(SynonymGroup::new("insight", ["insight", "RedisInsight"])),
        );

        assert_eq!(builder.clean("insight*"), "insight");
        assert_eq!(builder.clean("RedisInsight*"), "RedisInsight");
    }

    #[test]
    fn test_allow_fuzzy_search_for_non_synonym_terms() {
        assert_eq!(plain().clean("test*"), "test*");
    }

    #[test]
    fn test_section_boost() {
        let expr = plain().expression("cluster", Some("concepts"));

        assert_eq!(
            expr.render(),
            "((@s:concepts) => {$weight: 10} cluster) | cluster"
        );

        let QueryExpr::Or(clauses) = &expr else {
            panic!("expected a disjunction, got {:?}", expr);
        };
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[1], QueryExpr::text("cluster"));
    }

    #[test]
    fn test_no_boost_without_query_or_section() {
        assert_eq!(plain().expression("  ", Some("concepts")), QueryExpr::text(""));
        assert_eq!(plain().expression("cluster", None), QueryExpr::text("cluster"));
        assert_eq!(plain().expression("cluster", Some("")), QueryExpr::text("cluster"));
    }

    #[test]
    fn test_build_renders_command() {
        let query = plain().build("sitesearch:https://docs.example.com", "cluster", None, 0, 30);

        assert_eq!(
            query.to_command(),
            "FT.SEARCH sitesearch:https://docs.example.com cluster \
             SUMMARIZE FIELDS 1 body FRAGS 1 LEN 10 \
             HIGHLIGHT FIELDS 3 title body section_title LIMIT 0 30"
        );
    }
}
