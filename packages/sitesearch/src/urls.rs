//! URL helpers shared by the crawler, the parser and the hierarchy resolver.

/// Strip query string, fragment and trailing slashes.
pub fn canonicalize(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].trim_end_matches('/').to_string()
}

/// Path segments of `url` below `root_url`, empty segments removed.
///
/// Returns an empty list when `url` is not under `root_url`.
pub fn relative_segments<'a>(root_url: &str, url: &'a str) -> Vec<&'a str> {
    let root = root_url.trim_end_matches('/');
    match url.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            rest.split('/').filter(|part| !part.is_empty()).collect()
        }
        _ => Vec::new(),
    }
}

/// Whether `url` is `root_url` itself or a page below it.
pub fn is_under(root_url: &str, url: &str) -> bool {
    let root = canonicalize(root_url);
    let url = canonicalize(url);
    match url.strip_prefix(&root) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The "section" of a URL: the first path segment above the site root.
///
/// For the root `https://docs.example.com/latest` and the URL
/// `https://docs.example.com/latest/first/second`, the section is `first`.
pub fn section_of(root_url: &str, url: &str) -> String {
    let url = canonicalize(url);
    relative_segments(root_url, &url)
        .first()
        .map(|segment| segment.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_query_and_trailing_slash() {
        assert_eq!(
            canonicalize("https://docs.example.com/a/b/?x=1"),
            "https://docs.example.com/a/b"
        );
        assert_eq!(
            canonicalize("https://docs.example.com/a#top"),
            "https://docs.example.com/a"
        );
        assert_eq!(canonicalize("https://docs.example.com/"), "https://docs.example.com");
    }

    #[test]
    fn test_section_of() {
        let root = "https://docs.example.com/latest/";
        assert_eq!(section_of(root, "https://docs.example.com/latest/first/second"), "first");
        assert_eq!(section_of(root, "https://docs.example.com/latest/first/"), "first");
        assert_eq!(section_of(root, "https://docs.example.com/latest/"), "");
        assert_eq!(section_of(root, "https://other.example.com/first"), "");
        assert_eq!(section_of(root, ""), "");
    }

    #[test]
    fn test_is_under() {
        let root = "https://docs.example.com/latest/";
        assert!(is_under(root, "https://docs.example.com/latest"));
        assert!(is_under(root, "https://docs.example.com/latest/a/b?x=1"));
        assert!(!is_under(root, "https://docs.example.com/latest-old/a"));
        assert!(!is_under(root, "https://docs.example.com/"));
    }

    #[test]
    fn test_relative_segments_skips_empty_parts() {
        assert_eq!(
            relative_segments("https://docs.example.com", "https://docs.example.com//a/b"),
            vec!["a", "b"]
        );
    }
}
