//! Content-addressed document identifiers.
//!
//! Identifiers embed the canonical URL and a SHA-256 of the content, so an
//! edited page or section gets a new id and the previous one shows up as
//! stale after the next run.

use sha2::{Digest, Sha256};

// Separates hashed parts so ("ab", "c") and ("a", "bc") differ.
const PART_SEPARATOR: u8 = 0x1f;

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([PART_SEPARATOR]);
    }
    format!("{:x}", hasher.finalize())
}

/// Identifier of a page document: hash of (body, title).
pub fn page_id(url: &str, body: &str, title: &str) -> String {
    format!("{}:page:{}", url, digest(&[body, title]))
}

/// Identifier of a section document: hash of (body, part title, page title,
/// position).
pub fn section_id(
    url: &str,
    position: usize,
    body: &str,
    page_title: &str,
    part_title: &str,
) -> String {
    let position = position.to_string();
    format!(
        "{}:section:{}",
        url,
        digest(&[body, part_title, page_title, &position])
    )
}
