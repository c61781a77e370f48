//! Canonical data model for the scraped library.
//!
//! The scraper produces this shape; the store and document writers consume it.
//! The JSON file is a top-level array of `LibraryItem`.

use serde::{Deserialize, Serialize};

/// Placeholder title for items scraped without one.
pub const MISSING_TITLE: &str = "(untitled)";

/// One audiobook in the library.
///
/// `cover_path` is filled in by the store after the cover download pass:
/// a relative path when the image is on disk, `None` when explicitly missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    /// Audible catalog identifier, when the row exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asin: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    pub narrators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub cover_path: Option<String>,
}

impl LibraryItem {
    /// Stable identity key: ASIN when present, else a title+author slug.
    /// Used to name the cover image file.
    pub fn key(&self) -> String {
        if let Some(asin) = self.asin.as_deref().filter(|a| !a.is_empty()) {
            return asin.to_string();
        }
        let composite = match self.authors.first() {
            Some(author) => format!("{} {}", self.title, author),
            None => self.title.clone(),
        };
        slugify(&composite)
    }
}

/// How an item came out of the page parse. Partial items carry the names of
/// the fields that were replaced with placeholders; skipped items the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Complete,
    Partial(Vec<String>),
    Skipped(String),
}

/// Lowercase alphanumeric slug with `-` separators; never empty.
pub fn slugify(s: &str) -> String {
    let mut out = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    out = out.trim_matches('-').to_string();
    if out.is_empty() {
        out = "item".to_string();
    }
    out
}
