//! Library scraping: shared client, error type, page parsing, and the
//! pagination loop, modeled as an explicit state machine.

mod client;
mod error;

pub mod library;

pub use client::{PoliteClient, PoliteClientBuilder, SessionCookie};
pub use error::ScraperError;

use crate::model::{ItemOutcome, LibraryItem};
use crate::session::Session;

/// Options for a scrape run: progress callback and page cap.
pub struct ScrapeOptions<'a> {
    /// Called after each page with (page number, items collected so far).
    pub progress: Option<&'a dyn Fn(u32, usize)>,
    /// Stop after this many pages (default: run to exhaustion).
    pub max_pages: Option<u32>,
}

impl Default for ScrapeOptions<'_> {
    fn default() -> Self {
        ScrapeOptions {
            progress: None,
            max_pages: None,
        }
    }
}

/// Pagination state. Fetch loads the page named by `url`; the parse result
/// decides HasMore (another page follows) or Exhausted; errors become Failed
/// and abort the run.
#[derive(Debug)]
enum PageState {
    Fetch { url: String, number: u32 },
    HasMore { url: String, number: u32 },
    Exhausted,
    Failed(ScraperError),
}

/// Result of a scrape: the collection in traversal order plus per-item
/// outcome counts for the run summary. Skipped rows are counted but not
/// appended to `items`.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub items: Vec<LibraryItem>,
    pub pages: u32,
    pub complete: usize,
    pub partial: usize,
    pub skipped: usize,
}

/// Decide the state after a parsed page: Exhausted on an empty page or when
/// the page cap is reached, otherwise follow the next-page link.
fn next_state(
    html: &str,
    current_url: &str,
    items_on_page: usize,
    pages_fetched: u32,
    max_pages: Option<u32>,
) -> PageState {
    if items_on_page == 0 {
        return PageState::Exhausted;
    }
    if let Some(cap) = max_pages {
        if pages_fetched >= cap {
            return PageState::Exhausted;
        }
    }
    match library::next_page_url(html, current_url) {
        Some(url) => {
            let number = library::parse_page_number(&url);
            PageState::HasMore { url, number }
        }
        None => PageState::Exhausted,
    }
}

/// Fetch and parse one page, folding its items into the report. Returns the
/// state to transition to; any error becomes Failed.
fn fetch_into_report(
    session: &mut Session,
    url: &str,
    number: u32,
    options: &ScrapeOptions<'_>,
    report: &mut ScrapeReport,
) -> PageState {
    let context = format!("library page {}", number);
    let html = match session.fetch_page(url, Some(&context)) {
        Ok(html) => html,
        Err(e) => return PageState::Failed(e),
    };
    let parsed = match library::parse_library_page(&html) {
        Ok(parsed) => parsed,
        Err(e) => return PageState::Failed(e),
    };
    report.pages += 1;
    let items_on_page = parsed.len();
    for (item, outcome) in parsed {
        match outcome {
            ItemOutcome::Complete => {
                report.complete += 1;
                report.items.push(item);
            }
            ItemOutcome::Partial(fields) => {
                eprintln!(
                    "Page {}: item '{}' missing {}; recorded with placeholders.",
                    number,
                    item.title,
                    fields.join(", ")
                );
                report.partial += 1;
                report.items.push(item);
            }
            ItemOutcome::Skipped(reason) => {
                eprintln!("Page {}: row skipped: {}.", number, reason);
                report.skipped += 1;
            }
        }
    }
    if let Some(ref p) = options.progress {
        p(number, report.items.len());
    }
    next_state(&html, url, items_on_page, report.pages, options.max_pages)
}

/// Walk the library listing page by page, collecting items in traversal
/// order. Partial rows are kept with placeholders and skipped rows counted;
/// page-level failures abort the run.
pub fn scrape_library(
    session: &mut Session,
    options: &ScrapeOptions<'_>,
) -> Result<ScrapeReport, ScraperError> {
    let start_url = session.library_url().to_string();
    let mut report = ScrapeReport::default();
    let mut state = PageState::Fetch {
        number: library::parse_page_number(&start_url),
        url: start_url,
    };

    loop {
        state = match state {
            PageState::Fetch { url, number } => {
                fetch_into_report(session, &url, number, options, &mut report)
            }
            PageState::HasMore { url, number } => PageState::Fetch { url, number },
            PageState::Exhausted => break,
            PageState::Failed(e) => return Err(e),
        };
    }

    Ok(report)
}
