//! Library listing parser. Extracts item rows, per-item fields, and the
//! next-page link from a library page; produces tagged items so partial rows
//! are recorded with placeholders instead of dropped.

use crate::model::{ItemOutcome, LibraryItem, MISSING_TITLE};
use crate::scraper::error::ScraperError;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

const ROW_ID_PREFIX: &str = "adbl-library-content-row-";
/// Marker present on every library page, with or without rows. Its absence
/// means the layout changed or this is not a library page at all.
const LIBRARY_MARKER: &str = "adbl-library-content";

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::ParseLibraryPage {
        message: format!("invalid selector {:?}: {}", sel, e),
    })
}

/// Check response status and read body as UTF-8. Returns body or ScraperError.
pub(crate) fn check_response(
    response: reqwest::blocking::Response,
    url: &str,
    context: Option<&str>,
) -> Result<String, ScraperError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ScraperError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
            context: context.map(String::from),
        });
    }
    response
        .text()
        .map_err(|e| ScraperError::BodyRead { source: e })
}

/// True when the page (or the URL it redirected to) is the sign-in page.
pub fn is_signin_page(final_url: &str, html: &str) -> bool {
    if final_url.contains("/ap/signin") {
        return true;
    }
    html.contains("name=\"signIn\"") || html.contains("id=\"ap_email\"")
}

/// Parse `page=N` from a URL's query. Returns 1 if missing or unparseable.
pub fn parse_page_number(url: &str) -> u32 {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return 1,
    };
    parsed
        .query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(1)
}

/// Next-page URL from the listing's next button, resolved against the current
/// page URL. Returns None at the end of pagination: no button, no href, or a
/// target page number not greater than the current one (the listing repeats
/// its last page rather than 404ing past the end).
pub fn next_page_url(html: &str, current_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let next_sel = parse_selector("span.nextButton a").ok()?;
    let href = doc.select(&next_sel).next()?.value().attr("href")?;
    let base = Url::parse(current_url).ok()?;
    let next = base.join(href).ok()?;
    let next = next.to_string();
    if parse_page_number(&next) <= parse_page_number(current_url) {
        return None;
    }
    Some(next)
}

/// Parse one library page into tagged items, in row order.
///
/// An empty Vec is a valid result (end of pagination, or an account with no
/// titles); a page without the library container at all is a parse error.
pub fn parse_library_page(html: &str) -> Result<Vec<(LibraryItem, ItemOutcome)>, ScraperError> {
    if !html.contains(LIBRARY_MARKER) {
        return Err(ScraperError::ParseLibraryPage {
            message: "library content container not found (layout may have changed)".to_string(),
        });
    }
    let doc = Html::parse_document(html);
    let row_sel = parse_selector("div.adbl-library-content-row")?;
    let mut items = Vec::new();
    for row in doc.select(&row_sel) {
        items.push(parse_item(row)?);
    }
    Ok(items)
}

/// Parse one item row. Missing fields degrade per-field: a missing title
/// becomes a placeholder (Partial), a row with nothing recognizable at all is
/// Skipped. The item is returned either way so the caller decides.
fn parse_item(row: ElementRef<'_>) -> Result<(LibraryItem, ItemOutcome), ScraperError> {
    let title_sel = parse_selector("span.bc-size-headline3")?;
    let author_sel = parse_selector("span.authorLabel a")?;
    let narrator_sel = parse_selector("span.narratorLabel a")?;
    let series_sel = parse_selector("li.seriesLabel span a")?;
    let runtime_sel = parse_selector("li.runtimeLabel span")?;
    let summary_sel = parse_selector("span.merchandisingSummary")?;
    let summary_p_sel = parse_selector("p")?;
    let cover_sel = parse_selector("img.bc-image-inset-border")?;

    let asin = row
        .value()
        .attr("id")
        .and_then(|id| id.strip_prefix(ROW_ID_PREFIX))
        .map(String::from)
        .filter(|s| !s.is_empty());

    let title = select_text(&row, &title_sel);
    let authors = select_all_text(&row, &author_sel);
    let narrators = select_all_text(&row, &narrator_sel);
    let series = select_text(&row, &series_sel);
    let runtime = select_text(&row, &runtime_sel)
        .map(|s| s.trim_start_matches("Length:").trim().to_string())
        .filter(|s| !s.is_empty());

    // Description: first non-empty <p> in the summary, else the whole summary text.
    let description = row.select(&summary_sel).next().and_then(|summary| {
        summary
            .select(&summary_p_sel)
            .map(|p| p.text().collect::<String>().trim().to_string())
            .find(|t| !t.is_empty())
            .or_else(|| {
                let whole = summary.text().collect::<String>().trim().to_string();
                if whole.is_empty() {
                    None
                } else {
                    Some(whole)
                }
            })
    });

    let cover_url = row
        .select(&cover_sel)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(String::from)
        .filter(|s| !s.is_empty());

    if title.is_none() && authors.is_empty() && cover_url.is_none() && asin.is_none() {
        let item = placeholder_item(asin);
        return Ok((
            item,
            ItemOutcome::Skipped("no recognizable fields in row".to_string()),
        ));
    }

    let mut missing = Vec::new();
    if title.is_none() {
        missing.push("title".to_string());
    }
    if authors.is_empty() {
        missing.push("authors".to_string());
    }
    if narrators.is_empty() {
        missing.push("narrators".to_string());
    }

    let item = LibraryItem {
        asin,
        title: title.unwrap_or_else(|| MISSING_TITLE.to_string()),
        authors,
        narrators,
        series,
        runtime,
        description,
        cover_url,
        cover_path: None,
    };
    let outcome = if missing.is_empty() {
        ItemOutcome::Complete
    } else {
        ItemOutcome::Partial(missing)
    };
    Ok((item, outcome))
}

fn placeholder_item(asin: Option<String>) -> LibraryItem {
    LibraryItem {
        asin,
        title: MISSING_TITLE.to_string(),
        authors: Vec::new(),
        narrators: Vec::new(),
        series: None,
        runtime: None,
        description: None,
        cover_url: None,
        cover_path: None,
    }
}

fn select_text(row: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    row.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_all_text(row: &ElementRef<'_>, sel: &Selector) -> Vec<String> {
    row.select(sel)
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_row(asin: &str, title: &str, author: &str, narrator: &str) -> String {
        format!(
            r#"<div id="adbl-library-content-row-{asin}" class="adbl-library-content-row">
  <img class="bc-image-inset-border" src="https://m.media-amazon.com/images/I/{asin}.jpg"/>
  <span class="bc-size-headline3">{title}</span>
  <span class="authorLabel">By: <a href="/author/x">{author}</a></span>
  <span class="narratorLabel">Narrated by: <a href="/search?narrator=x">{narrator}</a></span>
  <ul>
    <li class="seriesLabel"><span><a href="/series/x">Sample Series</a></span></li>
    <li class="runtimeLabel"><span>Length: 10 hrs and 10 mins</span></li>
  </ul>
  <span class="merchandisingSummary"><p>A fine audiobook.</p></span>
</div>"#
        )
    }

    fn library_page(rows: &[String], next_href: Option<&str>) -> String {
        let next = match next_href {
            Some(href) => format!(r#"<span class="nextButton"><a href="{}">Next</a></span>"#, href),
            None => String::new(),
        };
        format!(
            r#"<!DOCTYPE html><html><body><div class="adbl-library-content">
{}
{}</div></body></html>"#,
            rows.join("\n"),
            next
        )
    }

    #[test]
    fn parses_complete_item_row() -> Result<(), ScraperError> {
        let html = library_page(
            &[item_row("B000TEST01", "First Book", "Alice Author", "Nora Narrator")],
            None,
        );
        let items = parse_library_page(&html)?;
        assert_eq!(items.len(), 1);
        let (item, outcome) = &items[0];
        assert_eq!(item.asin.as_deref(), Some("B000TEST01"));
        assert_eq!(item.title, "First Book");
        assert_eq!(item.authors, vec!["Alice Author"]);
        assert_eq!(item.narrators, vec!["Nora Narrator"]);
        assert_eq!(item.series.as_deref(), Some("Sample Series"));
        assert_eq!(item.runtime.as_deref(), Some("10 hrs and 10 mins"));
        assert_eq!(item.description.as_deref(), Some("A fine audiobook."));
        assert!(item
            .cover_url
            .as_deref()
            .unwrap_or_default()
            .ends_with("B000TEST01.jpg"));
        assert_eq!(*outcome, ItemOutcome::Complete);
        Ok(())
    }

    #[test]
    fn multiple_authors_collected_in_order() -> Result<(), ScraperError> {
        let row = r#"<div class="adbl-library-content-row">
  <span class="bc-size-headline3">Duo</span>
  <span class="authorLabel"><a>First Author</a>, <a>Second Author</a></span>
  <span class="narratorLabel"><a>N</a></span>
</div>"#
            .to_string();
        let html = library_page(&[row], None);
        let items = parse_library_page(&html)?;
        assert_eq!(
            items[0].0.authors,
            vec!["First Author".to_string(), "Second Author".to_string()]
        );
        Ok(())
    }

    #[test]
    fn missing_title_yields_placeholder_not_drop() -> Result<(), ScraperError> {
        let row = r#"<div id="adbl-library-content-row-B000NOTITLE" class="adbl-library-content-row">
  <span class="authorLabel"><a>Some Author</a></span>
</div>"#
            .to_string();
        let html = library_page(&[row], None);
        let items = parse_library_page(&html)?;
        assert_eq!(items.len(), 1);
        let (item, outcome) = &items[0];
        assert_eq!(item.title, MISSING_TITLE);
        match outcome {
            ItemOutcome::Partial(fields) => {
                assert!(fields.contains(&"title".to_string()));
                assert!(fields.contains(&"narrators".to_string()));
            }
            other => panic!("expected Partial, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn empty_row_is_skipped_with_reason() -> Result<(), ScraperError> {
        let row = r#"<div class="adbl-library-content-row"><span class="bc-spacing"></span></div>"#
            .to_string();
        let html = library_page(&[row], None);
        let items = parse_library_page(&html)?;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0].1, ItemOutcome::Skipped(_)));
        Ok(())
    }

    #[test]
    fn page_without_library_container_is_parse_error() {
        let result = parse_library_page("<html><body><p>maintenance</p></body></html>");
        assert!(matches!(
            result,
            Err(ScraperError::ParseLibraryPage { .. })
        ));
    }

    #[test]
    fn page_with_container_but_no_rows_is_empty() -> Result<(), ScraperError> {
        let html = library_page(&[], None);
        assert!(parse_library_page(&html)?.is_empty());
        Ok(())
    }

    #[test]
    fn parse_page_number_defaults_to_one() {
        assert_eq!(
            parse_page_number("https://www.audible.com/library/titles"),
            1
        );
        assert_eq!(parse_page_number("not a url"), 1);
    }

    #[test]
    fn parse_page_number_reads_query_param() {
        assert_eq!(
            parse_page_number("https://www.audible.com/library/titles?page=3&ref=x"),
            3
        );
    }

    #[test]
    fn next_page_url_resolves_relative_href() {
        let html = library_page(&[], Some("/library/titles?page=2"));
        let next = next_page_url(&html, "https://www.audible.com/library/titles");
        assert_eq!(
            next.as_deref(),
            Some("https://www.audible.com/library/titles?page=2")
        );
    }

    #[test]
    fn next_page_url_none_without_button() {
        let html = library_page(&[], None);
        assert!(next_page_url(&html, "https://www.audible.com/library/titles").is_none());
    }

    #[test]
    fn next_page_url_none_when_page_number_does_not_advance() {
        // Last page links back to itself; the page-number guard ends pagination.
        let html = library_page(&[], Some("/library/titles?page=2"));
        assert!(next_page_url(&html, "https://www.audible.com/library/titles?page=2").is_none());
    }

    #[test]
    fn signin_page_detected_by_url_and_markup() {
        assert!(is_signin_page(
            "https://www.amazon.com/ap/signin?openid=x",
            ""
        ));
        assert!(is_signin_page(
            "https://www.audible.com/library/titles",
            r#"<form name="signIn" action="/ap/signin"></form>"#
        ));
        assert!(!is_signin_page(
            "https://www.audible.com/library/titles",
            "<div class=\"adbl-library-content\"></div>"
        ));
    }
}
