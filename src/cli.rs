//! CLI parsing and orchestration. Subcommands run the pipeline steps in
//! order: scrape -> JSON + covers, render -> Markdown/CSV, convert ->
//! HTML/PDF. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::convert::{convert_markdown, ConvertError};
use crate::formats::{read_library, write_csv, write_markdown, FormatError};
use crate::scraper::{
    scrape_library, PoliteClient, ScrapeOptions, ScraperError,
};
use crate::session::{Credentials, Session, DEFAULT_LIBRARY_URL};
use crate::store::{cover_filename, download_covers, write_json_atomic, StoreError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Convert(#[from] ConvertError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Store(_) | CliRunError::Format(_) | CliRunError::Convert(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "audishelf")]
#[command(about = "Scrape an Audible library and build a JSON + Markdown/HTML/PDF catalog")]
#[command(
    after_help = "Config file keys (output_dir, images_dir, json_file, markdown_file, auth_file, library_url, email, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, max_pages) are documented in the README. CLI flags override config. Credentials come from AUDISHELF_EMAIL / AUDISHELF_PASSWORD."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress progress output (errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print verbose error chain.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in, scrape the library, write the JSON collection, download covers.
    Scrape(ScrapeArgs),
    /// Generate the Markdown catalog (and optional CSV) from the JSON file.
    Render(RenderArgs),
    /// Convert the Markdown catalog to HTML and PDF via pandoc and wkhtmltopdf.
    Convert(ConvertArgs),
    /// Scrape, render, and convert in sequence.
    Run(RunArgs),
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct PathArgs {
    /// Output directory for generated files (default "." or config output_dir).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// JSON collection file (default <output-dir>/library.json).
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Markdown catalog file (default <output-dir>/library.md).
    #[arg(long)]
    pub markdown: Option<PathBuf>,

    /// Cover image directory (default <output-dir>/images).
    #[arg(long)]
    pub images_dir: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct ScrapeArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// Auth file holding session cookies (default <output-dir>/auth.json).
    #[arg(long)]
    pub auth_file: Option<PathBuf>,

    /// First library page URL (overrides config).
    #[arg(long)]
    pub library_url: Option<String>,

    /// Stop after this many library pages.
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Do not download cover images.
    #[arg(long)]
    pub skip_covers: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds (overrides config; default 2).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct RenderArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// Also write a CSV export to this path.
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// HTML output file (default <output-dir>/library.html).
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// PDF output file (default <output-dir>/library.pdf).
    #[arg(long)]
    pub pdf: Option<PathBuf>,

    /// Stop after HTML; skip the PDF step.
    #[arg(long)]
    pub no_pdf: bool,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub scrape: ScrapeArgs,

    /// Also write a CSV export to this path.
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// HTML output file (default <output-dir>/library.html).
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// PDF output file (default <output-dir>/library.pdf).
    #[arg(long)]
    pub pdf: Option<PathBuf>,

    /// Stop after HTML; skip the PDF step.
    #[arg(long)]
    pub no_pdf: bool,
}

/// File locations for one run, after merging flags, config, and defaults.
#[derive(Debug, PartialEq, Eq)]
struct Paths {
    output_dir: PathBuf,
    json: PathBuf,
    markdown: PathBuf,
    images_dir: PathBuf,
}

fn resolve_paths(args: &PathArgs, config: Option<&Config>) -> Paths {
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| config.and_then(|c| c.output_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("."));
    let json = args
        .json
        .clone()
        .or_else(|| config.and_then(|c| c.json_file.clone()))
        .unwrap_or_else(|| output_dir.join("library.json"));
    let markdown = args
        .markdown
        .clone()
        .or_else(|| config.and_then(|c| c.markdown_file.clone()))
        .unwrap_or_else(|| output_dir.join("library.md"));
    let images_dir = args
        .images_dir
        .clone()
        .or_else(|| config.and_then(|c| c.images_dir.clone()))
        .unwrap_or_else(|| output_dir.join("images"));
    Paths {
        output_dir,
        json,
        markdown,
        images_dir,
    }
}

fn build_client(args: &ScrapeArgs, config: Option<&Config>) -> Result<PoliteClient, CliRunError> {
    const DEFAULT_DELAY_SECS: u64 = 2;
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_RETRY_COUNT: u32 = 3;

    let delay_secs = args
        .delay
        .or_else(|| config.and_then(|c| c.request_delay_secs))
        .unwrap_or(DEFAULT_DELAY_SECS);
    let timeout_secs = args
        .timeout
        .or_else(|| config.and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let retry_count = config
        .and_then(|c| c.retry_count)
        .unwrap_or(DEFAULT_RETRY_COUNT)
        .max(1);
    let retry_backoff_secs = config
        .and_then(|c| c.retry_backoff_secs.clone())
        .unwrap_or_else(|| vec![1, 2, 4]);
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.and_then(|c| c.user_agent.clone()));

    let mut builder = PoliteClient::builder()
        .delay_secs(delay_secs)
        .timeout_secs(timeout_secs)
        .retry_count(retry_count)
        .retry_backoff_secs(retry_backoff_secs);
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let config = config.as_ref();
    match &args.command {
        Command::Scrape(scrape) => run_scrape(scrape, config, args.quiet),
        Command::Render(render) => run_render(render, config, args.quiet),
        Command::Convert(convert) => run_convert(convert, config, args.quiet),
        Command::Run(run) => {
            run_scrape(&run.scrape, config, args.quiet)?;
            let render = RenderArgs {
                paths: run.scrape.paths.clone(),
                csv: run.csv.clone(),
            };
            run_render(&render, config, args.quiet)?;
            let convert = ConvertArgs {
                paths: run.scrape.paths.clone(),
                html: run.html.clone(),
                pdf: run.pdf.clone(),
                no_pdf: run.no_pdf,
            };
            run_convert(&convert, config, args.quiet)
        }
    }
}

fn run_scrape(
    args: &ScrapeArgs,
    config: Option<&Config>,
    quiet: bool,
) -> Result<(), CliRunError> {
    let paths = resolve_paths(&args.paths, config);
    let auth_path = args
        .auth_file
        .clone()
        .or_else(|| config.and_then(|c| c.auth_file.clone()))
        .unwrap_or_else(|| paths.output_dir.join("auth.json"));
    let library_url = args
        .library_url
        .clone()
        .or_else(|| config.and_then(|c| c.library_url.clone()))
        .unwrap_or_else(|| DEFAULT_LIBRARY_URL.to_string());
    let max_pages = args.max_pages.or_else(|| config.and_then(|c| c.max_pages));

    let client = build_client(args, config)?;
    let credentials = Credentials::from_env(config.and_then(|c| c.email.as_deref()));
    let mut session = Session::open(client, auth_path, credentials, library_url)?;
    session.establish()?;

    let page_progress = |page: u32, total: usize| {
        eprintln!("Scraped page {} ({} items so far).", page, total);
    };
    let progress: Option<&dyn Fn(u32, usize)> = if quiet { None } else { Some(&page_progress) };
    let options = ScrapeOptions {
        progress,
        max_pages,
    };
    let mut report = scrape_library(&mut session, &options)?;

    let cover_report = if args.skip_covers {
        None
    } else {
        let total = report
            .items
            .iter()
            .filter(|i| cover_filename(i).is_some())
            .count();
        let bar = (!quiet && total > 0).then(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            bar.set_style(
                indicatif::ProgressStyle::default_bar()
                    .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                    .progress_chars("█▉▊▋▌▍▎▏ "),
            );
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        let cover_progress = |done: usize, total: usize| {
            if let Some(ref bar) = bar {
                bar.set_position(done as u64);
                bar.set_message(format!("Downloading cover {}/{}", done, total));
            }
        };
        let progress: Option<&dyn Fn(usize, usize)> = if bar.is_some() {
            Some(&cover_progress)
        } else {
            None
        };
        let cover_report =
            download_covers(&mut report.items, &paths.images_dir, session.client_mut(), progress)?;
        if let Some(bar) = bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
        Some(cover_report)
    };

    write_json_atomic(&report.items, &paths.json)?;
    session.persist()?;

    if !quiet {
        eprintln!(
            "Scraped {} items across {} pages ({} complete, {} partial, {} skipped).",
            report.items.len(),
            report.pages,
            report.complete,
            report.partial,
            report.skipped
        );
        if let Some(covers) = cover_report {
            eprintln!(
                "Covers: {} downloaded, {} already present, {} failed, {} without URL.",
                covers.downloaded, covers.skipped, covers.failed, covers.without_url
            );
        }
        eprintln!("Wrote {}", paths.json.display());
    }
    Ok(())
}

fn run_render(
    args: &RenderArgs,
    config: Option<&Config>,
    quiet: bool,
) -> Result<(), CliRunError> {
    let paths = resolve_paths(&args.paths, config);
    let items = read_library(&paths.json)?;
    write_markdown(&items, &paths.markdown)?;
    if !quiet {
        eprintln!(
            "Wrote {} ({} sections)",
            paths.markdown.display(),
            items.len()
        );
    }
    if let Some(ref csv_path) = args.csv {
        write_csv(&items, csv_path)?;
        if !quiet {
            eprintln!("Wrote {}", csv_path.display());
        }
    }
    Ok(())
}

fn run_convert(
    args: &ConvertArgs,
    config: Option<&Config>,
    quiet: bool,
) -> Result<(), CliRunError> {
    let paths = resolve_paths(&args.paths, config);
    let html = args
        .html
        .clone()
        .unwrap_or_else(|| paths.output_dir.join("library.html"));
    let pdf = if args.no_pdf {
        None
    } else {
        Some(
            args.pdf
                .clone()
                .unwrap_or_else(|| paths.output_dir.join("library.pdf")),
        )
    };
    let conversion = convert_markdown(&paths.markdown, &html, pdf.as_deref())?;
    if !quiet {
        eprintln!("Wrote {}", conversion.html_path.display());
        if let Some(pdf_path) = conversion.pdf_path {
            eprintln!("Wrote {}", pdf_path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemOutcome;
    use crate::scraper::library;
    use std::path::Path;

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Scraper(ScraperError::AuthenticationExpired).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Store(StoreError::Serialize(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err()
            ))
            .exit_code(),
            3
        );
        assert_eq!(
            CliRunError::Format(FormatError::Write(std::io::Error::new(
                std::io::ErrorKind::Other,
                "x"
            )))
            .exit_code(),
            3
        );
        assert_eq!(
            CliRunError::Convert(ConvertError::OutputMissing {
                tool: "pandoc".into(),
                path: PathBuf::from("x.html"),
            })
            .exit_code(),
            3
        );
    }

    #[test]
    fn resolve_paths_defaults_to_current_dir() {
        let paths = resolve_paths(&PathArgs::default(), None);
        assert_eq!(paths.output_dir, PathBuf::from("."));
        assert_eq!(paths.json, PathBuf::from("./library.json"));
        assert_eq!(paths.markdown, PathBuf::from("./library.md"));
        assert_eq!(paths.images_dir, PathBuf::from("./images"));
    }

    #[test]
    fn resolve_paths_follows_output_dir() {
        let args = PathArgs {
            output_dir: Some(PathBuf::from("out")),
            ..Default::default()
        };
        let paths = resolve_paths(&args, None);
        assert_eq!(paths.json, PathBuf::from("out/library.json"));
        assert_eq!(paths.images_dir, PathBuf::from("out/images"));
    }

    #[test]
    fn resolve_paths_flags_override_config() {
        let config = Config {
            output_dir: Some(PathBuf::from("cfg")),
            json_file: Some(PathBuf::from("cfg/books.json")),
            ..Default::default()
        };
        let args = PathArgs {
            json: Some(PathBuf::from("flag.json")),
            ..Default::default()
        };
        let paths = resolve_paths(&args, Some(&config));
        assert_eq!(paths.output_dir, PathBuf::from("cfg"));
        assert_eq!(paths.json, PathBuf::from("flag.json"));
        assert_eq!(paths.markdown, PathBuf::from("cfg/library.md"));
    }

    fn page(rows: &str, next_href: Option<&str>) -> String {
        let next = next_href
            .map(|h| format!(r#"<span class="nextButton"><a href="{}">Next</a></span>"#, h))
            .unwrap_or_default();
        format!(
            r#"<html><body><div class="adbl-library-content">{}{}</div></body></html>"#,
            rows, next
        )
    }

    fn row(asin: &str, title: &str) -> String {
        format!(
            r#"<div id="adbl-library-content-row-{asin}" class="adbl-library-content-row">
<span class="bc-size-headline3">{title}</span>
<span class="authorLabel"><a>An Author</a></span>
<span class="narratorLabel"><a>A Narrator</a></span>
</div>"#
        )
    }

    /// Mocked pipeline: 3 items across 2 pages -> 3-item collection in page
    /// order -> JSON array of length 3 -> Markdown with exactly 3 sections.
    #[test]
    fn mocked_two_page_library_flows_through_the_pipeline() -> Result<(), CliRunError> {
        let base = "https://www.audible.com/library/titles";
        let page1 = page(
            &format!("{}{}", row("B1", "First"), row("B2", "Second")),
            Some("/library/titles?page=2"),
        );
        let page2 = page(&row("B3", "Third"), None);

        // Walk pagination the way the scraper does.
        let mut items = Vec::new();
        for (item, outcome) in library::parse_library_page(&page1).map_err(CliRunError::Scraper)? {
            assert_eq!(outcome, ItemOutcome::Complete);
            items.push(item);
        }
        let next = library::next_page_url(&page1, base).expect("page 1 links to page 2");
        assert_eq!(library::parse_page_number(&next), 2);
        for (item, _) in library::parse_library_page(&page2).map_err(CliRunError::Scraper)? {
            items.push(item);
        }
        assert!(library::next_page_url(&page2, &next).is_none());
        assert_eq!(items.len(), 3);
        assert_eq!(
            items.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(),
            vec!["First", "Second", "Third"]
        );

        let dir = std::env::temp_dir().join("audishelf_cli_pipeline");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let json_path = dir.join("library.json");
        write_json_atomic(&items, &json_path)?;

        let raw = std::fs::read_to_string(&json_path).unwrap();
        let array: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(array.as_array().map(|a| a.len()), Some(3));

        let reread = read_library(&json_path)?;
        let md_path = dir.join("library.md");
        write_markdown(&reread, &md_path)?;
        let md = std::fs::read_to_string(&md_path).unwrap();
        assert_eq!(md.matches("\n## ").count(), 3);

        std::fs::remove_dir_all(&dir).ok();
        Ok(())
    }

    #[test]
    fn render_fails_cleanly_without_json() {
        let args = RenderArgs {
            paths: PathArgs {
                output_dir: Some(Path::new("/nonexistent_dir_audishelf_xyz").to_path_buf()),
                ..Default::default()
            },
            csv: None,
        };
        let result = run_render(&args, None, true);
        match result {
            Err(CliRunError::Format(FormatError::Read { .. })) => {}
            other => panic!("expected Format(Read), got {:?}", other.err()),
        }
    }
}
