//! audishelf: CLI scraper for an Audible library, outputting JSON, cover
//! images, and a Markdown catalog converted to HTML/PDF by external tools.

pub mod cli;
pub mod config;
pub mod convert;
pub mod formats;
pub mod model;
pub mod scraper;
pub mod session;
pub mod store;

// Re-exports for CLI and consumers.
pub use convert::{convert_markdown, Conversion, ConvertError};
pub use formats::{read_library, write_csv, write_markdown, FormatError};
pub use model::{ItemOutcome, LibraryItem};
pub use scraper::{
    scrape_library, PoliteClient, PoliteClientBuilder, ScrapeOptions, ScrapeReport, ScraperError,
};
pub use session::{Credentials, Session};
pub use store::{download_covers, write_json_atomic, CoverReport, StoreError};
