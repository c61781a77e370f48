//! Shared error type for the session and scraper.

use thiserror::Error;

/// Errors from authentication, HTTP, and library-page parsing.
#[derive(Debug, Error)]
pub enum ScraperError {
    // Authentication (fatal, stops the run)
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Session expired and could not be refreshed. Sign in again or remove the auth file.")]
    AuthenticationExpired,

    #[error("No credentials available. Set AUDISHELF_EMAIL and AUDISHELF_PASSWORD, or provide a valid auth file.")]
    MissingCredentials,

    #[error("Could not parse sign-in form: {reason}")]
    SigninFormParse { reason: String },

    // HTTP and network
    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Optional context (e.g. "library page 3") for programmatic use.
        context: Option<String>,
    },

    #[error("Failed to read response body: {source}")]
    BodyRead { source: reqwest::Error },

    // Parsing
    #[error("Could not parse library page: {message}")]
    ParseLibraryPage { message: String },

    // Session persistence
    #[error("Cannot read auth file {path}: {reason}")]
    AuthFileRead { path: String, reason: String },

    #[error("Cannot write auth file {path}: {reason}")]
    AuthFileWrite { path: String, reason: String },
}
