//! Optional config file loading. Search order: ./audishelf.toml, then
//! $XDG_CONFIG_HOME/audishelf/config.toml (or ~/.config/audishelf/config.toml).

use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory for JSON, Markdown, HTML, and PDF. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Directory for downloaded cover images. Default: <output_dir>/images.
    pub images_dir: Option<PathBuf>,
    /// JSON collection file. Default: <output_dir>/library.json.
    pub json_file: Option<PathBuf>,
    /// Markdown catalog file. Default: <output_dir>/library.md.
    pub markdown_file: Option<PathBuf>,
    /// Auth file holding session cookies. Default: <output_dir>/auth.json.
    pub auth_file: Option<PathBuf>,
    /// First library page to scrape. Default: the Audible titles listing.
    pub library_url: Option<String>,
    /// Account email for sign-in. The password always comes from the environment.
    pub email: Option<String>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Delay in seconds between requests.
    pub request_delay_secs: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]). Length should be retry_count - 1.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Stop after this many library pages.
    pub max_pages: Option<u32>,
}

/// Search order: (1) ./audishelf.toml, (2) $XDG_CONFIG_HOME/audishelf/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("audishelf.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("audishelf").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}
