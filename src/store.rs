//! Persistence: atomic JSON write of the collection and idempotent cover
//! downloads into a folder keyed by item identity.

use crate::model::LibraryItem;
use crate::scraper::PoliteClient;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the persistence writer. Filesystem failures are fatal;
/// individual cover-download failures are not (they are counted instead).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize collection: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Counts from a cover-download pass, for the run summary.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CoverReport {
    pub downloaded: usize,
    /// Already on disk from a previous run.
    pub skipped: usize,
    pub failed: usize,
    /// Items whose row carried no cover URL.
    pub without_url: usize,
}

/// Serialize the collection to `path` atomically: write a temp file in the
/// same directory, then rename over the target. A crash mid-write leaves the
/// previous file intact.
pub fn write_json_atomic(items: &[LibraryItem], path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    let json = serde_json::to_vec_pretty(items)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, &json).map_err(|e| StoreError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Cover file name for an item: identity key plus the URL's extension
/// (default jpg). None when the item has no cover URL.
pub fn cover_filename(item: &LibraryItem) -> Option<String> {
    let url = item.cover_url.as_deref().filter(|u| !u.is_empty())?;
    Some(format!("{}.{}", item.key(), url_extension(url)))
}

fn url_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let candidate = path.rsplit('.').next().unwrap_or("");
    if (1..=4).contains(&candidate.len()) && candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
        candidate
    } else {
        "jpg"
    }
}

/// Download each item's cover into `images_dir`, filling in `cover_path`.
///
/// Idempotent: files already present are skipped. Individual failures are
/// logged and counted, never abort the pass; the item keeps
/// `cover_path = None` so the document writer falls back to a placeholder.
pub fn download_covers(
    items: &mut [LibraryItem],
    images_dir: &Path,
    client: &mut PoliteClient,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<CoverReport, StoreError> {
    std::fs::create_dir_all(images_dir).map_err(|e| StoreError::CreateDir {
        path: images_dir.to_path_buf(),
        source: e,
    })?;

    let total = items.iter().filter(|i| cover_filename(i).is_some()).count();
    let mut report = CoverReport::default();
    let mut done = 0usize;

    for item in items.iter_mut() {
        let filename = match cover_filename(item) {
            Some(f) => f,
            None => {
                report.without_url += 1;
                item.cover_path = None;
                continue;
            }
        };
        let target = images_dir.join(&filename);
        done += 1;
        if let Some(ref p) = progress {
            p(done, total);
        }

        if target.exists() {
            report.skipped += 1;
            item.cover_path = Some(target.display().to_string());
            continue;
        }

        let url = item.cover_url.clone().unwrap_or_default();
        let response = match client.get_with_retry(&url) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Cover for '{}': network error: {}. Skipped.", item.title, e);
                report.failed += 1;
                item.cover_path = None;
                continue;
            }
        };
        if !response.status().is_success() {
            eprintln!(
                "Cover for '{}': HTTP {} at {}. Skipped.",
                item.title,
                response.status().as_u16(),
                url
            );
            report.failed += 1;
            item.cover_path = None;
            continue;
        }
        let bytes = match response.bytes() {
            Ok(b) => b,
            Err(e) => {
                eprintln!(
                    "Cover for '{}': failed to read body: {}. Skipped.",
                    item.title, e
                );
                report.failed += 1;
                item.cover_path = None;
                continue;
            }
        };
        if let Err(e) = std::fs::write(&target, &bytes) {
            return Err(StoreError::Io {
                path: target,
                source: e,
            });
        }
        report.downloaded += 1;
        item.cover_path = Some(target.display().to_string());
    }

    Ok(report)
}
