//! Document output: reads the JSON collection and writes the Markdown
//! catalog (one section per item) and an optional CSV export.

use crate::model::{LibraryItem, MISSING_TITLE};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Errors from the document writers.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),
}

/// Read the collection back from the JSON file written by the store.
pub fn read_library(path: &Path) -> Result<Vec<LibraryItem>, FormatError> {
    let file = File::open(path).map_err(|e| FormatError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_reader(file).map_err(|e| FormatError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Escape Markdown-significant characters so scraped text cannot break the
/// document structure.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '#' | '[' | ']' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Cover reference for a section: a path relative to the document when the
/// image is on disk, None otherwise (the caller renders a placeholder).
fn cover_reference(item: &LibraryItem, doc_dir: &Path) -> Option<String> {
    let cover = item.cover_path.as_deref().filter(|p| !p.is_empty())?;
    let path = Path::new(cover);
    if !path.exists() && !doc_dir.join(path).exists() {
        return None;
    }
    let relative = path.strip_prefix(doc_dir).unwrap_or(path);
    Some(relative.to_string_lossy().replace('\\', "/"))
}

fn names_or_unknown(names: &[String]) -> String {
    if names.is_empty() {
        "Unknown".to_string()
    } else {
        names
            .iter()
            .map(|n| escape_markdown(n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Write the Markdown catalog: header, then one `##` section per item in
/// collection order. Items with a missing cover get a placeholder line.
pub fn write_markdown(items: &[LibraryItem], path: &Path) -> Result<(), FormatError> {
    let doc_dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let mut f = File::create(path).map_err(|e| FormatError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    writeln!(f, "# Audiobook Library")?;
    writeln!(f)?;
    writeln!(f, "{} titles.", items.len())?;
    writeln!(f)?;
    writeln!(f, "---")?;
    writeln!(f)?;

    for item in items {
        let title = if item.title.trim().is_empty() {
            MISSING_TITLE
        } else {
            item.title.as_str()
        };
        writeln!(f, "## {}", escape_markdown(title))?;
        writeln!(f)?;
        match cover_reference(item, &doc_dir) {
            Some(reference) => writeln!(f, "![cover]({})", reference)?,
            None => writeln!(f, "*(no cover available)*")?,
        }
        writeln!(f)?;
        writeln!(f, "- **Author:** {}", names_or_unknown(&item.authors))?;
        writeln!(f, "- **Narrator:** {}", names_or_unknown(&item.narrators))?;
        if let Some(ref series) = item.series {
            writeln!(f, "- **Series:** {}", escape_markdown(series))?;
        }
        if let Some(ref runtime) = item.runtime {
            writeln!(f, "- **Length:** {}", escape_markdown(runtime))?;
        }
        writeln!(f)?;
        if let Some(ref description) = item.description {
            writeln!(f, "{}", escape_markdown(description))?;
            writeln!(f)?;
        }
    }

    Ok(())
}

const CSV_HEADER: [&str; 8] = [
    "Title",
    "Authors",
    "Narrators",
    "Series",
    "Runtime",
    "Description",
    "Cover URL",
    "Cover File",
];

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_row<W: Write>(w: &mut W, cells: &[String]) -> std::io::Result<()> {
    let line = cells
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(w, "{}", line)
}

/// Write the collection as CSV: header row plus one row per item, multi-value
/// fields joined with `; `.
pub fn write_csv(items: &[LibraryItem], path: &Path) -> Result<(), FormatError> {
    let mut f = File::create(path).map_err(|e| FormatError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    csv_row(
        &mut f,
        &CSV_HEADER.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )?;
    for item in items {
        let cells = vec![
            item.title.clone(),
            item.authors.join("; "),
            item.narrators.join("; "),
            item.series.clone().unwrap_or_default(),
            item.runtime.clone().unwrap_or_default(),
            item.description.clone().unwrap_or_default(),
            item.cover_url.clone().unwrap_or_default(),
            item.cover_path.clone().unwrap_or_default(),
        ];
        csv_row(&mut f, &cells)?;
    }
    Ok(())
}
