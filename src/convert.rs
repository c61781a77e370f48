//! External document conversion: Markdown to HTML via pandoc, HTML to PDF
//! via wkhtmltopdf. Both run as subprocesses with fixed arguments; the
//! expected output file existing is the success signal.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

const PANDOC: &str = "pandoc";
const WKHTMLTOPDF: &str = "wkhtmltopdf";

/// Errors from the conversion step.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Could not run {tool}: {source}. Is {tool} installed and on PATH?")]
    ToolNotFound {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} reported errors:\n{message}")]
    ToolFailed { tool: String, message: String },

    #[error("{tool} exited successfully but did not produce {path}")]
    OutputMissing { tool: String, path: PathBuf },
}

/// Paths produced by a successful conversion.
#[derive(Debug, PartialEq, Eq)]
pub struct Conversion {
    pub html_path: PathBuf,
    pub pdf_path: Option<PathBuf>,
}

fn run_tool(tool: &str, args: &[&std::ffi::OsStr]) -> Result<(), ConvertError> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| ConvertError::ToolNotFound {
            tool: tool.to_string(),
            source: e,
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    Err(ConvertError::ToolFailed {
        tool: tool.to_string(),
        message: message.trim().to_string(),
    })
}

fn expect_output(tool: &str, path: &Path) -> Result<(), ConvertError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConvertError::OutputMissing {
            tool: tool.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Convert the Markdown catalog to HTML, and on to PDF when `pdf` is given.
/// Each step verifies its output file exists before reporting success.
pub fn convert_markdown(
    markdown: &Path,
    html: &Path,
    pdf: Option<&Path>,
) -> Result<Conversion, ConvertError> {
    run_tool(
        PANDOC,
        &[
            markdown.as_os_str(),
            "-s".as_ref(),
            "-o".as_ref(),
            html.as_os_str(),
        ],
    )?;
    expect_output(PANDOC, html)?;

    let pdf_path = match pdf {
        Some(pdf) => {
            run_tool(WKHTMLTOPDF, &[html.as_os_str(), pdf.as_os_str()])?;
            expect_output(WKHTMLTOPDF, pdf)?;
            Some(pdf.to_path_buf())
        }
        None => None,
    };

    Ok(Conversion {
        html_path: html.to_path_buf(),
        pdf_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_reported_as_not_found() {
        let result = run_tool("audishelf-no-such-converter", &[]);
        match result {
            Err(ConvertError::ToolNotFound { tool, .. }) => {
                assert_eq!(tool, "audishelf-no-such-converter");
            }
            other => panic!("expected ToolNotFound, got {:?}", other),
        }
    }

    #[test]
    fn missing_output_is_distinct_from_tool_failure() {
        let path = std::env::temp_dir().join("audishelf_convert_never_written.html");
        std::fs::remove_file(&path).ok();
        let result = expect_output("pandoc", &path);
        assert!(matches!(result, Err(ConvertError::OutputMissing { .. })));
    }

    #[test]
    fn existing_output_passes_the_check() {
        let path = std::env::temp_dir().join("audishelf_convert_present.html");
        std::fs::write(&path, "<html></html>").unwrap();
        let result = expect_output("pandoc", &path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_ok());
    }
}
