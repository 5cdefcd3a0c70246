//! PDF to Markdown conversion under the allowlisted root.
//!
//! Reads a `.pdf` resolved through the safe-path layer, extracts its text,
//! and writes a Markdown sidecar at `{input}.md` under the same root.
//! Returns conversion metadata only — never the Markdown body inline.
//! Conversion is deterministic only up to the extractor; chunk-level
//! determinism downstream does not depend on it.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::config::DEFAULT_MAX_CONVERTED_CHARS;
use crate::error::LexError;
use crate::safe_path;

/// Size cap for PDF input files.
pub const MAX_PDF_BYTES: u64 = 50_000_000;

/// Per-file conversion metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    /// Relative path of the written sidecar under the ingest root.
    pub output_path: String,
    pub source_name: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u64,
    pub overwritten: bool,
    pub truncated: bool,
}

/// Extracted text plus the name it should be ingested under.
#[derive(Debug, Clone)]
pub struct ExtractedPdf {
    pub source_name: String,
    pub markdown: String,
    pub bytes_in: u64,
    pub truncated: bool,
}

/// Extract text from a PDF under the allowlisted root.
///
/// The extractor can panic on malformed files; that is contained here and
/// surfaced as `ConverterFailed` without any content in the message.
pub fn extract_pdf_text(
    root: &Path,
    relative_path: &str,
    max_chars: Option<usize>,
) -> Result<ExtractedPdf, LexError> {
    let resolved = safe_path::resolve_file(root, relative_path, &[".pdf"], MAX_PDF_BYTES)?;
    let bytes_in = std::fs::metadata(&resolved)?.len();

    let path_buf = resolved.clone();
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text(&path_buf))
        .map_err(|_| LexError::ConverterFailed {
            message: "PDF extractor panicked".to_string(),
        })?
        .map_err(|e| LexError::ConverterFailed {
            message: format!("PDF extraction failed: {}", e),
        })?;

    let cap = max_chars.unwrap_or(DEFAULT_MAX_CONVERTED_CHARS);
    let (markdown, truncated) = if extracted.chars().count() > cap {
        (extracted.chars().take(cap).collect(), true)
    } else {
        (extracted, false)
    };

    let source_name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_path.to_string());

    Ok(ExtractedPdf {
        source_name,
        markdown,
        bytes_in,
        truncated,
    })
}

/// Convert one PDF and write its Markdown sidecar.
pub fn convert_pdf_file(
    root: &Path,
    relative_path: &str,
    max_chars: Option<usize>,
    overwrite: bool,
) -> Result<(ConversionOutcome, ExtractedPdf), LexError> {
    let started = Instant::now();
    let extracted = extract_pdf_text(root, relative_path, max_chars)?;

    let output_relative = format!("{}.md", relative_path);
    let output_path = safe_path::resolve_write_path(root, &output_relative, &[".md"])?;

    let existed_before = output_path.exists();
    if existed_before && !overwrite {
        return Err(LexError::invalid_input(format!(
            "output file already exists: {}",
            output_relative
        )));
    }

    std::fs::write(&output_path, &extracted.markdown)?;
    let bytes_out = std::fs::metadata(&output_path)?.len();

    let outcome = ConversionOutcome {
        output_path: output_relative,
        source_name: extracted.source_name.clone(),
        bytes_in: extracted.bytes_in,
        bytes_out,
        elapsed_ms: started.elapsed().as_millis() as u64,
        overwritten: existed_before,
        truncated: extracted.truncated,
    };

    Ok((outcome, extracted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_non_pdf_suffix() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("doc.txt"), "text").unwrap();
        let err = extract_pdf_text(tmp.path(), "doc.txt", None).unwrap_err();
        assert_eq!(err.code(), "suffix_not_allowed");
    }

    #[test]
    fn test_malformed_pdf_is_converter_failure() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.pdf"), b"not a pdf at all").unwrap();
        let err = extract_pdf_text(tmp.path(), "broken.pdf", None).unwrap_err();
        assert_eq!(err.code(), "converter_failed");
    }

    #[test]
    fn test_malformed_pdf_writes_no_sidecar() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.pdf"), b"garbage").unwrap();
        let _ = convert_pdf_file(tmp.path(), "broken.pdf", None, true);
        assert!(!tmp.path().join("broken.pdf.md").exists());
    }

    #[test]
    fn test_traversal_never_reaches_extractor() {
        let tmp = TempDir::new().unwrap();
        let err = extract_pdf_text(tmp.path(), "../escape.pdf", None).unwrap_err();
        assert_eq!(err.code(), "path_traversal");
    }
}
