//! Plain-text extraction for uploaded files.
//!
//! `.pdf` files go through `pdf-extract`; everything else must already be
//! UTF-8 text. Failures are [`Error::Parse`], which aborts that one
//! ingestion before anything is stored.

use std::path::Path;

use crate::error::{Error, Result};

const UTF8_BOM: &str = "\u{feff}";

/// Extract text from `bytes`, choosing the format from `filename`'s extension.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    if is_pdf(filename) {
        extract_pdf(bytes, filename)
    } else {
        decode_text(bytes, filename)
    }
}

/// Read a file from disk and extract its text.
pub async fn extract_file(path: &Path, filename: &str) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Parse(format!("cannot read {}: {}", path.display(), e)))?;
    extract_text(&bytes, filename)
}

fn is_pdf(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::Parse(format!("PDF extraction failed for {}: {}", filename, e)))
}

fn decode_text(bytes: &[u8], filename: &str) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Parse(format!("{} is not valid UTF-8 text: {}", filename, e)))?;
    Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let text = extract_text("hello\nworld".as_bytes(), "notes.txt").unwrap();
        assert_eq!(text, "hello\nworld");
    }

    #[test]
    fn test_bom_is_stripped() {
        let bytes = "\u{feff}title".as_bytes();
        assert_eq!(extract_text(bytes, "readme.md").unwrap(), "title");
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let err = extract_text(&[0xff, 0xfe, 0x00, 0x41], "blob.bin").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_invalid_pdf_is_parse_error() {
        let err = extract_text(b"not a pdf", "Report.PDF").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_parse_error() {
        let err = extract_file(Path::new("/nonexistent/ragsync/file.txt"), "file.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
