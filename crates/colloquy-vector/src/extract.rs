//! Plain-text extraction for uploaded documents.

use colloquy_core::types::DocumentType;
use tracing::debug;

use crate::error::IngestError;

/// Extract plain text from raw file bytes.
///
/// PDF pages are joined with a blank line. Text and markdown are decoded as
/// UTF-8 with malformed sequences replaced, so decoding never fails.
pub fn extract_text(bytes: &[u8], file_type: DocumentType) -> Result<String, IngestError> {
    match file_type {
        DocumentType::Pdf => extract_pdf(bytes),
        DocumentType::Txt | DocumentType::Md => Ok(decode_text(bytes)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, IngestError> {
    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| IngestError::Extraction(format!("PDF parsing failed: {}", e)))?;

    let pages: Vec<&str> = raw_pages
        .iter()
        .map(|page| page.trim())
        .filter(|page| !page.is_empty())
        .collect();

    debug!(pages = pages.len(), "Extracted PDF text");
    Ok(pages.join("\n\n"))
}

fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string()
}
