//! PDF access for page-level filtering (lopdf).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lopdf::Document;
use tracing::{debug, warn};

use crate::error::PageFilterError;

pub fn decode_base64(input: &str) -> Result<Vec<u8>, PageFilterError> {
    Ok(STANDARD.decode(input.trim())?)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// A parsed PDF plus the bytes it was read from.
pub struct PdfDocument {
    bytes: Vec<u8>,
    document: Document,
}

impl PdfDocument {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PageFilterError> {
        let document =
            Document::load_mem(&bytes).map_err(|e| PageFilterError::PdfOpen(e.to_string()))?;
        Ok(Self { bytes, document })
    }

    pub fn from_base64(input: &str) -> Result<Self, PageFilterError> {
        Self::from_bytes(decode_base64(input)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Text layer of every page, in page order. Pages whose text cannot be
    /// extracted yield an empty string.
    pub fn page_texts(&self) -> Vec<String> {
        self.document
            .get_pages()
            .keys()
            .map(|&number| match self.document.extract_text(&[number]) {
                Ok(text) => text,
                Err(e) => {
                    warn!(page = number, error = %e, "Failed to extract page text");
                    String::new()
                }
            })
            .collect()
    }

    /// Serialize a copy containing only the pages at `keep` (0-based), in
    /// their original order.
    pub fn retain_pages(&self, keep: &[usize]) -> Result<Vec<u8>, PageFilterError> {
        let pages = self.document.get_pages();
        let to_delete: Vec<u32> = pages
            .keys()
            .enumerate()
            .filter(|(index, _)| !keep.contains(index))
            .map(|(_, &number)| number)
            .collect();

        if to_delete.is_empty() {
            return Ok(self.bytes.clone());
        }

        let mut copy =
            Document::load_mem(&self.bytes).map_err(|e| PageFilterError::PdfOpen(e.to_string()))?;
        copy.delete_pages(&to_delete);
        copy.prune_objects();

        let mut out = Vec::new();
        copy.save_to(&mut out)
            .map_err(|e| PageFilterError::PdfWrite(e.to_string()))?;

        debug!(
            original_pages = pages.len(),
            deleted = to_delete.len(),
            bytes = out.len(),
            "Wrote page subset"
        );
        Ok(out)
    }
}
