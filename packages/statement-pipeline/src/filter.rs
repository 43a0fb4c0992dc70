//! Page and excerpt filters.
//!
//! Both filters follow the same shape: split the input into units, classify
//! the whole batch, keep the units labelled [`Label::Keep`] in their original
//! order, and reassemble.

use serde::Serialize;
use tracing::{info, instrument};

use crate::classifier::{Classification, DocumentClassifier, Label};
use crate::error::{ClassificationError, PageFilterError};
use crate::markdown::{join_paragraphs, split_paragraphs};
use crate::pdf::{encode_base64, PdfDocument};

/// Items at the kept positions, in their original relative order.
pub fn retain_in_order<T: Clone>(items: &[T], labels: &[Label]) -> Vec<T> {
    items
        .iter()
        .zip(labels)
        .filter(|(_, label)| !label.is_excluded())
        .map(|(item, _)| item.clone())
        .collect()
}

fn kept_indices(classifications: &[Classification]) -> Vec<usize> {
    classifications
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.label.is_excluded())
        .map(|(i, _)| i)
        .collect()
}

// =============================================================================
// Page filter
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PageFilterOutcome {
    /// Filtered PDF, empty when every page was removed
    #[serde(skip)]
    pub document: Vec<u8>,
    pub original_page_count: usize,
    /// 0-based indices of the surviving pages, ascending
    pub kept_pages: Vec<usize>,
}

impl PageFilterOutcome {
    /// Filtered PDF, base64-encoded.
    pub fn document_base64(&self) -> String {
        encode_base64(&self.document)
    }

    pub fn removed_count(&self) -> usize {
        self.original_page_count - self.kept_pages.len()
    }

    /// Whether every page was removed.
    pub fn is_empty(&self) -> bool {
        self.kept_pages.is_empty()
    }
}

/// Remove disclaimer pages from a base64-encoded PDF.
///
/// The outcome holds a new PDF with the surviving pages in original order
/// (see [`PageFilterOutcome::document_base64`]). A PDF
/// without any text layer is an error ([`PageFilterError::NoTextLayer`]);
/// callers decide whether to fall back to the unfiltered document.
#[instrument(skip(input_base64, classifier), fields(bytes = input_base64.len()))]
pub async fn remove_disclaimer_pages(
    input_base64: &str,
    classifier: &DocumentClassifier,
) -> Result<PageFilterOutcome, PageFilterError> {
    let pdf = PdfDocument::from_base64(input_base64)?;
    let texts = pdf.page_texts();

    if !texts.is_empty() && texts.iter().all(|t| t.trim().is_empty()) {
        return Err(PageFilterError::NoTextLayer { pages: texts.len() });
    }

    let classifications = classifier.classify(&texts).await?;
    let kept_pages = kept_indices(&classifications);
    let document = if kept_pages.is_empty() {
        Vec::new()
    } else {
        pdf.retain_pages(&kept_pages)?
    };

    let outcome = PageFilterOutcome {
        document,
        original_page_count: texts.len(),
        kept_pages,
    };

    info!(
        pages = outcome.original_page_count,
        kept = outcome.kept_pages.len(),
        removed = outcome.removed_count(),
        "Removed disclaimer pages"
    );
    Ok(outcome)
}

// =============================================================================
// Excerpt filter
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExcerptFilterOutcome {
    pub markdown: String,
    pub kept: usize,
    pub removed: usize,
}

/// Remove boilerplate paragraphs from markdown.
#[instrument(skip(markdown, classifier), fields(chars = markdown.len()))]
pub async fn remove_informational_text(
    markdown: &str,
    classifier: &DocumentClassifier,
) -> Result<ExcerptFilterOutcome, ClassificationError> {
    let paragraphs = split_paragraphs(markdown);
    let labels: Vec<Label> = classifier
        .classify(&paragraphs)
        .await?
        .into_iter()
        .map(|c| c.label)
        .collect();

    let kept = retain_in_order(&paragraphs, &labels);
    let outcome = ExcerptFilterOutcome {
        markdown: join_paragraphs(&kept),
        kept: kept.len(),
        removed: paragraphs.len() - kept.len(),
    };

    info!(
        paragraphs = paragraphs.len(),
        kept = outcome.kept,
        removed = outcome.removed,
        "Removed informational text"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_in_order() {
        let items = ["a", "b", "c", "d"];
        let labels = [Label::Exclude, Label::Keep, Label::Exclude, Label::Keep];
        assert_eq!(retain_in_order(&items, &labels), vec!["b", "d"]);
    }

    #[test]
    fn test_retain_in_order_all_excluded() {
        let items = [1, 2];
        assert!(retain_in_order(&items, &[Label::Exclude, Label::Exclude]).is_empty());
    }

    #[test]
    fn test_removed_count() {
        let outcome = PageFilterOutcome {
            document: Vec::new(),
            original_page_count: 7,
            kept_pages: vec![1, 2, 3, 4, 5],
        };
        assert_eq!(outcome.removed_count(), 2);
        assert!(!outcome.is_empty());
    }
}
