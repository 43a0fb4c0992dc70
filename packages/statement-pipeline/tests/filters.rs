//! Page and excerpt filters over the bundled models.

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use statement_pipeline::error::PageFilterError;
use statement_pipeline::pdf::{decode_base64, encode_base64, PdfDocument};
use statement_pipeline::testing::{bundled_excerpt_model, bundled_page_model, pdf_fixture, MockLlm};
use statement_pipeline::{
    remove_disclaimer_pages, remove_informational_text, ClassificationLevel, DecisionPolicy, DecisionSource,
    DocumentClassifier, Label, LlmRelevanceClassifier,
};

const DISCLAIMER_PAGE: &str =
    "Important disclaimer information\nTax information and deferred sales charge details";
const HOLDINGS_PAGE: &str =
    "Account 3C8B0M-N LIRA\nSymbol Quantity Price Market Value\nXIU 100 $32.45 $3,245.00";

fn page_classifier() -> DocumentClassifier {
    DocumentClassifier::new(ClassificationLevel::Page, Arc::new(bundled_page_model())).unwrap()
}

fn excerpt_classifier() -> DocumentClassifier {
    DocumentClassifier::new(ClassificationLevel::Excerpt, Arc::new(bundled_excerpt_model()))
        .unwrap()
        .with_policy(DecisionPolicy::Threshold(0.7))
}

#[tokio::test]
async fn test_disclaimer_pages_are_removed_in_order() {
    let pages = [DISCLAIMER_PAGE, HOLDINGS_PAGE, "Page two\nBND 20 $1,500.00\nQuantity Price", DISCLAIMER_PAGE];
    let input = encode_base64(&pdf_fixture(&pages));

    let outcome = assert_ok!(remove_disclaimer_pages(&input, &page_classifier()).await);
    assert_eq!(outcome.original_page_count, 4);
    assert_eq!(outcome.kept_pages, vec![1, 2]);
    assert_eq!(outcome.removed_count(), 2);

    let filtered = PdfDocument::from_bytes(decode_base64(&outcome.document_base64()).unwrap()).unwrap();
    let texts = filtered.page_texts();
    assert!(texts[0].contains("3C8B0M-N"));
    assert!(texts[1].contains("BND"));
}

#[tokio::test]
async fn test_blank_pages_only_is_no_text_layer() {
    let input = encode_base64(&pdf_fixture(&["", ""]));
    let err = assert_err!(remove_disclaimer_pages(&input, &page_classifier()).await);
    assert!(matches!(err, PageFilterError::NoTextLayer { pages: 2 }));
}

#[tokio::test]
async fn test_excerpt_filter_keeps_data_paragraphs() {
    let markdown = [
        "| Account | 12345 | $50,000 |",
        "Generic legal text about CIPF protection.",
        "Total market value $12,345.67",
    ]
    .join("\n\n");

    let outcome = assert_ok!(remove_informational_text(&markdown, &excerpt_classifier()).await);
    assert_eq!(outcome.kept, 2);
    assert_eq!(outcome.removed, 1);
    assert_eq!(
        outcome.markdown,
        "| Account | 12345 | $50,000 |\n\nTotal market value $12,345.67"
    );
}

#[tokio::test]
async fn test_llm_only_classifier_defaults_failures_to_keep() {
    let llm = Arc::new(
        MockLlm::new()
            .with_response("legal", r#"{"exclude": 1}"#)
            .with_error_for("timeout", "deadline exceeded")
            .with_default_response(r#"{"exclude": 0}"#),
    );
    let classifier = DocumentClassifier::llm_only(
        ClassificationLevel::Excerpt,
        LlmRelevanceClassifier::boilerplate_excerpts(llm.clone(), "gpt-4o-mini"),
    );

    let units = ["Some legal text", "", "Request will timeout", "XIU 100 $3,245.00"];
    let results = classifier.classify(&units).await.unwrap();

    let labels: Vec<_> = results.iter().map(|c| c.label).collect();
    assert_eq!(labels, vec![Label::Exclude, Label::Exclude, Label::Keep, Label::Keep]);
    assert_eq!(results[1].source, DecisionSource::BlankUnit);
    assert_eq!(results[2].source, DecisionSource::FallbackFailed);
    // The blank unit never reaches the model.
    assert_eq!(llm.calls().len(), 3);
}
