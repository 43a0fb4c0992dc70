//! Property tests for ordering, feature and cleanup invariants.

use proptest::prelude::*;

use statement_pipeline::filter::retain_in_order;
use statement_pipeline::markdown::{clean_markdown_text, join_paragraphs, split_paragraphs};
use statement_pipeline::pdf::{decode_base64, encode_base64};
use statement_pipeline::{ExcerptFeatureExtractor, FeatureExtractor, Label, PageFeatureExtractor};

fn label() -> impl Strategy<Value = Label> {
    prop_oneof![Just(Label::Keep), Just(Label::Exclude)]
}

proptest! {
    #[test]
    fn retained_items_keep_relative_order(labels in prop::collection::vec(label(), 0..40)) {
        let items: Vec<usize> = (0..labels.len()).collect();
        let kept = retain_in_order(&items, &labels);

        prop_assert!(kept.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(kept.len(), labels.iter().filter(|l| **l == Label::Keep).count());
    }

    #[test]
    fn features_are_finite(units in prop::collection::vec(".{0,120}", 0..8)) {
        let pages = PageFeatureExtractor::from_pages(&units).extract_document_features();
        let excerpts = ExcerptFeatureExtractor::from_excerpts(&units).extract_document_features();

        prop_assert_eq!(pages.len(), units.len());
        prop_assert_eq!(excerpts.len(), units.len());
        for row in pages.rows().iter().chain(excerpts.rows()) {
            prop_assert!(row.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn cleanup_is_idempotent(text in "([a-z |#!\\[\\]()<>/=\"-]|\n|https://x\\.io|<figure>|</figure>|<!--|-->){0,60}") {
        let once = clean_markdown_text(&text);
        prop_assert_eq!(clean_markdown_text(&once), once);
    }

    #[test]
    fn paragraphs_round_trip(text in "[a-z\n]{0,80}") {
        prop_assert_eq!(join_paragraphs(&split_paragraphs(&text)), text);
    }

    #[test]
    fn base64_round_trips(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(decode_base64(&encode_base64(&bytes)).unwrap(), bytes);
    }
}
