//! Testing utilities including mock providers and fixtures.
//!
//! These let applications exercise the pipeline without OCR or LLM calls.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::error::{LlmError, OcrServiceError};
use crate::llm::{CompletionRequest, LlmProvider};
use crate::model::RelevanceModel;
use crate::ocr::{OcrPage, OcrProvider, OcrResult};

const PAGE_MODEL_JSON: &str = include_str!("../models/page_relevance.json");
const EXCERPT_MODEL_JSON: &str = include_str!("../models/excerpt_relevance.json");

/// Page relevance model shipped with the crate.
pub fn bundled_page_model() -> RelevanceModel {
    RelevanceModel::from_json(PAGE_MODEL_JSON, "models/page_relevance.json")
        .expect("bundled page model is valid")
}

/// Excerpt relevance model shipped with the crate.
pub fn bundled_excerpt_model() -> RelevanceModel {
    RelevanceModel::from_json(EXCERPT_MODEL_JSON, "models/excerpt_relevance.json")
        .expect("bundled excerpt model is valid")
}

// =============================================================================
// MockLlm
// =============================================================================

type MockReply = Result<String, String>;

/// A mock LLM provider.
///
/// Replies are chosen by the first registered substring found in the
/// request's user content, then the default reply. Without a default
/// the reply is an empty JSON object.
#[derive(Default)]
pub struct MockLlm {
    /// (substring, reply) in registration order
    responses: Arc<RwLock<Vec<(String, MockReply)>>>,

    default: Arc<RwLock<Option<MockReply>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used when no substring matches.
    pub fn with_default_response(self, content: impl Into<String>) -> Self {
        *self.default.write().unwrap() = Some(Ok(content.into()));
        self
    }

    /// Reply with `content` when the user prompt contains `needle`.
    pub fn with_response(self, needle: impl Into<String>, content: impl Into<String>) -> Self {
        self.responses
            .write()
            .unwrap()
            .push((needle.into(), Ok(content.into())));
        self
    }

    /// Fail every request that no substring matches.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        *self.default.write().unwrap() = Some(Err(message.into()));
        self
    }

    /// Fail requests whose user prompt contains `needle`.
    pub fn with_error_for(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .write()
            .unwrap()
            .push((needle.into(), Err(message.into())));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.read().unwrap().clone()
    }

    /// Requests for the given model.
    pub fn calls_for_model(&self, model: &str) -> Vec<CompletionRequest> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn reply_for(&self, user_content: &str) -> MockReply {
        let matched = self
            .responses
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| user_content.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());

        matched
            .or_else(|| self.default.read().unwrap().clone())
            .unwrap_or_else(|| Ok("{}".to_string()))
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn name(&self) -> &str {
        "mock-llm"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let reply = self.reply_for(&request.user_content());
        self.calls.write().unwrap().push(request);
        reply.map_err(LlmError::Request)
    }
}

// =============================================================================
// MockOcr
// =============================================================================

/// A mock OCR provider returning a fixed result or error.
#[derive(Default)]
pub struct MockOcr {
    result: Arc<RwLock<Option<Result<OcrResult, OcrServiceError>>>>,

    /// Documents received, for assertions
    documents: Arc<RwLock<Vec<Vec<u8>>>>,
}

impl MockOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, result: OcrResult) -> Self {
        *self.result.write().unwrap() = Some(Ok(result));
        self
    }

    /// Markdown `content` spread over `page_count` pages.
    pub fn with_content(self, content: impl Into<String>, page_count: u32) -> Self {
        let pages = (1..=page_count)
            .map(|page_number| OcrPage {
                page_number,
                width: Some(8.5),
                height: Some(11.0),
                unit: Some("inch".to_string()),
            })
            .collect();
        self.with_result(OcrResult {
            content: content.into(),
            pages,
            tables: Vec::new(),
        })
    }

    pub fn with_error(self, error: OcrServiceError) -> Self {
        *self.result.write().unwrap() = Some(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    pub fn documents(&self) -> Vec<Vec<u8>> {
        self.documents.read().unwrap().clone()
    }
}

#[async_trait]
impl OcrProvider for MockOcr {
    fn name(&self) -> &str {
        "mock-ocr"
    }

    async fn analyze(&self, document: &[u8]) -> Result<OcrResult, OcrServiceError> {
        self.documents.write().unwrap().push(document.to_vec());
        self.result
            .read()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(OcrResult::empty()))
    }
}

// =============================================================================
// PDF fixtures
// =============================================================================

/// Build a PDF with one page per entry, each line of an entry drawn as its
/// own text object (with a trailing space, so words never run together).
pub fn pdf_fixture(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for text in pages {
        let mut operations = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let y = 750 - 14 * i as i64;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
            operations.push(Operation::new("Td", vec![40.into(), y.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(format!("{} ", line))]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("fixture content encodes"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture PDF saves");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_llm_matches_user_content_only() {
        let llm = MockLlm::new()
            .with_response("holdings", "matched")
            .with_default_response("default");

        let request = CompletionRequest::new("m").system("about holdings").user("cash only");
        assert_eq!(llm.complete(request).await.unwrap(), "default");

        let request = CompletionRequest::new("m").user("the holdings table");
        assert_eq!(llm.complete(request).await.unwrap(), "matched");
        assert_eq!(llm.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_ocr_records_documents() {
        let ocr = MockOcr::new().with_content("# Statement", 2);
        let result = ocr.analyze(b"%PDF").await.unwrap();
        assert_eq!(result.page_count(), 2);
        assert_eq!(ocr.call_count(), 1);
    }

    #[test]
    fn test_bundled_models_load() {
        assert_eq!(bundled_page_model().feature_names.len(), 8);
        assert!(bundled_excerpt_model().is_calibrated());
    }
}
