//! LLM-backed relevance classification.
//!
//! Used to label training data and as a fallback when no trained model is
//! available (or the trained model is unsure). One prompt template per
//! classification level; the reply must be `{"exclude": 0|1}`.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::classifier::Label;
use crate::error::ClassificationError;
use crate::llm::{strip_code_fences, CompletionRequest, LlmProvider};
use crate::prompts::{PromptTemplate, DISCLAIMER_PAGE_CLASSIFICATION, STANDARD_TEXT_CLASSIFICATION};

/// Reply shape requested from the model.
fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "exclude": { "type": "integer" } },
        "required": ["exclude"],
        "additionalProperties": false
    })
}

/// In-flight requests of [`LlmRelevanceClassifier::classify_batch`].
pub const BATCH_CONCURRENCY: usize = 4;

/// Verdict of one LLM classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmClassification {
    pub label: Label,
    /// Parsed reply, kept for training records and debugging
    pub raw: Value,
}

/// Classifies text units by prompting a chat model.
#[derive(Clone)]
pub struct LlmRelevanceClassifier {
    llm: Arc<dyn LlmProvider>,
    template: PromptTemplate,
    model: String,
}

impl LlmRelevanceClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, template: PromptTemplate, model: impl Into<String>) -> Self {
        Self {
            llm,
            template,
            model: model.into(),
        }
    }

    /// Classifier for whole PDF pages (disclaimer vs. data pages).
    pub fn disclaimer_pages(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self::new(llm, DISCLAIMER_PAGE_CLASSIFICATION, model)
    }

    /// Classifier for markdown excerpts (boilerplate vs. statement data).
    pub fn boilerplate_excerpts(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self::new(llm, STANDARD_TEXT_CLASSIFICATION, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Classify `text` with the configured model.
    pub async fn classify(&self, text: &str) -> Result<LlmClassification, ClassificationError> {
        self.classify_with_model(text, &self.model).await
    }

    #[instrument(skip(self, text), fields(template = self.template.name, chars = text.len()))]
    pub async fn classify_with_model(
        &self,
        text: &str,
        model: &str,
    ) -> Result<LlmClassification, ClassificationError> {
        let request = CompletionRequest::new(model)
            .system(self.template.system)
            .user(self.template.render_user(text))
            .json_schema("classification_response", classification_schema());

        let content = self.llm.complete(request).await?;
        let verdict = parse_classification(&content)?;
        debug!(label = ?verdict.label, "LLM classification");
        Ok(verdict)
    }

    /// Classify units with bounded concurrency. Results are in input order and
    /// a failure affects only its own slot.
    pub async fn classify_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
    ) -> Vec<Result<LlmClassification, ClassificationError>> {
        stream::iter(texts.iter().enumerate())
            .map(|(index, text)| async move {
                let result = self.classify(text.as_ref()).await;
                if let Err(e) = &result {
                    warn!(index, error = %e, "LLM classification failed");
                }
                result
            })
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await
    }
}

/// Parse a `{"exclude": ...}` reply. Accepts 0/1 as integers, booleans or strings.
pub fn parse_classification(content: &str) -> Result<LlmClassification, ClassificationError> {
    let malformed = |reason: &str| ClassificationError::MalformedResponse {
        reason: reason.to_string(),
        raw: content.to_string(),
    };

    let raw: Value =
        serde_json::from_str(strip_code_fences(content)).map_err(|_| malformed("not JSON"))?;

    let exclude = match raw.get("exclude") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
        None => return Err(malformed("missing \"exclude\"")),
    };

    let label = match exclude {
        Some(0) => Label::Keep,
        Some(1) => Label::Exclude,
        _ => return Err(malformed("\"exclude\" must be 0 or 1")),
    };

    Ok(LlmClassification { label, raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;

    #[test]
    fn test_parse_classification_accepts_integer_bool_and_string() {
        assert_eq!(parse_classification(r#"{"exclude": 1}"#).unwrap().label, Label::Exclude);
        assert_eq!(parse_classification(r#"{"exclude": 0}"#).unwrap().label, Label::Keep);
        assert_eq!(parse_classification(r#"{"exclude": true}"#).unwrap().label, Label::Exclude);
        assert_eq!(parse_classification(r#"{"exclude": "0"}"#).unwrap().label, Label::Keep);
        assert_eq!(
            parse_classification("```json\n{\"exclude\": 1}\n```").unwrap().label,
            Label::Exclude
        );
    }

    #[test]
    fn test_parse_classification_rejects_malformed() {
        for bad in [r#"{"keep": 1}"#, r#"{"exclude": 2}"#, "exclude", r#"{"exclude": null}"#, "[]"] {
            assert!(
                matches!(
                    parse_classification(bad),
                    Err(ClassificationError::MalformedResponse { .. })
                ),
                "{} should be malformed",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_classify_sends_rendered_prompt() {
        let llm = Arc::new(MockLlm::new().with_default_response(r#"{"exclude": 1}"#));
        let classifier = LlmRelevanceClassifier::disclaimer_pages(llm.clone(), "gpt-4o-mini");

        let verdict = classifier.classify("Tax information").await.unwrap();
        assert_eq!(verdict.label, Label::Exclude);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "gpt-4o-mini");
        assert!(calls[0].user_content().contains("Tax information"));
        assert!((calls[0].temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_failures() {
        let llm = Arc::new(
            MockLlm::new()
                .with_response("legal", r#"{"exclude": 1}"#)
                .with_response("holdings", r#"{"exclude": 0}"#)
                .with_response("garbled", "sure, exclude it"),
        );
        let classifier = LlmRelevanceClassifier::boilerplate_excerpts(llm, "gpt-4o-mini");

        let results = classifier
            .classify_batch(&["legal notice", "garbled text", "holdings table"])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().label, Label::Exclude);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().label, Label::Keep);
    }
}
