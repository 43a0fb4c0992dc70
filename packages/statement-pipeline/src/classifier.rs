//! Keep/exclude decisions over a batch of text units.
//!
//! A [`DocumentClassifier`] owns one classification level. It scores every
//! unit with the trained model (when one is loaded), turns scores into labels
//! according to its [`DecisionPolicy`], and asks the LLM fallback about units
//! the model cannot decide. Blank units are always excluded.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClassificationError, ModelLoadError};
use crate::features::{ExcerptFeatureExtractor, FeatureExtractor, FeatureTable, PageFeatureExtractor};
use crate::llm_classifier::LlmRelevanceClassifier;
use crate::model::{ClassificationLevel, RelevanceModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Keep,
    Exclude,
}

impl Label {
    /// Map a model/LLM flag (1 = exclude, 0 = keep).
    pub fn from_exclude_flag(flag: u8) -> Self {
        if flag == 0 {
            Self::Keep
        } else {
            Self::Exclude
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Exclude)
    }

    pub fn exclude_flag(&self) -> u8 {
        u8::from(self.is_excluded())
    }
}

/// What produced a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Empty or whitespace-only unit
    BlankUnit,
    Model,
    Llm,
    /// The LLM fallback failed; the unit is kept
    FallbackFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: Label,
    pub source: DecisionSource,
    /// Model P(exclude), when the model was consulted
    pub exclusion_probability: Option<f64>,
}

impl Classification {
    fn new(label: Label, source: DecisionSource, exclusion_probability: Option<f64>) -> Self {
        Self {
            label,
            source,
            exclusion_probability,
        }
    }
}

/// How model output becomes a label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecisionPolicy {
    /// Exclude when the decision value is positive
    Binary,
    /// Exclude when P(exclude) is above the threshold
    Threshold(f64),
}

impl DecisionPolicy {
    /// Default policy per level: binary for pages, thresholded for excerpts.
    pub fn for_level(level: ClassificationLevel, threshold: f64) -> Self {
        match level {
            ClassificationLevel::Page => Self::Binary,
            ClassificationLevel::Excerpt => Self::Threshold(threshold),
        }
    }
}

enum Scored {
    Decided(Classification),
    Undecided { model_label: Option<Label>, probability: Option<f64> },
}

/// Relevance classifier for one level (pages or excerpts).
pub struct DocumentClassifier {
    level: ClassificationLevel,
    model: Option<Arc<RelevanceModel>>,
    policy: DecisionPolicy,
    fallback: Option<LlmRelevanceClassifier>,
    ambiguity_band: Option<(f64, f64)>,
}

impl DocumentClassifier {
    /// Classifier backed by a trained model. The model must be for `level`.
    pub fn new(level: ClassificationLevel, model: Arc<RelevanceModel>) -> Result<Self, ModelLoadError> {
        if model.level != level {
            return Err(ModelLoadError::Invalid {
                name: model.name.clone(),
                reason: format!("model is for {} units, expected {}", model.level, level),
            });
        }
        Ok(Self {
            level,
            model: Some(model),
            policy: DecisionPolicy::for_level(level, 0.5),
            fallback: None,
            ambiguity_band: None,
        })
    }

    /// Load the model artifact at `path`.
    pub fn from_path(level: ClassificationLevel, path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        Self::new(level, Arc::new(RelevanceModel::load(path)?))
    }

    /// Classifier without a trained model: every non-blank unit goes to the LLM.
    pub fn llm_only(level: ClassificationLevel, fallback: LlmRelevanceClassifier) -> Self {
        Self {
            level,
            model: None,
            policy: DecisionPolicy::for_level(level, 0.5),
            fallback: Some(fallback),
            ambiguity_band: None,
        }
    }

    pub fn with_policy(mut self, policy: DecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fallback(mut self, fallback: LlmRelevanceClassifier) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Ask the fallback about units whose P(exclude) falls in `[low, high]`.
    /// Only effective with a calibrated model and a fallback.
    pub fn with_ambiguity_band(mut self, low: f64, high: f64) -> Self {
        self.ambiguity_band = Some((low.min(high), low.max(high)));
        self
    }

    pub fn level(&self) -> ClassificationLevel {
        self.level
    }

    pub fn policy(&self) -> DecisionPolicy {
        self.policy
    }

    pub fn model(&self) -> Option<&RelevanceModel> {
        self.model.as_deref()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Feature table for `units` at this classifier's level.
    pub fn feature_table<S: AsRef<str>>(&self, units: &[S]) -> FeatureTable {
        match self.level {
            ClassificationLevel::Page => PageFeatureExtractor::from_pages(units).extract_document_features(),
            ClassificationLevel::Excerpt => {
                ExcerptFeatureExtractor::from_excerpts(units).extract_document_features()
            }
        }
    }

    fn score<S: AsRef<str>>(&self, units: &[S]) -> Result<Vec<Scored>, ClassificationError> {
        let blank: Vec<bool> = units.iter().map(|u| u.as_ref().trim().is_empty()).collect();

        let Some(model) = &self.model else {
            return Ok(blank
                .into_iter()
                .map(|is_blank| {
                    if is_blank {
                        Scored::Decided(Classification::new(Label::Exclude, DecisionSource::BlankUnit, None))
                    } else {
                        Scored::Undecided {
                            model_label: None,
                            probability: None,
                        }
                    }
                })
                .collect());
        };

        // Features are computed over all units, blanks included: position and
        // word-share features depend on the whole document.
        let table = self.feature_table(units);
        let decisions = model.decision_function(&table)?;

        let scored = decisions
            .into_iter()
            .zip(blank)
            .map(|(decision, is_blank)| {
                let probability = model.calibration.map(|cal| cal.probability(decision));
                if is_blank {
                    return Scored::Decided(Classification::new(
                        Label::Exclude,
                        DecisionSource::BlankUnit,
                        probability,
                    ));
                }

                let label = match self.policy {
                    DecisionPolicy::Binary => Label::from_exclude_flag(u8::from(decision > 0.0)),
                    DecisionPolicy::Threshold(threshold) => {
                        let p = probability.unwrap_or(if decision > 0.0 { 1.0 } else { 0.0 });
                        Label::from_exclude_flag(u8::from(p > threshold))
                    }
                };

                let ambiguous = match (self.ambiguity_band, probability, &self.fallback) {
                    (Some((low, high)), Some(p), Some(_)) => p >= low && p <= high,
                    _ => false,
                };

                if ambiguous {
                    Scored::Undecided {
                        model_label: Some(label),
                        probability,
                    }
                } else {
                    Scored::Decided(Classification::new(label, DecisionSource::Model, probability))
                }
            })
            .collect();

        Ok(scored)
    }

    /// Classify every unit, in order. One label per unit.
    pub async fn classify<S: AsRef<str>>(&self, units: &[S]) -> Result<Vec<Classification>, ClassificationError> {
        let scored = self.score(units)?;
        let mut results = Vec::with_capacity(units.len());
        let mut fallback_calls = 0usize;

        for (index, (unit, scored)) in units.iter().zip(scored).enumerate() {
            let classification = match scored {
                Scored::Decided(c) => c,
                Scored::Undecided {
                    model_label,
                    probability,
                } => {
                    fallback_calls += 1;
                    self.ask_fallback(index, unit.as_ref(), model_label, probability)
                        .await
                }
            };
            results.push(classification);
        }

        let excluded = results.iter().filter(|c| c.label.is_excluded()).count();
        info!(
            level = %self.level,
            units = results.len(),
            excluded,
            fallback_calls,
            "Classified units"
        );
        Ok(results)
    }

    async fn ask_fallback(
        &self,
        index: usize,
        text: &str,
        model_label: Option<Label>,
        probability: Option<f64>,
    ) -> Classification {
        let Some(fallback) = &self.fallback else {
            // Unreachable by construction: a model-less classifier always has a fallback.
            return Classification::new(
                model_label.unwrap_or(Label::Keep),
                DecisionSource::Model,
                probability,
            );
        };

        match fallback.classify(text).await {
            Ok(verdict) => {
                debug!(index, label = ?verdict.label, ?probability, "Fallback classification");
                Classification::new(verdict.label, DecisionSource::Llm, probability)
            }
            Err(e) => {
                warn!(index, level = %self.level, error = %e, "Fallback classification failed, keeping unit");
                Classification::new(Label::Keep, DecisionSource::FallbackFailed, probability)
            }
        }
    }

    /// Indices of the units to keep, ascending.
    pub async fn relevant_indices<S: AsRef<str>>(&self, units: &[S]) -> Result<Vec<usize>, ClassificationError> {
        Ok(self
            .classify(units)
            .await?
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.label.is_excluded())
            .map(|(i, _)| i)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bundled_excerpt_model, bundled_page_model, MockLlm};

    #[test]
    fn test_label_flags() {
        assert_eq!(Label::from_exclude_flag(1), Label::Exclude);
        assert_eq!(Label::from_exclude_flag(0), Label::Keep);
        assert_eq!(Label::Exclude.exclude_flag(), 1);
    }

    #[test]
    fn test_model_level_must_match() {
        let result = DocumentClassifier::new(ClassificationLevel::Excerpt, Arc::new(bundled_page_model()));
        assert!(matches!(result, Err(ModelLoadError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_blank_units_are_excluded() {
        let classifier =
            DocumentClassifier::new(ClassificationLevel::Excerpt, Arc::new(bundled_excerpt_model())).unwrap();
        let results = classifier.classify(&["", "| XIU | 100 | $3,250.00 |", "   "]).await.unwrap();

        assert_eq!(results[0].source, DecisionSource::BlankUnit);
        assert_eq!(results[0].label, Label::Exclude);
        assert_eq!(results[1].label, Label::Keep);
        assert_eq!(results[2].label, Label::Exclude);
    }

    #[tokio::test]
    async fn test_threshold_policy_changes_outcome() {
        let model = Arc::new(bundled_excerpt_model());
        let units = ["Generic legal text about CIPF protection."];

        let strict = DocumentClassifier::new(ClassificationLevel::Excerpt, model.clone())
            .unwrap()
            .with_policy(DecisionPolicy::Threshold(0.99));
        assert_eq!(strict.classify(&units).await.unwrap()[0].label, Label::Keep);

        let default = DocumentClassifier::new(ClassificationLevel::Excerpt, model)
            .unwrap()
            .with_policy(DecisionPolicy::Threshold(0.7));
        let result = &default.classify(&units).await.unwrap()[0];
        assert_eq!(result.label, Label::Exclude);
        assert!(result.exclusion_probability.unwrap() > 0.7);
    }

    #[tokio::test]
    async fn test_llm_only_classifier_uses_fallback() {
        let llm = Arc::new(
            MockLlm::new()
                .with_response("CIPF", r#"{"exclude": 1}"#)
                .with_default_response(r#"{"exclude": 0}"#),
        );
        let classifier = DocumentClassifier::llm_only(
            ClassificationLevel::Excerpt,
            LlmRelevanceClassifier::boilerplate_excerpts(llm.clone(), "gpt-4o-mini"),
        );

        let results = classifier
            .classify(&["Protected by CIPF.", "", "| XIU | 100 |"])
            .await
            .unwrap();

        assert_eq!(results[0].label, Label::Exclude);
        assert_eq!(results[0].source, DecisionSource::Llm);
        assert_eq!(results[1].source, DecisionSource::BlankUnit);
        assert_eq!(results[2].label, Label::Keep);
        // Blank units never reach the LLM
        assert_eq!(llm.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_failure_keeps_unit() {
        let llm = Arc::new(MockLlm::new().with_error("service unavailable"));
        let classifier = DocumentClassifier::llm_only(
            ClassificationLevel::Page,
            LlmRelevanceClassifier::disclaimer_pages(llm, "gpt-4o-mini"),
        );

        let results = classifier.classify(&["Disclaimer text"]).await.unwrap();
        assert_eq!(results[0].label, Label::Keep);
        assert_eq!(results[0].source, DecisionSource::FallbackFailed);
    }

    #[tokio::test]
    async fn test_ambiguity_band_routes_to_fallback() {
        let llm = Arc::new(MockLlm::new().with_default_response(r#"{"exclude": 0}"#));
        let classifier = DocumentClassifier::new(ClassificationLevel::Excerpt, Arc::new(bundled_excerpt_model()))
            .unwrap()
            .with_policy(DecisionPolicy::Threshold(0.7))
            .with_ambiguity_band(0.0, 1.0)
            .with_fallback(LlmRelevanceClassifier::boilerplate_excerpts(llm.clone(), "gpt-4o-mini"));

        let results = classifier
            .classify(&["Generic legal text about CIPF protection."])
            .await
            .unwrap();

        assert_eq!(results[0].source, DecisionSource::Llm);
        assert_eq!(results[0].label, Label::Keep);
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_relevant_indices_are_ascending() {
        let classifier =
            DocumentClassifier::new(ClassificationLevel::Excerpt, Arc::new(bundled_excerpt_model()))
                .unwrap()
                .with_policy(DecisionPolicy::Threshold(0.7));
        let indices = classifier
            .relevant_indices(&[
                "| Account | 12345 | $50,000 |",
                "Generic legal text about CIPF protection.",
                "Total market value $12,345.67",
            ])
            .await
            .unwrap();
        assert_eq!(indices, vec![0, 2]);
    }
}
