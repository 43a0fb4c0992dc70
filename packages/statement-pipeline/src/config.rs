//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds the tuning knobs the stages read. [`AppConfig`]
//! adds provider credentials and model artifact paths, loaded from the
//! environment (and `.env` in development).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use document_intelligence::DocumentIntelligenceClient;
use dotenvy::dotenv;
use openai_client::OpenAIClient;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::classifier::{DecisionPolicy, DocumentClassifier};
use crate::llm::{LlmProvider, LlmProviderKind, OpenAiLlm};
use crate::llm_classifier::LlmRelevanceClassifier;
use crate::model::ClassificationLevel;
use crate::ocr::{DocumentIntelligenceOcr, OcrProvider, OcrProviderKind};
use crate::scan::{StatementProcessor, WaitConfig};
use crate::statement::DEFAULT_ACCOUNT_VALUE_TOLERANCE;

pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4o";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LOCAL_LLM_BASE_URL: &str = "http://127.0.0.1:1234/v1";

/// Tuning knobs shared by the pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model (or Azure deployment) used for statement extraction
    pub extraction_model: String,

    /// Model used by the LLM fallback classifier
    pub classifier_model: String,

    /// Excerpts with P(exclude) above this are removed
    pub relevance_threshold: f64,

    /// P(exclude) range in which units are re-checked by the LLM fallback
    pub ambiguity_band: Option<(f64, f64)>,

    /// Allowed gap between account value and holdings total
    pub account_value_tolerance: f64,

    /// Drop prose runs longer than this during markdown cleanup
    pub max_paragraph_chars: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction_model: DEFAULT_EXTRACTION_MODEL.to_string(),
            classifier_model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            ambiguity_band: None,
            account_value_tolerance: DEFAULT_ACCOUNT_VALUE_TOLERANCE,
            max_paragraph_chars: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_extraction_model(mut self, model: impl Into<String>) -> Self {
        self.extraction_model = model.into();
        self
    }

    pub fn with_classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = model.into();
        self
    }

    pub fn with_relevance_threshold(mut self, threshold: f64) -> Self {
        self.relevance_threshold = threshold;
        self
    }

    pub fn with_ambiguity_band(mut self, low: f64, high: f64) -> Self {
        self.ambiguity_band = Some((low, high));
        self
    }

    pub fn with_account_value_tolerance(mut self, tolerance: f64) -> Self {
        self.account_value_tolerance = tolerance;
        self
    }

    pub fn with_max_paragraph_chars(mut self, max_chars: usize) -> Self {
        self.max_paragraph_chars = Some(max_chars);
        self
    }
}

/// OCR backend and its credentials.
#[derive(Debug)]
pub enum OcrSettings {
    DocumentIntelligence { endpoint: String, api_key: SecretString },
}

impl OcrSettings {
    pub fn kind(&self) -> OcrProviderKind {
        match self {
            Self::DocumentIntelligence { .. } => OcrProviderKind::DocumentIntelligence,
        }
    }
}

/// LLM backend and its credentials.
#[derive(Debug)]
pub enum LlmSettings {
    AzureOpenAi { endpoint: String, api_key: SecretString },
    OpenAi { api_key: SecretString },
    LocalLmStudio { base_url: String },
}

impl LlmSettings {
    pub fn kind(&self) -> LlmProviderKind {
        match self {
            Self::AzureOpenAi { .. } => LlmProviderKind::AzureOpenAi,
            Self::OpenAi { .. } => LlmProviderKind::OpenAi,
            Self::LocalLmStudio { .. } => LlmProviderKind::LocalLmStudio,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug)]
pub struct AppConfig {
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
    pub page_model_path: PathBuf,
    pub excerpt_model_path: PathBuf,
    pub llm_max_retries: u32,
    pub wait: WaitConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let ocr_kind: OcrProviderKind = or_default("OCR_PROVIDER", OcrProviderKind::DocumentIntelligence.as_str())
            .parse()
            .map_err(anyhow::Error::msg)
            .context("OCR_PROVIDER is invalid")?;
        let ocr = match ocr_kind {
            OcrProviderKind::DocumentIntelligence => OcrSettings::DocumentIntelligence {
                endpoint: required("DOCUMENT_INTELLIGENCE_ENDPOINT")?,
                api_key: SecretString::from(required("DOCUMENT_INTELLIGENCE_API_KEY")?),
            },
        };

        let llm_kind: LlmProviderKind = or_default("LLM_PROVIDER", LlmProviderKind::AzureOpenAi.as_str())
            .parse()
            .map_err(anyhow::Error::msg)
            .context("LLM_PROVIDER is invalid")?;
        let llm = match llm_kind {
            LlmProviderKind::AzureOpenAi => LlmSettings::AzureOpenAi {
                endpoint: required("AZURE_OPENAI_ENDPOINT")?,
                api_key: SecretString::from(required("AZURE_OPENAI_API_KEY")?),
            },
            LlmProviderKind::OpenAi => LlmSettings::OpenAi {
                api_key: SecretString::from(required("OPENAI_API_KEY")?),
            },
            LlmProviderKind::LocalLmStudio => LlmSettings::LocalLmStudio {
                base_url: or_default("LOCAL_LLM_BASE_URL", DEFAULT_LOCAL_LLM_BASE_URL),
            },
        };

        let relevance_threshold: f64 = or_default("RELEVANCE_THRESHOLD", "0.7")
            .parse()
            .context("RELEVANCE_THRESHOLD must be a number")?;
        if !(0.0..=1.0).contains(&relevance_threshold) {
            bail!("RELEVANCE_THRESHOLD must be between 0 and 1, got {}", relevance_threshold);
        }

        let ambiguity_band = match lookup("LLM_FALLBACK_BAND") {
            Some(raw) => Some(parse_band(&raw).context("LLM_FALLBACK_BAND must look like 0.4,0.8")?),
            None => None,
        };

        let max_paragraph_chars = match lookup("MAX_PARAGRAPH_CHARS") {
            Some(raw) => Some(raw.trim().parse().context("MAX_PARAGRAPH_CHARS must be a number")?),
            None => None,
        };

        let scan_timeout_secs: u64 = or_default("SCAN_TIMEOUT_SECS", "300")
            .parse()
            .context("SCAN_TIMEOUT_SECS must be a valid number")?;

        let pipeline = PipelineConfig {
            extraction_model: or_default("EXTRACTION_MODEL", DEFAULT_EXTRACTION_MODEL),
            classifier_model: or_default("CLASSIFIER_MODEL", DEFAULT_CLASSIFIER_MODEL),
            relevance_threshold,
            ambiguity_band,
            account_value_tolerance: or_default("ACCOUNT_VALUE_TOLERANCE", "0.01")
                .parse()
                .context("ACCOUNT_VALUE_TOLERANCE must be a number")?,
            max_paragraph_chars,
        };

        Ok(Self {
            ocr,
            llm,
            page_model_path: or_default("PAGE_MODEL_PATH", "models/page_relevance.json").into(),
            excerpt_model_path: or_default("EXCERPT_MODEL_PATH", "models/excerpt_relevance.json").into(),
            llm_max_retries: or_default("LLM_MAX_RETRIES", "2")
                .parse()
                .context("LLM_MAX_RETRIES must be a valid number")?,
            wait: WaitConfig::default().with_timeout(Duration::from_secs(scan_timeout_secs)),
            pipeline,
        })
    }

    pub fn build_llm(&self) -> Arc<dyn LlmProvider> {
        let client = match &self.llm {
            LlmSettings::AzureOpenAi { endpoint, api_key } => {
                OpenAIClient::azure(endpoint.clone(), api_key.expose_secret())
            }
            LlmSettings::OpenAi { api_key } => OpenAIClient::new(api_key.expose_secret()),
            LlmSettings::LocalLmStudio { base_url } => OpenAIClient::local(base_url.clone()),
        }
        .with_max_retries(self.llm_max_retries);

        Arc::new(OpenAiLlm::new(client, self.llm.kind()))
    }

    pub fn build_ocr(&self) -> Arc<dyn OcrProvider> {
        match &self.ocr {
            OcrSettings::DocumentIntelligence { endpoint, api_key } => Arc::new(DocumentIntelligenceOcr::new(
                DocumentIntelligenceClient::new(endpoint.clone(), api_key.expose_secret()),
            )),
        }
    }

    /// Page and excerpt classifiers from the configured artifacts.
    pub fn build_classifiers(
        &self,
        llm: &Arc<dyn LlmProvider>,
    ) -> Result<(DocumentClassifier, DocumentClassifier)> {
        let mut page = DocumentClassifier::from_path(ClassificationLevel::Page, &self.page_model_path)
            .with_context(|| format!("Failed to load page model {}", self.page_model_path.display()))?;
        let mut excerpt = DocumentClassifier::from_path(ClassificationLevel::Excerpt, &self.excerpt_model_path)
            .with_context(|| format!("Failed to load excerpt model {}", self.excerpt_model_path.display()))?
            .with_policy(DecisionPolicy::Threshold(self.pipeline.relevance_threshold));

        if let Some((low, high)) = self.pipeline.ambiguity_band {
            let model = self.pipeline.classifier_model.clone();
            page = page
                .with_fallback(LlmRelevanceClassifier::disclaimer_pages(llm.clone(), model.clone()))
                .with_ambiguity_band(low, high);
            excerpt = excerpt
                .with_fallback(LlmRelevanceClassifier::boilerplate_excerpts(llm.clone(), model))
                .with_ambiguity_band(low, high);
        }

        Ok((page, excerpt))
    }

    /// Wire providers and classifiers into a processor.
    pub fn build_processor(&self) -> Result<StatementProcessor> {
        let llm = self.build_llm();
        let (page, excerpt) = self.build_classifiers(&llm)?;
        Ok(StatementProcessor::new(
            self.build_ocr(),
            llm,
            Arc::new(page),
            Arc::new(excerpt),
            self.pipeline.clone(),
        ))
    }
}

fn parse_band(raw: &str) -> Result<(f64, f64)> {
    let (low, high) = raw.split_once(',').context("expected two comma-separated numbers")?;
    let low: f64 = low.trim().parse()?;
    let high: f64 = high.trim().parse()?;
    if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
        bail!("band must satisfy 0 <= low <= high <= 1");
    }
    Ok((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    const AZURE: [(&str, &str); 4] = [
        ("DOCUMENT_INTELLIGENCE_ENDPOINT", "https://di.example.com"),
        ("DOCUMENT_INTELLIGENCE_API_KEY", "di-key"),
        ("AZURE_OPENAI_ENDPOINT", "https://aoai.example.com"),
        ("AZURE_OPENAI_API_KEY", "aoai-key"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&AZURE)).unwrap();
        assert_eq!(config.llm.kind(), LlmProviderKind::AzureOpenAi);
        assert_eq!(config.ocr.kind(), OcrProviderKind::DocumentIntelligence);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.pipeline.relevance_threshold, 0.7);
        assert_eq!(config.llm_max_retries, 2);
        assert_eq!(config.wait.timeout, Duration::from_secs(300));
        assert_eq!(config.page_model_path, PathBuf::from("models/page_relevance.json"));
    }

    #[test]
    fn test_missing_credentials_fail() {
        let err = AppConfig::from_lookup(lookup(&AZURE[..2])).unwrap_err();
        assert!(err.to_string().contains("AZURE_OPENAI_ENDPOINT"));
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let mut vars = AZURE[..2].to_vec();
        vars.push(("LLM_PROVIDER", "local-lm-studio"));
        vars.push(("RELEVANCE_THRESHOLD", "0.55"));
        vars.push(("LLM_FALLBACK_BAND", "0.4, 0.8"));
        vars.push(("MAX_PARAGRAPH_CHARS", "1000"));

        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();
        match &config.llm {
            LlmSettings::LocalLmStudio { base_url } => assert_eq!(base_url, DEFAULT_LOCAL_LLM_BASE_URL),
            other => panic!("unexpected settings: {:?}", other),
        }
        assert_eq!(config.pipeline.relevance_threshold, 0.55);
        assert_eq!(config.pipeline.ambiguity_band, Some((0.4, 0.8)));
        assert_eq!(config.pipeline.max_paragraph_chars, Some(1000));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut vars = AZURE.to_vec();
        vars.push(("RELEVANCE_THRESHOLD", "1.5"));
        assert!(AppConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = AZURE.to_vec();
        vars.push(("LLM_PROVIDER", "bedrock"));
        assert!(AppConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = AZURE.to_vec();
        vars.push(("LLM_FALLBACK_BAND", "0.9,0.1"));
        assert!(AppConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let config = AppConfig::from_lookup(lookup(&AZURE)).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("aoai-key"));
        assert!(!rendered.contains("di-key"));
    }

    #[test]
    fn test_pipeline_config_builders() {
        let config = PipelineConfig::default()
            .with_relevance_threshold(0.8)
            .with_extraction_model("gpt-4o-2024-08-06")
            .with_account_value_tolerance(0.05);
        assert_eq!(config.relevance_threshold, 0.8);
        assert_eq!(config.extraction_model, "gpt-4o-2024-08-06");
        assert_eq!(config.account_value_tolerance, 0.05);
    }
}
