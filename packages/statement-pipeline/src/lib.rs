//! Investment Statement Pre-processing Pipeline
//!
//! Turns an uploaded PDF account statement into a structured
//! [`FinancialStatement`] while keeping the LLM context small:
//!
//! 1. Disclaimer pages are removed from the PDF by a trained page classifier
//! 2. The remaining pages are OCR'd to markdown and cleaned up
//! 3. Boilerplate paragraphs are removed by a trained excerpt classifier
//! 4. What is left goes to the extraction LLM as strict structured output
//! 5. Each account's value is checked against the sum of its holdings
//!
//! Trained classifiers can be backed (or replaced) by an LLM classifier
//! which also generates their training data offline.
//!
//! # Usage
//!
//! ```rust,ignore
//! use statement_pipeline::{AppConfig, ScanId};
//!
//! let processor = AppConfig::from_env()?.build_processor()?;
//! let outcome = processor.process_scan(ScanId::now_v7(), &pdf_base64).await?;
//! println!("{}", serde_json::to_string_pretty(&outcome.statement)?);
//! ```
//!
//! # Modules
//!
//! - [`features`] - Feature extraction for pages and excerpts
//! - [`model`] - Persisted scale→SVM relevance models
//! - [`classifier`] - Document-level classification with LLM fallback
//! - [`filter`] - Page and excerpt filters
//! - [`scan`] - Scan orchestration, registry and status wait
//! - [`testing`] - Mock providers and fixtures

pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod filter;
pub mod labeling;
pub mod llm;
pub mod llm_classifier;
pub mod markdown;
pub mod model;
pub mod ocr;
pub mod pdf;
pub mod prompts;
pub mod scan;
pub mod statement;
pub mod testing;

pub use classifier::{Classification, DecisionPolicy, DecisionSource, DocumentClassifier, Label};
pub use config::{AppConfig, PipelineConfig};
pub use error::{
    AccountValueMismatchError, ClassificationError, FeatureSchemaError, LabelingError, LlmError,
    ModelLoadError, OcrServiceError, PageFilterError, ScanError, ScanFailure, ScanResult,
    StatementValidationError,
};
pub use features::{
    ExcerptFeatureExtractor, FeatureExtractor, FeatureTable, FeatureVector, PageFeatureExtractor,
};
pub use filter::{remove_disclaimer_pages, remove_informational_text, ExcerptFilterOutcome, PageFilterOutcome};
pub use llm::{CompletionRequest, LlmProvider, LlmProviderKind, OpenAiLlm};
pub use llm_classifier::{LlmClassification, LlmRelevanceClassifier};
pub use markdown::clean_markdown_text;
pub use model::{ClassificationLevel, RelevanceModel};
pub use ocr::{DocumentIntelligenceOcr, OcrProvider, OcrProviderKind, OcrResult};
pub use scan::{
    wait_for_scan, ScanId, ScanOutcome, ScanProvenance, ScanRecord, ScanRegistry, ScanStage,
    ScanStatus, ScanStatusSource, StatementProcessor, WaitConfig, WaitOutcome,
};
pub use statement::{Account, AccountType, Client, FinancialStatement, Holding};
