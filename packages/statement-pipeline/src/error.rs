//! Typed errors for the statement pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Each collaborator and
//! each pipeline stage has its own error type so callers can decide, per
//! stage, whether a failure is fatal for the scan or recoverable.

use std::path::PathBuf;

use thiserror::Error;

use crate::scan::ScanStage;

/// Failures reported by an OCR provider. Always fatal for the current scan.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OcrServiceError {
    /// The document could not be decoded as an image/PDF by the service
    #[error("InvalidImage: {0}")]
    InvalidImage(String),

    /// The request was rejected (bad parameters, unsupported content)
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    /// Any other service-side failure
    #[error("OCR service error: {0}")]
    Service(String),

    /// The service could not be reached
    #[error("OCR transport error: {0}")]
    Transport(String),
}

/// Failures reported by an LLM provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// The completion call failed (after the client's bounded retries)
    #[error("LLM request failed: {0}")]
    Request(String),

    /// The completion returned content that does not match the requested shape
    #[error("LLM response could not be parsed: {0}")]
    Parse(String),
}

/// A feature table does not have the columns a model was trained on.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("feature columns {found:?} do not match model features {expected:?}")]
pub struct FeatureSchemaError {
    pub expected: Vec<String>,
    pub found: Vec<String>,
}

/// Failures classifying a single text unit or a batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
    /// The underlying completion call failed
    #[error("classifier LLM call failed: {0}")]
    Llm(#[from] LlmError),

    /// The model answered, but not with `{"exclude": 0|1}`
    #[error("malformed classification response ({reason}): {raw}")]
    MalformedResponse { reason: String, raw: String },

    /// The trained model cannot score this feature table
    #[error(transparent)]
    FeatureSchema(#[from] FeatureSchemaError),
}

/// A persisted relevance model could not be loaded. Fatal at construction.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model artifact {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model artifact {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Disclaimer-page removal failed. The orchestrator recovers from this by
/// processing the original document.
#[derive(Debug, Error)]
pub enum PageFilterError {
    #[error("input is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to open PDF: {0}")]
    PdfOpen(String),

    #[error("failed to write filtered PDF: {0}")]
    PdfWrite(String),

    /// None of the pages carries extractable text (image-only scan)
    #[error("no page of {pages} has a text layer")]
    NoTextLayer { pages: usize },

    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

/// Offline training-data generation failed for a whole file.
#[derive(Debug, Error)]
pub enum LabelingError {
    #[error("training data I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize training record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Pdf(#[from] PageFilterError),
}

/// Holdings of an account do not add up to its reported value.
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "account {account}: reported value {account_value:.2} does not match holdings total {holdings_total:.2} (tolerance {tolerance})"
)]
pub struct AccountValueMismatchError {
    pub account: String,
    pub account_value: f64,
    pub holdings_total: f64,
    pub tolerance: f64,
}

/// One or more accounts of an extracted statement failed validation.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{} account(s) failed value validation: {}", mismatches.len(), summarize(mismatches))]
pub struct StatementValidationError {
    pub mismatches: Vec<AccountValueMismatchError>,
}

fn summarize(mismatches: &[AccountValueMismatchError]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A fatal failure of one scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The upload is not a decodable base64 document
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error(transparent)]
    Ocr(#[from] OcrServiceError),

    #[error("excerpt classification failed: {0}")]
    Classification(#[from] ClassificationError),

    /// Filtering left nothing to extract from
    #[error("no relevant content left after filtering")]
    NoRelevantContent,

    #[error("statement extraction failed: {0}")]
    Extraction(#[from] LlmError),

    #[error(transparent)]
    Validation(#[from] StatementValidationError),
}

/// A scan that ended in the `error` state.
#[derive(Debug, Error)]
#[error("scan failed after {last_stage}: {error}")]
pub struct ScanFailure {
    /// Last stage that completed successfully
    pub last_stage: ScanStage,
    pub error: ScanError,
    pub processing_time_secs: f64,
}

impl ScanFailure {
    /// Message recorded on the scan, preserving the underlying error text.
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Result alias for scan processing.
pub type ScanResult<T> = std::result::Result<T, ScanFailure>;
