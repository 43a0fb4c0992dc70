//! OCR provider abstraction and the Document Intelligence adapter.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use document_intelligence::{AnalyzeResult, DocumentIntelligenceClient, DocumentIntelligenceError};
use serde::Serialize;
use tracing::instrument;

use crate::error::OcrServiceError;
use crate::pdf::encode_base64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrPage {
    pub page_number: u32,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrTable {
    pub row_count: u32,
    pub column_count: u32,
}

/// Markdown rendering of a document plus page and table metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrResult {
    pub content: String,
    pub pages: Vec<OcrPage>,
    pub tables: Vec<OcrTable>,
}

impl OcrResult {
    /// Result for a document with nothing left to read.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl From<AnalyzeResult> for OcrResult {
    fn from(result: AnalyzeResult) -> Self {
        Self {
            content: result.content,
            pages: result
                .pages
                .into_iter()
                .map(|p| OcrPage {
                    page_number: p.page_number,
                    width: p.width,
                    height: p.height,
                    unit: p.unit,
                })
                .collect(),
            tables: result
                .tables
                .into_iter()
                .map(|t| OcrTable {
                    row_count: t.row_count,
                    column_count: t.column_count,
                })
                .collect(),
        }
    }
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Provider name recorded in scan provenance.
    fn name(&self) -> &str;

    async fn analyze(&self, document: &[u8]) -> Result<OcrResult, OcrServiceError>;
}

/// Which OCR backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrProviderKind {
    DocumentIntelligence,
}

impl OcrProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentIntelligence => "document-intelligence",
        }
    }
}

impl fmt::Display for OcrProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document-intelligence" | "azure-document-intelligence" => Ok(Self::DocumentIntelligence),
            other => Err(format!(
                "unknown OCR provider '{}' (expected document-intelligence)",
                other
            )),
        }
    }
}

/// [`OcrProvider`] backed by the Document Intelligence layout model.
pub struct DocumentIntelligenceOcr {
    client: DocumentIntelligenceClient,
}

impl DocumentIntelligenceOcr {
    pub fn new(client: DocumentIntelligenceClient) -> Self {
        Self { client }
    }
}

/// Map a service error onto the pipeline's OCR error kinds.
pub fn map_service_error(error: DocumentIntelligenceError) -> OcrServiceError {
    let message = error.to_string();
    if error.has_code("InvalidImage") {
        OcrServiceError::InvalidImage(message)
    } else if error.has_code("InvalidRequest") {
        OcrServiceError::InvalidRequest(message)
    } else if matches!(error, DocumentIntelligenceError::Network(_)) {
        OcrServiceError::Transport(message)
    } else {
        OcrServiceError::Service(message)
    }
}

#[async_trait]
impl OcrProvider for DocumentIntelligenceOcr {
    fn name(&self) -> &str {
        OcrProviderKind::DocumentIntelligence.as_str()
    }

    #[instrument(skip(self, document), fields(bytes = document.len()))]
    async fn analyze(&self, document: &[u8]) -> Result<OcrResult, OcrServiceError> {
        let result = self
            .client
            .analyze_layout(&encode_base64(document))
            .await
            .map_err(map_service_error)?;
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_image_takes_precedence_over_invalid_request() {
        let err = DocumentIntelligenceError::Api {
            status: 400,
            code: "InvalidRequest".into(),
            inner_code: Some("InvalidImage".into()),
            message: "The input image is corrupted.".into(),
        };
        assert!(matches!(map_service_error(err), OcrServiceError::InvalidImage(_)));
    }

    #[test]
    fn test_other_codes_map_to_service_error() {
        let err = DocumentIntelligenceError::OperationFailed {
            code: "InternalServerError".into(),
            inner_code: None,
            message: "boom".into(),
        };
        assert!(matches!(map_service_error(err), OcrServiceError::Service(_)));

        let err = DocumentIntelligenceError::Api {
            status: 400,
            code: "InvalidRequest".into(),
            inner_code: Some("InvalidContentLength".into()),
            message: "too large".into(),
        };
        assert!(matches!(map_service_error(err), OcrServiceError::InvalidRequest(_)));
    }

    #[test]
    fn test_analyze_result_conversion() {
        let result: OcrResult = serde_json::from_str::<AnalyzeResult>(
            r##"{"content": "# Statement", "pages": [{"pageNumber": 1}, {"pageNumber": 2}], "tables": []}"##,
        )
        .map(Into::into)
        .unwrap();
        assert_eq!(result.page_count(), 2);
        assert_eq!(result.content, "# Statement");
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!(
            "document-intelligence".parse::<OcrProviderKind>(),
            Ok(OcrProviderKind::DocumentIntelligence)
        );
        assert!("tesseract".parse::<OcrProviderKind>().is_err());
    }
}
