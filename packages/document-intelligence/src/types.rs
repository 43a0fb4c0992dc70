use serde::{Deserialize, Serialize};

/// Body of an analyze request.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeDocumentRequest {
    #[serde(rename = "base64Source")]
    pub base64_source: String,
}

/// Polled state of an analyze operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeOperation {
    pub status: OperationStatus,
    #[serde(rename = "analyzeResult")]
    pub analyze_result: Option<AnalyzeResult>,
    pub error: Option<ServiceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Skipped,
}

/// Result of the layout model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeResult {
    #[serde(rename = "modelId", default)]
    pub model_id: String,
    /// Markdown (or plain text) rendering of the whole document.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pages: Vec<DocumentPage>,
    #[serde(default)]
    pub tables: Vec<DocumentTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPage {
    #[serde(rename = "pageNumber")]
    pub page_number: u32,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTable {
    #[serde(rename = "rowCount")]
    pub row_count: u32,
    #[serde(rename = "columnCount")]
    pub column_count: u32,
    #[serde(default)]
    pub cells: Vec<DocumentTableCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTableCell {
    #[serde(rename = "rowIndex")]
    pub row_index: u32,
    #[serde(rename = "columnIndex")]
    pub column_index: u32,
    #[serde(default)]
    pub content: String,
}

/// Error envelope returned by the service on 4xx/5xx.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ServiceError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "innererror")]
    pub inner_error: Option<InnerError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InnerError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ServiceError {
    pub fn inner_code(&self) -> Option<String> {
        self.inner_error.as_ref().map(|inner| inner.code.clone())
    }
}
