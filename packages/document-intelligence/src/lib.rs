//! Pure Azure Document Intelligence REST client.
//!
//! A minimal client for the layout model. Supports submitting a document for
//! analysis, polling the long-running operation, and returning the markdown
//! content together with page and table metadata.
//!
//! # Example
//!
//! ```rust,ignore
//! use document_intelligence::DocumentIntelligenceClient;
//!
//! let client = DocumentIntelligenceClient::new(endpoint, api_key);
//!
//! let result = client.analyze_layout(&pdf_base64).await?;
//! println!("{} pages, {} tables", result.pages.len(), result.tables.len());
//! println!("{}", result.content);
//! ```

pub mod error;
pub mod types;

pub use error::{DocumentIntelligenceError, Result};
pub use types::{
    AnalyzeResult, DocumentPage, DocumentTable, DocumentTableCell, OperationStatus,
};

use std::time::Duration;

use reqwest::Response;
use types::{AnalyzeDocumentRequest, AnalyzeOperation, ErrorResponse};

const API_VERSION: &str = "2024-11-30";
const LAYOUT_MODEL: &str = "prebuilt-layout";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: u32 = 150;

pub struct DocumentIntelligenceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    locale: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl DocumentIntelligenceClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            locale: "en-US".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Polling cadence for the analyze operation. `max_polls` bounds the total wait.
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    pub fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}&outputContentFormat=markdown&locale={}",
            self.endpoint, LAYOUT_MODEL, API_VERSION, self.locale
        )
    }

    /// Submit a base64-encoded document. Returns the operation URL to poll.
    pub async fn start_analyze(&self, document_base64: &str) -> Result<String> {
        let body = AnalyzeDocumentRequest {
            base64_source: document_base64.to_string(),
        };

        let resp = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let resp = check_status(resp).await?;

        resp.headers()
            .get("Operation-Location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                DocumentIntelligenceError::Parse("missing Operation-Location header".into())
            })
    }

    /// Poll an analyze operation until it finishes or the poll budget runs out.
    pub async fn wait_for_result(&self, operation_url: &str) -> Result<AnalyzeResult> {
        for attempt in 1..=self.max_polls {
            let resp = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .await?;

            let operation: AnalyzeOperation = check_status(resp).await?.json().await?;

            match operation.status {
                OperationStatus::Succeeded => {
                    return operation.analyze_result.ok_or_else(|| {
                        DocumentIntelligenceError::Parse("succeeded without analyzeResult".into())
                    });
                }
                OperationStatus::Failed | OperationStatus::Canceled | OperationStatus::Skipped => {
                    let (code, inner_code, message) = match operation.error {
                        Some(err) => (err.code.clone(), err.inner_code(), err.message),
                        None => (format!("{:?}", operation.status), None, String::new()),
                    };
                    return Err(DocumentIntelligenceError::OperationFailed {
                        code,
                        inner_code,
                        message,
                    });
                }
                OperationStatus::NotStarted | OperationStatus::Running => {
                    tracing::debug!(attempt, status = ?operation.status, "Layout analysis in progress");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(DocumentIntelligenceError::Timeout {
            attempts: self.max_polls,
        })
    }

    /// Analyze a document end-to-end: submit, poll, return the layout result.
    pub async fn analyze_layout(&self, document_base64: &str) -> Result<AnalyzeResult> {
        tracing::info!(bytes = document_base64.len(), "Submitting document for layout analysis");

        let operation_url = self.start_analyze(document_base64).await?;
        let result = self.wait_for_result(&operation_url).await?;

        tracing::info!(
            pages = result.pages.len(),
            tables = result.tables.len(),
            content_len = result.content.len(),
            "Layout analysis complete"
        );

        Ok(result)
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(parse_api_error(status.as_u16(), &body))
}

fn parse_api_error(status: u16, body: &str) -> DocumentIntelligenceError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(envelope) => DocumentIntelligenceError::Api {
            status,
            inner_code: envelope.error.inner_code(),
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => DocumentIntelligenceError::Api {
            status,
            code: "Unknown".to_string(),
            inner_code: None,
            message: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_url() {
        let client = DocumentIntelligenceClient::new("https://nestq.cognitiveservices.azure.com/", "k");
        assert_eq!(
            client.analyze_url(),
            "https://nestq.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-layout:analyze?api-version=2024-11-30&outputContentFormat=markdown&locale=en-US"
        );
    }

    #[test]
    fn test_parse_api_error_with_inner_code() {
        let body = r#"{"error":{"code":"InvalidRequest","message":"Invalid request.","innererror":{"code":"InvalidImage","message":"The input image is corrupted."}}}"#;
        let err = parse_api_error(400, body);
        assert!(err.has_code("InvalidImage"));
        assert!(err.has_code("InvalidRequest"));
        assert!(!err.has_code("InternalServerError"));
    }

    #[test]
    fn test_parse_api_error_unstructured_body() {
        let err = parse_api_error(502, "Bad Gateway");
        match err {
            DocumentIntelligenceError::Api { status, code, message, .. } => {
                assert_eq!(status, 502);
                assert_eq!(code, "Unknown");
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_operation_deserializes() {
        let json = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "modelId": "prebuilt-layout",
                "content": "| Symbol | Value |\n| - | - |\n| XIU | $1,000.00 |",
                "pages": [{"pageNumber": 1, "width": 8.5, "height": 11, "unit": "inch"}],
                "tables": [{"rowCount": 2, "columnCount": 2, "cells": [
                    {"rowIndex": 0, "columnIndex": 0, "content": "Symbol"}
                ]}]
            }
        }"#;
        let op: AnalyzeOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op.status, OperationStatus::Succeeded);
        let result = op.analyze_result.unwrap();
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.tables[0].column_count, 2);
        assert!(result.content.contains("XIU"));
    }
}
