//! Statement extraction orchestrator.
//!
//! One scan turns one uploaded PDF into a [`FinancialStatement`] plus
//! provenance. Stages run in a fixed order, each consuming the previous
//! stage's output:
//!
//! ```text
//! received -> page_filtered -> ocr_complete -> markdown_cleaned
//!          -> excerpt_filtered -> llm_extracted -> done
//! ```
//!
//! Any stage may end the scan in the `error` state. Page filtering is the one
//! recoverable stage: when it fails the original document is processed.
//! Retries belong to the LLM client and to the caller, never to a stage.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::classifier::DocumentClassifier;
use crate::config::PipelineConfig;
use crate::error::{ScanError, ScanFailure, ScanResult};
use crate::filter::{remove_disclaimer_pages, remove_informational_text, ExcerptFilterOutcome};
use crate::llm::{complete_structured, LlmProvider};
use crate::markdown::{clean_markdown_text, remove_long_continuous_text};
use crate::ocr::{OcrProvider, OcrResult};
use crate::pdf::decode_base64;
use crate::prompts::INVESTMENT_STATEMENT_EXTRACTION;
use crate::statement::FinancialStatement;

pub type ScanId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Received,
    PageFiltered,
    OcrComplete,
    MarkdownCleaned,
    ExcerptFiltered,
    LlmExtracted,
    Done,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::PageFiltered => "page_filtered",
            Self::OcrComplete => "ocr_complete",
            Self::MarkdownCleaned => "markdown_cleaned",
            Self::ExcerptFiltered => "excerpt_filtered",
            Self::LlmExtracted => "llm_extracted",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible state of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Processing,
    Processed,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// Where a scan's result came from and what filtering did to it.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProvenance {
    pub scan_id: ScanId,
    pub started_at: DateTime<Utc>,
    /// Wall clock from pipeline entry to the extraction response
    pub processing_time_secs: f64,
    pub final_stage: ScanStage,
    /// Pages of the uploaded PDF (when it could be parsed)
    pub original_page_count: Option<usize>,
    pub pages_removed: usize,
    pub page_filter_applied: bool,
    /// Pages reported by OCR
    pub page_count: usize,
    pub excerpts_kept: usize,
    pub excerpts_removed: usize,
    pub ocr_source: String,
    pub llm_source: String,
    pub extraction_model: String,
    pub ocr_text: String,
    pub ocr_text_cleaned: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub statement: FinancialStatement,
    pub provenance: ScanProvenance,
}

/// PDF handed to OCR after page filtering.
struct PageFilteredPdf {
    bytes: Vec<u8>,
    original_page_count: Option<usize>,
    pages_removed: usize,
    filter_applied: bool,
    /// Every page was removed
    empty: bool,
}

/// Runs scans. Classifiers and providers are shared read-only.
pub struct StatementProcessor {
    ocr: Arc<dyn OcrProvider>,
    llm: Arc<dyn LlmProvider>,
    page_classifier: Arc<DocumentClassifier>,
    excerpt_classifier: Arc<DocumentClassifier>,
    config: PipelineConfig,
}

impl StatementProcessor {
    pub fn new(
        ocr: Arc<dyn OcrProvider>,
        llm: Arc<dyn LlmProvider>,
        page_classifier: Arc<DocumentClassifier>,
        excerpt_classifier: Arc<DocumentClassifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ocr,
            llm,
            page_classifier,
            excerpt_classifier,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one scan end to end.
    #[instrument(skip_all, fields(scan_id = %scan_id))]
    pub async fn process_scan(&self, scan_id: ScanId, file_base64: &str) -> ScanResult<ScanOutcome> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut stage = ScanStage::Received;

        let fail = |stage: ScanStage, error: ScanError| {
            let failure = ScanFailure {
                last_stage: stage,
                error,
                processing_time_secs: start.elapsed().as_secs_f64(),
            };
            error!(last_stage = %stage, error = %failure.error, "Scan failed");
            failure
        };

        let pdf = self.filter_pages(file_base64).await.map_err(|e| fail(stage, e))?;
        stage = ScanStage::PageFiltered;

        let ocr = self.run_ocr(&pdf).await.map_err(|e| fail(stage, e))?;
        stage = ScanStage::OcrComplete;

        let cleaned = self.clean_markdown(&ocr.content);
        stage = ScanStage::MarkdownCleaned;

        let excerpts = self
            .filter_excerpts(&cleaned)
            .await
            .map_err(|e| fail(stage, e))?;
        stage = ScanStage::ExcerptFiltered;

        if excerpts.markdown.trim().is_empty() {
            return Err(fail(stage, ScanError::NoRelevantContent));
        }

        let statement = self
            .extract_statement(&excerpts.markdown)
            .await
            .map_err(|e| fail(stage, e))?;
        stage = ScanStage::LlmExtracted;
        let processing_time_secs = start.elapsed().as_secs_f64();

        statement
            .validate(self.config.account_value_tolerance)
            .map_err(|e| fail(stage, e.into()))?;
        stage = ScanStage::Done;

        let provenance = ScanProvenance {
            scan_id,
            started_at,
            processing_time_secs,
            final_stage: stage,
            original_page_count: pdf.original_page_count,
            pages_removed: pdf.pages_removed,
            page_filter_applied: pdf.filter_applied,
            page_count: ocr.page_count(),
            excerpts_kept: excerpts.kept,
            excerpts_removed: excerpts.removed,
            ocr_source: self.ocr.name().to_string(),
            llm_source: self.llm.name().to_string(),
            extraction_model: self.config.extraction_model.clone(),
            ocr_text: ocr.content,
            ocr_text_cleaned: cleaned,
        };

        info!(
            accounts = statement.accounts.len(),
            holdings = statement.holdings_count(),
            processing_time_secs,
            "Scan processed"
        );
        Ok(ScanOutcome {
            statement,
            provenance,
        })
    }

    async fn filter_pages(&self, file_base64: &str) -> Result<PageFilteredPdf, ScanError> {
        let original = decode_base64(file_base64).map_err(|e| ScanError::InvalidUpload(e.to_string()))?;

        match remove_disclaimer_pages(file_base64, &self.page_classifier).await {
            Ok(outcome) => Ok(PageFilteredPdf {
                original_page_count: Some(outcome.original_page_count),
                pages_removed: outcome.removed_count(),
                filter_applied: true,
                empty: outcome.is_empty(),
                bytes: outcome.document,
            }),
            Err(e) => {
                warn!(error = %e, "Page filtering failed, processing the original document");
                Ok(PageFilteredPdf {
                    bytes: original,
                    original_page_count: None,
                    pages_removed: 0,
                    filter_applied: false,
                    empty: false,
                })
            }
        }
    }

    async fn run_ocr(&self, pdf: &PageFilteredPdf) -> Result<OcrResult, ScanError> {
        if pdf.empty {
            info!("Every page was filtered out, skipping OCR");
            return Ok(OcrResult::empty());
        }

        let result = self
            .ocr
            .analyze(&pdf.bytes)
            .instrument(info_span!("ocr", provider = self.ocr.name()))
            .await?;
        info!(pages = result.page_count(), chars = result.content.len(), "OCR complete");
        Ok(result)
    }

    fn clean_markdown(&self, content: &str) -> String {
        let cleaned = clean_markdown_text(content);
        match self.config.max_paragraph_chars {
            Some(max_chars) => remove_long_continuous_text(&cleaned, max_chars),
            None => cleaned,
        }
    }

    async fn filter_excerpts(&self, markdown: &str) -> Result<ExcerptFilterOutcome, ScanError> {
        if markdown.trim().is_empty() {
            return Ok(ExcerptFilterOutcome {
                markdown: String::new(),
                kept: 0,
                removed: 0,
            });
        }
        Ok(remove_informational_text(markdown, &self.excerpt_classifier).await?)
    }

    async fn extract_statement(&self, markdown: &str) -> Result<FinancialStatement, ScanError> {
        let template = &INVESTMENT_STATEMENT_EXTRACTION;
        let statement = complete_structured::<FinancialStatement>(
            self.llm.as_ref(),
            &self.config.extraction_model,
            template.system,
            &template.render_user(markdown),
        )
        .instrument(info_span!("extraction", model = %self.config.extraction_model))
        .await?;
        Ok(statement)
    }
}

// =============================================================================
// Scan registry
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub id: ScanId,
    pub file_name: String,
    pub status: ScanStatus,
    pub error: Option<String>,
    /// Last completed stage of a failed scan
    pub failed_after: Option<ScanStage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub outcome: Option<ScanOutcome>,
}

/// Anything that can report the status of a scan.
#[async_trait]
pub trait ScanStatusSource: Send + Sync {
    async fn status(&self, id: ScanId) -> Option<ScanStatus>;
}

/// In-memory registry running each scan as its own task.
#[derive(Clone)]
pub struct ScanRegistry {
    processor: Arc<StatementProcessor>,
    records: Arc<RwLock<HashMap<ScanId, ScanRecord>>>,
}

impl ScanRegistry {
    pub fn new(processor: Arc<StatementProcessor>) -> Self {
        Self {
            processor,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a new scan as `processing` and start it in the background.
    pub async fn submit(&self, file_name: impl Into<String>, file_base64: String) -> ScanId {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let file_name = file_name.into();

        self.records.write().await.insert(
            id,
            ScanRecord {
                id,
                file_name: file_name.clone(),
                status: ScanStatus::Processing,
                error: None,
                failed_after: None,
                created_at: now,
                updated_at: now,
                outcome: None,
            },
        );

        let registry = self.clone();
        tokio::spawn(
            async move {
                let result = registry.processor.process_scan(id, &file_base64).await;
                registry.finish(id, result).await;
            }
            .instrument(info_span!("scan_task", scan_id = %id, file_name = %file_name)),
        );

        id
    }

    async fn finish(&self, id: ScanId, result: ScanResult<ScanOutcome>) {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            warn!(scan_id = %id, "Finished scan has no record");
            return;
        };
        record.updated_at = Utc::now();
        match result {
            Ok(outcome) => {
                record.status = ScanStatus::Processed;
                record.outcome = Some(outcome);
            }
            Err(failure) => {
                record.status = ScanStatus::Error;
                record.error = Some(failure.message());
                record.failed_after = Some(failure.last_stage);
            }
        }
    }

    pub async fn get(&self, id: ScanId) -> Option<ScanRecord> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<ScanRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl ScanStatusSource for ScanRegistry {
    async fn status(&self, id: ScanId) -> Option<ScanStatus> {
        self.records.read().await.get(&id).map(|r| r.status)
    }
}

// =============================================================================
// Waiting for a scan
// =============================================================================

/// Polling cadence and ceiling for [`wait_for_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub initial_wait: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(15),
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
        }
    }
}

impl WaitConfig {
    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Finished(ScanStatus),
    TimedOut,
    UnknownScan,
}

impl WaitOutcome {
    /// Status to report: anything but a finished scan is an error.
    pub fn status(&self) -> ScanStatus {
        match self {
            Self::Finished(status) => *status,
            Self::TimedOut | Self::UnknownScan => ScanStatus::Error,
        }
    }
}

/// Poll `source` until the scan is terminal or `config.timeout` has elapsed.
pub async fn wait_for_scan<S: ScanStatusSource + ?Sized>(
    source: &S,
    id: ScanId,
    config: WaitConfig,
) -> WaitOutcome {
    let start = Instant::now();
    tokio::time::sleep(config.initial_wait.min(config.timeout)).await;

    loop {
        match source.status(id).await {
            None => {
                warn!(scan_id = %id, "Waiting on unknown scan");
                return WaitOutcome::UnknownScan;
            }
            Some(status) if status.is_terminal() => return WaitOutcome::Finished(status),
            Some(_) => {}
        }

        if start.elapsed() >= config.timeout {
            warn!(scan_id = %id, timeout_secs = config.timeout.as_secs(), "Scan timed out");
            return WaitOutcome::TimedOut;
        }
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountdownSource {
        polls_until_done: usize,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl ScanStatusSource for CountdownSource {
        async fn status(&self, _id: ScanId) -> Option<ScanStatus> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Some(if n >= self.polls_until_done {
                ScanStatus::Processed
            } else {
                ScanStatus::Processing
            })
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ScanStage::OcrComplete.to_string(), "ocr_complete");
        assert_eq!(serde_json::to_string(&ScanStage::LlmExtracted).unwrap(), "\"llm_extracted\"");
        assert_eq!(serde_json::to_string(&ScanStatus::Processed).unwrap(), "\"processed\"");
        assert!(!ScanStatus::Processing.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_terminal_status() {
        let source = CountdownSource {
            polls_until_done: 3,
            polls: AtomicUsize::new(0),
        };
        let outcome = wait_for_scan(&source, Uuid::nil(), WaitConfig::default()).await;
        assert_eq!(outcome, WaitOutcome::Finished(ScanStatus::Processed));
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let source = CountdownSource {
            polls_until_done: usize::MAX,
            polls: AtomicUsize::new(0),
        };
        let start = Instant::now();
        let outcome = wait_for_scan(&source, Uuid::nil(), WaitConfig::default()).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(outcome.status(), ScanStatus::Error);
        assert!(start.elapsed() >= Duration::from_secs(300));
        assert!(start.elapsed() < Duration::from_secs(304));
    }
}
