//! Offline training-data generation.
//!
//! Labels pages or excerpts with the LLM classifier and appends one JSON
//! object per labelled unit to a JSON Lines file. Per-unit failures are
//! counted and skipped. Files already present in the output are skipped on
//! the next run, so an interrupted run can be resumed.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::LabelingError;
use crate::llm_classifier::LlmRelevanceClassifier;
use crate::markdown::{clean_markdown_text, split_paragraphs};
use crate::model::ClassificationLevel;
use crate::pdf::PdfDocument;

/// One labelled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub text: String,
    /// 1 = exclude, 0 = keep
    pub exclude: u8,
    pub level: ClassificationLevel,
    /// Model that produced the label
    pub source_model: String,
    pub file_name: String,
    /// 1-based page number, for page records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
}

/// Records produced for one file.
#[derive(Debug, Clone, Default)]
pub struct LabeledUnits {
    pub records: Vec<TrainingRecord>,
    /// Units whose classification failed
    pub errors: usize,
    /// Blank units, never sent to the model
    pub blank: usize,
}

/// Totals over a labelling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelingSummary {
    pub files: usize,
    /// Files skipped because the output already holds their records
    pub skipped: usize,
    pub records: usize,
    pub errors: usize,
}

impl LabelingSummary {
    pub fn add(&mut self, units: &LabeledUnits) {
        self.files += 1;
        self.records += units.records.len();
        self.errors += units.errors;
    }
}

async fn label_units(
    classifier: &LlmRelevanceClassifier,
    level: ClassificationLevel,
    units: Vec<(Option<usize>, String)>,
    file_name: &str,
) -> LabeledUnits {
    let mut labeled = LabeledUnits::default();
    let (blank, units): (Vec<_>, Vec<_>) = units.into_iter().partition(|(_, t)| t.trim().is_empty());
    labeled.blank = blank.len();

    let texts: Vec<&str> = units.iter().map(|(_, t)| t.as_str()).collect();
    let results = classifier.classify_batch(&texts).await;

    for ((page_number, text), result) in units.into_iter().zip(results) {
        match result {
            Ok(verdict) => labeled.records.push(TrainingRecord {
                text,
                exclude: verdict.label.exclude_flag(),
                level,
                source_model: classifier.model().to_string(),
                file_name: file_name.to_string(),
                page_number,
            }),
            Err(e) => {
                warn!(file_name, ?page_number, error = %e, "Skipping unit");
                labeled.errors += 1;
            }
        }
    }
    labeled
}

/// Label every page of a PDF.
#[instrument(skip(classifier, pdf), fields(bytes = pdf.len()))]
pub async fn label_pages(
    classifier: &LlmRelevanceClassifier,
    pdf: Vec<u8>,
    file_name: &str,
) -> Result<LabeledUnits, LabelingError> {
    let document = PdfDocument::from_bytes(pdf)?;
    let units = document
        .page_texts()
        .into_iter()
        .enumerate()
        .map(|(i, text)| (Some(i + 1), text))
        .collect();

    let labeled = label_units(classifier, ClassificationLevel::Page, units, file_name).await;
    info!(records = labeled.records.len(), errors = labeled.errors, "Labelled pages");
    Ok(labeled)
}

/// Label every paragraph of OCR'd markdown, after cleanup.
#[instrument(skip(classifier, markdown), fields(chars = markdown.len()))]
pub async fn label_excerpts(
    classifier: &LlmRelevanceClassifier,
    markdown: &str,
    file_name: &str,
) -> LabeledUnits {
    let cleaned = clean_markdown_text(markdown);
    let units = split_paragraphs(&cleaned)
        .into_iter()
        .map(|p| (None, p.to_string()))
        .collect();

    let labeled = label_units(classifier, ClassificationLevel::Excerpt, units, file_name).await;
    info!(records = labeled.records.len(), errors = labeled.errors, "Labelled excerpts");
    labeled
}

/// Appends records to a JSON Lines file.
pub struct TrainingDataWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TrainingDataWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LabelingError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LabelingError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    /// Append and flush, so a crash loses at most the current file.
    pub fn append(&mut self, records: &[TrainingRecord]) -> Result<(), LabelingError> {
        for record in records {
            serde_json::to_writer(&mut self.out, record)?;
            self.out.write_all(b"\n").map_err(|source| self.io_error(source))?;
        }
        self.out.flush().map_err(|source| self.io_error(source))?;
        debug!(path = %self.path.display(), records = records.len(), "Appended training records");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> LabelingError {
        LabelingError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// File names that already have records in `path`. Missing file: none.
pub fn processed_files(path: impl AsRef<Path>) -> Result<HashSet<String>, LabelingError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let io_error = |source: std::io::Error| LabelingError::Io {
        path: path.to_path_buf(),
        source,
    };

    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut files = HashSet::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrainingRecord>(&line) {
            Ok(record) => {
                files.insert(record.file_name);
            }
            Err(e) => warn!(line = number + 1, error = %e, "Ignoring malformed training record"),
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pdf_fixture, MockLlm};
    use std::sync::Arc;

    fn record(file_name: &str) -> TrainingRecord {
        TrainingRecord {
            text: "Important disclosures".into(),
            exclude: 1,
            level: ClassificationLevel::Page,
            source_model: "gpt-4o-mini".into(),
            file_name: file_name.into(),
            page_number: Some(1),
        }
    }

    #[tokio::test]
    async fn test_label_pages_numbers_pages_from_one() {
        let llm = Arc::new(
            MockLlm::new()
                .with_response("Disclosures", r#"{"exclude": 1}"#)
                .with_default_response(r#"{"exclude": 0}"#),
        );
        let classifier = LlmRelevanceClassifier::disclaimer_pages(llm, "gpt-4o-mini");
        let pdf = pdf_fixture(&["Account 3C8B0M-N\nXIU 100 $3,245.00", "Disclosures and notices"]);

        let labeled = label_pages(&classifier, pdf, "march.pdf").await.unwrap();
        let flags: Vec<_> = labeled.records.iter().map(|r| (r.page_number, r.exclude)).collect();
        assert_eq!(flags, vec![(Some(1), 0), (Some(2), 1)]);
        assert_eq!(labeled.records[0].file_name, "march.pdf");
    }

    #[tokio::test]
    async fn test_failed_units_are_counted_and_skipped() {
        let llm = Arc::new(
            MockLlm::new()
                .with_error_for("broken", "timeout")
                .with_default_response(r#"{"exclude": 0}"#),
        );
        let classifier = LlmRelevanceClassifier::boilerplate_excerpts(llm.clone(), "gpt-4o-mini");

        let labeled = label_excerpts(&classifier, "first\n\nbroken one\n\nthird", "a.pdf").await;
        assert_eq!(labeled.records.len(), 2);
        assert_eq!(labeled.errors, 1);
        assert_eq!(llm.calls().len(), 3);
    }

    #[test]
    fn test_processed_files_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.jsonl");
        assert!(processed_files(&path).unwrap().is_empty());

        let mut writer = TrainingDataWriter::open(&path).unwrap();
        writer.append(&[record("a.pdf"), record("b.pdf")]).unwrap();
        drop(writer);

        let mut writer = TrainingDataWriter::open(&path).unwrap();
        writer.append(&[record("c.pdf")]).unwrap();

        let files = processed_files(&path).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.contains("b.pdf"));
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = LabelingSummary::default();
        summary.add(&LabeledUnits {
            records: vec![record("a.pdf")],
            errors: 2,
            blank: 0,
        });
        assert_eq!(summary.files, 1);
        assert_eq!(summary.records, 1);
        assert_eq!(summary.errors, 2);
    }
}
