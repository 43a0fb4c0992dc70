//! Generate labelled page or excerpt training data with the LLM classifier.
//!
//! Appends JSON Lines to the output file and skips input files that already
//! have records there.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use statement_pipeline::labeling::{
    label_excerpts, label_pages, processed_files, LabeledUnits, LabelingSummary, TrainingDataWriter,
};
use statement_pipeline::{AppConfig, LlmRelevanceClassifier, OcrProvider};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    /// Label whole PDF pages (disclaimer vs. data)
    Page,
    /// Label paragraphs of the OCR'd markdown (boilerplate vs. data)
    Excerpt,
}

#[derive(Parser)]
#[command(name = "label-training-data")]
#[command(about = "Label statement pages or excerpts for classifier training")]
struct Cli {
    #[arg(long, value_enum)]
    level: Level,

    /// Directory of input statements (.pdf, or .md for excerpts)
    input: PathBuf,

    /// JSON Lines file to append to
    #[arg(long, short)]
    output: PathBuf,

    /// Model to label with (defaults to CLASSIFIER_MODEL)
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,statement_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let llm = config.build_llm();
    let model = cli.model.unwrap_or_else(|| config.pipeline.classifier_model.clone());
    let classifier = match cli.level {
        Level::Page => LlmRelevanceClassifier::disclaimer_pages(llm, model),
        Level::Excerpt => LlmRelevanceClassifier::boilerplate_excerpts(llm, model),
    };
    let ocr = config.build_ocr();

    let done = processed_files(&cli.output)?;
    let mut writer = TrainingDataWriter::open(&cli.output)?;
    let mut summary = LabelingSummary::default();

    for path in input_files(&cli.input)? {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if done.contains(&file_name) {
            summary.skipped += 1;
            continue;
        }

        let labeled = match cli.level {
            Level::Page => label_page_file(&classifier, &path, &file_name).await,
            Level::Excerpt => label_excerpt_file(&classifier, ocr.as_ref(), &path, &file_name).await,
        };
        match labeled {
            Ok(units) => {
                writer.append(&units.records)?;
                summary.add(&units);
            }
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "Skipping file");
                summary.errors += 1;
            }
        }
    }

    tracing::info!(
        files = summary.files,
        skipped = summary.skipped,
        records = summary.records,
        errors = summary.errors,
        "Labelling finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("pdf") | Some("PDF") | Some("md")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

async fn label_page_file(
    classifier: &LlmRelevanceClassifier,
    path: &Path,
    file_name: &str,
) -> Result<LabeledUnits> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(label_pages(classifier, bytes, file_name).await?)
}

async fn label_excerpt_file(
    classifier: &LlmRelevanceClassifier,
    ocr: &dyn OcrProvider,
    path: &Path,
    file_name: &str,
) -> Result<LabeledUnits> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let markdown = if path.extension().and_then(|e| e.to_str()) == Some("md") {
        String::from_utf8(bytes).context("Markdown input is not UTF-8")?
    } else {
        ocr.analyze(&bytes).await?.content
    };
    Ok(label_excerpts(classifier, &markdown, file_name).await)
}
