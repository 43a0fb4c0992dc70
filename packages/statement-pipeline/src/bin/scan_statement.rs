//! Run one PDF statement through the pipeline and print the result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use statement_pipeline::pdf::encode_base64;
use statement_pipeline::{wait_for_scan, AppConfig, ScanId, ScanOutcome, ScanRegistry, ScanStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scan-statement")]
#[command(about = "Extract a structured statement from a PDF")]
struct Cli {
    /// PDF statement to process
    file: PathBuf,

    /// Submit through the scan registry and poll until done or timed out
    #[arg(long)]
    wait: bool,

    /// Print provenance (OCR text included) along with the statement
    #[arg(long)]
    provenance: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,statement_pipeline=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let bytes = std::fs::read(&cli.file)
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;
    let file_name = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    tracing::info!(
        file = %file_name,
        ocr = %config.ocr.kind(),
        llm = %config.llm.kind(),
        "Starting scan"
    );
    let processor = Arc::new(config.build_processor()?);

    let outcome = if cli.wait {
        run_with_registry(processor, file_name, encode_base64(&bytes), &config).await?
    } else {
        processor.process_scan(ScanId::now_v7(), &encode_base64(&bytes)).await?
    };

    let rendered = if cli.provenance {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string_pretty(&outcome.statement)?
    };
    println!("{}", rendered);
    Ok(())
}

async fn run_with_registry(
    processor: Arc<statement_pipeline::StatementProcessor>,
    file_name: String,
    file_base64: String,
    config: &AppConfig,
) -> Result<ScanOutcome> {
    let registry = ScanRegistry::new(processor);
    let id = registry.submit(file_name, file_base64).await;
    tracing::info!(scan_id = %id, timeout_secs = config.wait.timeout.as_secs(), "Waiting for scan");

    let waited = wait_for_scan(&registry, id, config.wait).await;
    let record = registry.get(id).await.context("Scan record disappeared")?;

    match (waited.status(), record.outcome) {
        (ScanStatus::Processed, Some(outcome)) => Ok(outcome),
        _ => match record.error {
            Some(message) => bail!("Scan {} failed: {}", id, message),
            None => bail!("Scan {} did not finish: {:?}", id, waited),
        },
    }
}
