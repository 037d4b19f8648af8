//! Localize an HTML document into a target language.
//!
//! Usage:
//!   html-localizer <input.html> <language> [output.html]
//!
//! `language` is a registry code or name (e.g. `es`, `Spanish`, `Español`).
//! Without an output path the result is written to stdout.
//!
//! Required environment variables:
//! - GENERATION_PRIMARY_URL
//! - GENERATION_FALLBACK_URL
//!
//! Optional:
//! - GENERATION_SESSION_TOKEN (without it every request uses the fallback path)
//! - CHUNK_MAX_CHARS (defaults to 5000)
//! - VERIFY (defaults to true)
//! - VERIFICATION_TIMEOUT_SECS (defaults to 30)

use anyhow::{Context, Result};
use html_localizer::config::Config;
use html_localizer::document::{write_output, Document};
use html_localizer::i18n::Language;
use html_localizer::metrics::PipelineMetrics;
use html_localizer::pipeline::{LoggingListener, Pipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when the variables come from the environment)
    let _ = dotenvy::dotenv();

    // Initialize logging to stderr so stdout carries only the document
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("html_localizer=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        anyhow::bail!("Usage: html-localizer <input.html> <language> [output.html]");
    }

    let language: Language = args[1]
        .parse()
        .with_context(|| format!("Unsupported target language: {}", args[1]))?;
    let output = args.get(2).map(PathBuf::from);

    let config = Config::from_env()?;
    let document = Document::from_file(&args[0], language)?;

    info!(
        "Localizing {} into {} ({})",
        args[0],
        language.name(),
        language.code()
    );

    let pipeline = Pipeline::new(config)?.with_listener(Arc::new(LoggingListener));

    // Ctrl-C aborts the run at its next suspension point
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    let report = pipeline.run(&document, &cancel).await?;

    if report.substituted_chunks > 0 {
        warn!(
            "{} of {} chunks were left untranslated",
            report.substituted_chunks, report.chunk_total
        );
    }

    write_output(output.as_deref(), &report.html)?;

    let metrics = PipelineMetrics::global().report();
    info!(
        "Metrics: {}",
        serde_json::to_string(&metrics).context("Failed to serialize metrics")?
    );

    Ok(())
}
