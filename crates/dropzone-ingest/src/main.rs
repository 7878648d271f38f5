//! Dropzone Ingest - remote XML drop zone poller

use anyhow::{Context, Result};
use clap::Parser;
use dropzone_common::logging::{init_logging, LogConfig, LogLevel};
use dropzone_ingest::sink::{DocumentSink, JsonDirectorySink, LoggingSink};
use dropzone_ingest::trace::TracingSpanFactory;
use dropzone_ingest::{claims, source, IngestConfig, IngestOrchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dropzone-ingest")]
#[command(author, version, about = "Ingest XML documents from a remote drop directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Poll until interrupted (Ctrl-C)
    Run,

    /// Run a single poll cycle and exit
    Once,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("dropzone-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    info!(
        source = config.source.name(),
        directory = %config.remote_directory,
        pattern = %config.filename_pattern,
        "Configuration loaded"
    );

    let store = claims::connect(&config.claim_store_url).await?;

    let sink: Arc<dyn DocumentSink> = match &config.output_dir {
        Some(dir) => Arc::new(JsonDirectorySink::create(dir).await?),
        None => Arc::new(LoggingSink),
    };

    let orchestrator = IngestOrchestrator::new(
        &config,
        source::build(&config.source, config.parse_timeout),
        store,
        sink,
        Arc::new(TracingSpanFactory),
    )?;

    match cli.command {
        Command::Once => {
            let report = orchestrator.run_cycle().await.map_err(|e| {
                error!(error = %e, "Poll cycle failed");
                e
            })?;
            info!(
                batch = %report.batch_id,
                listed = report.listed,
                claimed = report.claimed,
                succeeded = report.succeeded,
                failed = report.failed,
                deferred = report.deferred,
                "Single cycle complete"
            );
        },
        Command::Run => {
            let shutdown = CancellationToken::new();

            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Shutdown signal received");
                        signal.cancel();
                    },
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
            });

            orchestrator.run(shutdown).await;
        },
    }

    Ok(())
}
