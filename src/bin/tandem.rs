//! Tandem - paired scoring run
//!
//! Fetches the current batch of source records, scores each one with two
//! independent processors and writes a consolidated report.
//!
//! ## Configuration
//! - `--config <path>` or TANDEM_CONFIG: YAML configuration file
//! - TANDEM__TRANSPORT__TYPE: `channel` (default) or `queue`
//! - TANDEM__TRANSPORT__QUEUE__BACKEND: `memory` or `sqs`
//! - TANDEM__REPORT__OUTPUT_DIR: report directory (default `./output`)
//! - TANDEM_LOG: log filter (default `info`)
//!
//! ## Exit status
//! - 0: run complete, or partial (logged as a warning)
//! - 1: configuration, source or dispatch failure
//! - 130: cancelled with Ctrl-C

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tandem::aggregator::AggregationOutcome;
use tandem::bus::init_message_bus;
use tandem::config::Config;
use tandem::coordinator::Coordinator;
use tandem::report::FileReportSink;
use tandem::scoring::KeywordScorer;
use tandem::source::init_source_provider;

const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Score the current batch with two processors and write a consolidated report")]
#[command(version)]
struct Args {
    /// YAML configuration file, layered over ./tandem.yaml
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tandem::utils::bootstrap::init_tracing();

    match run(args).await {
        Ok(AggregationOutcome::Complete) => ExitCode::SUCCESS,
        Ok(AggregationOutcome::Partial { missing, .. }) => {
            warn!(missing, "Run completed with a partial report");
            ExitCode::SUCCESS
        }
        Ok(AggregationOutcome::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<AggregationOutcome, Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting tandem run");

    let bus = init_message_bus(&config.transport).await?;
    let source = init_source_provider(&config.source)?;
    let sink = Arc::new(FileReportSink::from_config(&config.report));

    let coordinator = Coordinator::new(bus, source, Arc::new(KeywordScorer::new()), sink)
        .with_channels(config.channels.clone())
        .with_aggregation(config.aggregation.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, cancelling run");
            on_signal.cancel();
        }
    });

    let summary = coordinator.run(cancel).await?;
    info!(
        dispatched = summary.dispatched,
        consolidated = summary.records.len(),
        "Run summary"
    );
    Ok(summary.outcome)
}
