//! stream-inspect - Binary Entry Point
//!
//! Opens the stream configured through `STREAM_*` environment variables,
//! replays it, and prints the recovery report, storage statistics, pending
//! checkpoints and the most recent events as JSON.
//!
//! Usage: `stream-inspect [LIMIT]` (default 20 recent events)
//!
//! Inspection never expires checkpoints: timers are not armed.

use std::process::ExitCode;

use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

use event_stream::{Orchestrator, StreamConfig, StreamResult};

const DEFAULT_LIMIT: usize = 20;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "inspection failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StreamResult<()> {
    let limit = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);

    let config = StreamConfig::from_env()?.with_checkpoint_timeout_ms(0);
    let orchestrator = Orchestrator::open(config).await?;

    let stats = orchestrator.stats().await?;
    let report = json!({
        "streamPath": orchestrator.config().stream_path,
        "recovery": orchestrator.recovery_report(),
        "stats": stats,
        "totalSize": event_stream::StreamStats::format_size(stats.total_size()),
        "pendingCheckpoints": orchestrator.pending_checkpoints(),
        "recentEvents": orchestrator.event_history(None, Some(limit)),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    orchestrator.shutdown();
    Ok(())
}
