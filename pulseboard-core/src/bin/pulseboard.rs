// pulseboard-core/src/bin/pulseboard.rs
//
// Pulseboard — real-time customer data platform core.
//
// Two operational modes:
//   tail    — tail a JSONL event log file, ingesting each line as it appears
//   replay  — run a static JSONL dataset through the pipeline and print a report
//
// Usage:
//   pulseboard --mode tail --path /var/log/events.jsonl
//   pulseboard --mode replay --path captured.jsonl
//
// No HTTP ingestion, SSE, or persistence lives in this binary — it exists to
// exercise the library's engine (pulseboard_core) against a JSONL source.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulseboard_core::bus::BroadcastSink;
use pulseboard_core::clock::SystemClock;
use pulseboard_core::config::EngineConfig;
use pulseboard_core::events::Event;
use pulseboard_core::eval::Replayer;
use pulseboard_core::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "pulseboard",
    about = "Real-time customer data platform core — identity resolution, profiles, segments",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/pulseboard_feed.jsonl", help = "JSONL event log path")]
    path: PathBuf,

    #[arg(long, default_value_t = 10, help = "How many profiles to print in periodic top-N stats (tail mode)")]
    top_n: usize,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    /// Tail a live JSONL event log file and ingest lines as they arrive.
    Tail,
    /// Replay a static JSONL dataset once and print a correctness report.
    Replay,
}

async fn tail_jsonl(path: PathBuf, pipeline: Arc<Pipeline>) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    // Skip whatever is already in the file; only ingest new lines.
    while lines.next_line().await?.is_some() {}

    info!("tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(line) {
                    Ok(event) => {
                        if let Err(e) = pipeline.ingest(event) {
                            warn!("rejected event: {e}");
                        }
                    }
                    Err(e) => warn!("parse error: {e}"),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
}

async fn print_stats_loop(pipeline: Arc<Pipeline>, top_n: usize) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let snap = pipeline.metrics().snapshot();
        println!(
            "\n── stats  profiles={}  processed={}  buffered={}  late={}  dropped={}  dedup_hits={} ──",
            pipeline.profile_count(),
            snap.events_processed,
            snap.events_buffered,
            snap.events_late,
            snap.events_dropped,
            snap.events_dedup_hits,
        );
        for summary in pipeline.top_profiles(top_n) {
            println!("  {}  segments={:?}  lastSeen={}", summary.profile_id, summary.segments, summary.last_seen);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulseboard=info".parse()?))
        .compact()
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::default();

    match cli.mode {
        Mode::Tail => {
            let sink = Arc::new(BroadcastSink::new(1024));
            let pipeline = Pipeline::new(config, Arc::new(SystemClock), sink);
            pipeline.start().await;

            let stats_pipeline = pipeline.clone();
            tokio::spawn(print_stats_loop(stats_pipeline, cli.top_n));

            tail_jsonl(cli.path, pipeline).await?;
        }
        Mode::Replay => {
            let replayer = Replayer::new(config);
            let report = replayer.run_dataset(&cli.path).await?;
            report.print();
        }
    }

    Ok(())
}
