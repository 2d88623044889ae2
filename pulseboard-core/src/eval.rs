// pulseboard-core/src/eval.rs
//
// Replay harness for a recorded JSONL event stream: load a dataset, run it
// through the full pipeline, print a report. There is no positive/negative
// label in this domain, so the report is about pipeline correctness and
// throughput (how many events were buffered, dropped, deduplicated, how many
// profiles/segment transitions resulted) rather than precision/recall.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::bus::RecordingSink;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::events::Event;
use crate::pipeline::Pipeline;

pub struct ReplayReport {
    pub n_events: usize,
    pub n_parse_errors: usize,
    pub n_rejected: usize,
    pub metrics: crate::metrics::MetricsSnapshot,
    pub n_profiles: usize,
    pub n_segment_transitions: usize,
}

impl ReplayReport {
    pub fn print(&self) {
        println!("\n## Replay Report\n");
        println!("| Metric               | Value |");
        println!("|-----------------------|-------|");
        println!("| Events in dataset     | {} |", self.n_events);
        println!("| Parse errors          | {} |", self.n_parse_errors);
        println!("| Rejected at ingest    | {} |", self.n_rejected);
        println!("| Buffered              | {} |", self.metrics.events_buffered);
        println!("| Processed             | {} |", self.metrics.events_processed);
        println!("| Late                  | {} |", self.metrics.events_late);
        println!("| Dropped               | {} |", self.metrics.events_dropped);
        println!("| Dedup hits            | {} |", self.metrics.events_dedup_hits);
        println!("| Segment evaluations   | {} |", self.metrics.segments_evaluations);
        println!("| Segment ENTERs        | {} |", self.metrics.segments_enter);
        println!("| Segment EXITs         | {} |", self.metrics.segments_exit);
        println!("| Distinct profiles     | {} |", self.n_profiles);
        println!("| Segment transitions   | {} |", self.n_segment_transitions);
    }
}

/// Replays a JSONL dataset (one `Event` per line) through a fresh pipeline
/// driven by the system clock, then drains the ticker once more to flush any
/// stragglers still inside the grace period.
pub struct Replayer {
    config: EngineConfig,
}

impl Replayer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn run_dataset(&self, path: &Path) -> Result<ReplayReport> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut events = Vec::new();
        let mut n_parse_errors = 0;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    n_parse_errors += 1;
                    warn!("replay dataset parse error: {e}");
                }
            }
        }

        info!("loaded {} events from {}", events.len(), path.display());
        self.replay(events, n_parse_errors).await
    }

    async fn replay(&self, events: Vec<Event>, n_parse_errors: usize) -> Result<ReplayReport> {
        let n_events = events.len();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sink = Arc::new(RecordingSink::new());
        let pipeline = Pipeline::new(self.config, clock, sink.clone());
        pipeline.start().await;

        let mut n_rejected = 0;
        for event in events {
            if pipeline.ingest(event).is_err() {
                n_rejected += 1;
            }
        }

        pipeline.stop().await;

        let n_segment_transitions = sink.snapshot().len();
        Ok(ReplayReport {
            n_events,
            n_parse_errors,
            n_rejected,
            metrics: pipeline.metrics().snapshot(),
            n_profiles: pipeline.profile_count(),
            n_segment_transitions,
        })
    }
}
