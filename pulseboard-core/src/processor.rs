// pulseboard-core/src/processor.rs
//
// Event processor — per-profile priority buffers, watermark advancement,
// dedup, lateness policy.
//
// Per-profile state is a `DashMap<profile_id, Arc<parking_lot::Mutex<..>>>`,
// the same handle-then-lock shape used throughout (`ProfileStore`,
// `RollingCounter`): clone the `Arc` out of the map, then lock just that
// profile's buffer. `tick()` spawns one task per profile with ready events so
// drains run concurrently across profiles while staying serialized within
// one profile.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::events::Event;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TooLate,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Buffered,
    Dropped(DropReason),
    Deduplicated,
}

struct HeapItem {
    ts: DateTime<Utc>,
    seq: u64,
    event: Event,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.ts == other.ts && self.seq == other.seq
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ts, self.seq).cmp(&(other.ts, other.seq))
    }
}

#[derive(Default)]
struct ProfileBuffer {
    heap: BinaryHeap<Reverse<HeapItem>>,
    last_drained_ts: Option<DateTime<Utc>>,
}

pub struct EventProcessor {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    handler: Arc<dyn Fn(Event) + Send + Sync>,
    buffers: DashMap<String, Arc<Mutex<ProfileBuffer>>>,
    dedup: DashMap<String, DateTime<Utc>>,
    seq: AtomicU64,
    accepting: AtomicBool,
    tasks: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl EventProcessor {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        handler: Arc<dyn Fn(Event) + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            metrics,
            handler,
            buffers: DashMap::new(),
            dedup: DashMap::new(),
            seq: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Non-blocking: takes a per-profile lock just long enough to insert
    /// into the priority buffer.
    pub fn submit(&self, event: Event, profile_id: &str) -> SubmitOutcome {
        if !self.accepting.load(Ordering::Acquire) {
            self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Dropped(DropReason::ShuttingDown);
        }

        let now = self.clock.now();
        let late_cutoff = now - ChronoDuration::milliseconds(self.config.grace_period_ms);
        if event.ts < late_cutoff {
            self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Dropped(DropReason::TooLate);
        }

        if let Some(seen_at) = self.dedup.get(&event.event_id) {
            let ttl = ChronoDuration::milliseconds(self.config.dedup_ttl_ms);
            if now - *seen_at < ttl {
                self.metrics.events_dedup_hits.fetch_add(1, Ordering::Relaxed);
                return SubmitOutcome::Deduplicated;
            }
        }

        let watermark_window = ChronoDuration::milliseconds(self.config.window_size_ms);
        if event.ts < now - watermark_window {
            self.metrics.events_late.fetch_add(1, Ordering::Relaxed);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let handle = self
            .buffers
            .entry(profile_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ProfileBuffer::default())))
            .clone();

        let force_drain = {
            let mut buf = handle.lock();
            buf.heap.push(Reverse(HeapItem { ts: event.ts, seq, event: event.clone() }));
            self.config
                .max_buffer_per_profile
                .map(|cap| buf.heap.len() > cap)
                .unwrap_or(false)
        };

        self.dedup.insert(event.event_id.clone(), now);
        self.metrics.events_buffered.fetch_add(1, Ordering::Relaxed);

        if force_drain {
            // Backpressure: this profile's buffer exceeded its cap. Force an
            // early drain up to "now" rather than let it grow unbounded.
            // Best-effort: run it inline, synchronously, on the caller's
            // thread — same dispatch + metrics bookkeeping as tick()/stop().
            let events = self.drain_ready_sync(profile_id, now);
            for event in events {
                self.metrics.events_buffered.fetch_sub(1, Ordering::Relaxed);
                self.metrics.events_processed.fetch_add(1, Ordering::Relaxed);
                (self.handler)(event);
            }
        }

        SubmitOutcome::Buffered
    }

    fn drain_ready_sync(&self, profile_id: &str, watermark: DateTime<Utc>) -> Vec<Event> {
        let Some(handle) = self.buffers.get(profile_id).map(|e| e.clone()) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        loop {
            let mut buf = handle.lock();
            let ready = matches!(buf.heap.peek(), Some(Reverse(item)) if item.ts <= watermark);
            if !ready {
                break;
            }
            let Reverse(item) = buf.heap.pop().expect("peeked Some above");
            let keep = match buf.last_drained_ts {
                Some(last) if item.ts <= last => false,
                _ => true,
            };
            if keep {
                buf.last_drained_ts = Some(match buf.last_drained_ts {
                    Some(last) => last.max(item.ts),
                    None => item.ts,
                });
            }
            drop(buf);

            if keep {
                out.push(item.event);
            } else {
                warn!(
                    profile_id,
                    ts = %item.ts,
                    "dropping event out of order against already-drained suffix"
                );
            }
        }

        if handle.lock().heap.is_empty() {
            self.buffers.remove_if(profile_id, |_, v| v.lock().heap.is_empty());
        }

        out
    }

    /// Advance the watermark and drain every profile with ready events.
    /// Spawns one task per profile so drains run concurrently across
    /// profiles; awaits all of them before returning, so callers (including
    /// tests) observe a consistent post-tick state.
    pub async fn tick(self: &Arc<Self>) {
        let now = self.clock.now();
        let watermark = now - ChronoDuration::milliseconds(self.config.window_size_ms);
        let lag = (now - watermark).num_milliseconds().max(0) as u64;
        self.metrics.watermark_lag_ms.store(lag, Ordering::Relaxed);

        let profile_ids: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(profile_ids.len());
        for pid in profile_ids {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let events = this.drain_ready_sync(&pid, watermark);
                for event in events {
                    this.metrics.events_buffered.fetch_sub(1, Ordering::Relaxed);
                    this.metrics.events_processed.fetch_add(1, Ordering::Relaxed);
                    (this.handler)(event);
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }

        self.purge_expired_dedup(now);
    }

    fn purge_expired_dedup(&self, now: DateTime<Utc>) {
        let ttl = ChronoDuration::milliseconds(self.config.dedup_ttl_ms);
        self.dedup.retain(|_, seen_at| now - *seen_at < ttl);
    }

    /// Start the watermark ticker as a background task.
    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let interval_ms = self.config.ticker_interval_ms;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                if !this.accepting.load(Ordering::Acquire) {
                    break;
                }
                this.tick().await;
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Stop accepting new submits, cancel the ticker, then flush every
    /// remaining buffer (watermark = +∞) so no correct event is lost.
    /// Returns only after every flushed handler invocation has completed.
    pub async fn stop(self: &Arc<Self>) {
        self.accepting.store(false, Ordering::Release);

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for h in handles {
            h.abort();
        }

        let profile_ids: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        let far_future = DateTime::<Utc>::MAX_UTC;
        for pid in profile_ids {
            let events = self.drain_ready_sync(&pid, far_future);
            for event in events {
                self.metrics.events_buffered.fetch_sub(1, Ordering::Relaxed);
                self.metrics.events_processed.fetch_add(1, Ordering::Relaxed);
                (self.handler)(event);
            }
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
