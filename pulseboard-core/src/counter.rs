// pulseboard-core/src/counter.rs
//
// Rolling time-bucketed counter: how many times has (profile, event name)
// occurred within a trailing window.
//
// A `DashMap` keyed by (profile, event name) maps to its own
// `parking_lot::Mutex`-guarded bucket series, so concurrent `append` for
// different (profile, name) pairs never contend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clock::Clock;

pub const DEFAULT_BUCKET_SIZE_MS: i64 = 60_000; // 1 minute
pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000; // 24 hours

fn bucket_start_ms(ts: DateTime<Utc>, bucket_size_ms: i64) -> i64 {
    let ms = ts.timestamp_millis();
    ms.div_euclid(bucket_size_ms) * bucket_size_ms
}

#[derive(Debug, Default)]
struct BucketSeries {
    // bucket start (epoch ms) → count. BTreeMap keeps eviction and summation
    // cheap to reason about; cardinality per (profile, name) pair is bounded
    // by window / bucket_size.
    buckets: BTreeMap<i64, u64>,
}

pub struct RollingCounter {
    bucket_size_ms: i64,
    series: DashMap<(String, String), Mutex<BucketSeries>>,
}

impl RollingCounter {
    pub fn new(bucket_size_ms: i64) -> Self {
        Self { bucket_size_ms, series: DashMap::new() }
    }

    /// Add 1 to the bucket covering `ts` for (profile_id, name).
    pub fn append(&self, profile_id: &str, name: &str, ts: DateTime<Utc>) {
        let key = (profile_id.to_string(), name.to_string());
        let bucket = bucket_start_ms(ts, self.bucket_size_ms);
        let entry = self
            .series
            .entry(key)
            .or_insert_with(|| Mutex::new(BucketSeries::default()));
        let mut series = entry.lock();
        *series.buckets.entry(bucket).or_insert(0) += 1;
    }

    /// Sum of buckets whose start is within `window` of `clock.now()`.
    /// Returns 0 for an unknown (profile, name) pair.
    pub fn count(&self, profile_id: &str, name: &str, window_ms: i64, clock: &dyn Clock) -> u64 {
        let key = (profile_id.to_string(), name.to_string());
        let Some(entry) = self.series.get(&key) else {
            return 0;
        };
        let cutoff = clock.now().timestamp_millis() - window_ms;
        let series = entry.lock();
        series.buckets.range(cutoff..).map(|(_, c)| *c).sum()
    }

    /// Move every `(from_profile_id, *)` bucket series onto
    /// `to_profile_id`, summing per-bucket counts on collision, then drop
    /// the `from_profile_id` keys. Called when identity resolution merges
    /// two previously-distinct profiles.
    pub fn migrate(&self, from_profile_id: &str, to_profile_id: &str) {
        if from_profile_id == to_profile_id {
            return;
        }
        let keys: Vec<(String, String)> =
            self.series.iter().filter(|e| e.key().0 == from_profile_id).map(|e| e.key().clone()).collect();

        for (pid, name) in keys {
            let Some((_, from_series)) = self.series.remove(&(pid, name.clone())) else {
                continue;
            };
            let from_buckets = from_series.into_inner().buckets;
            let to_entry = self
                .series
                .entry((to_profile_id.to_string(), name))
                .or_insert_with(|| Mutex::new(BucketSeries::default()));
            let mut to_series = to_entry.lock();
            for (bucket, count) in from_buckets {
                *to_series.buckets.entry(bucket).or_insert(0) += count;
            }
        }
    }

    /// Drop buckets strictly older than `now - window` for one profile, or
    /// for every profile if `profile_id` is `None`.
    pub fn evict(&self, window_ms: i64, profile_id: Option<&str>, clock: &dyn Clock) {
        let cutoff = clock.now().timestamp_millis() - window_ms;
        for entry in self.series.iter() {
            let (pid, _name) = entry.key();
            if let Some(filter) = profile_id {
                if pid != filter {
                    continue;
                }
            }
            let mut series = entry.value().lock();
            series.buckets = series.buckets.split_off(&cutoff);
        }
    }
}

impl Default for RollingCounter {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SIZE_MS)
    }
}
