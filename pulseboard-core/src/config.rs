// pulseboard-core/src/config.rs
//
// Engine configuration surface — every tunable the pipeline needs, with its
// documented default. Plain data + `Default`, decoupled from clap so the
// library has no CLI dependency of its own — only the `pulseboard` binary
// (src/bin/pulseboard.rs) parses flags and builds one of these.

use crate::segment::SegmentConfig;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Buffering watermark lag. Default 5s.
    pub window_size_ms: i64,
    /// Events older than `now - grace_period` are dropped. Default 2m.
    pub grace_period_ms: i64,
    /// Window over which duplicate eventId is suppressed. Default 10m.
    pub dedup_ttl_ms: i64,
    /// Watermark advance cadence. Default 1s.
    pub ticker_interval_ms: u64,
    /// Bucket width for the rolling counter. Default 1m.
    pub counter_bucket_size_ms: i64,
    /// Sliding window for the rolling counter. Default 24h.
    pub counter_window_ms: i64,
    /// Max events buffered per profile before an early drain is forced.
    /// `None` disables the cap (backpressure is optional).
    pub max_buffer_per_profile: Option<usize>,
    pub segments: SegmentConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size_ms: 5_000,
            grace_period_ms: 2 * 60_000,
            dedup_ttl_ms: 10 * 60_000,
            ticker_interval_ms: 1_000,
            counter_bucket_size_ms: 60_000,
            counter_window_ms: 24 * 60 * 60_000,
            max_buffer_per_profile: None,
            segments: SegmentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = EngineConfig::default();
        assert_eq!(c.window_size_ms, 5_000);
        assert_eq!(c.grace_period_ms, 120_000);
        assert_eq!(c.dedup_ttl_ms, 600_000);
        assert_eq!(c.ticker_interval_ms, 1_000);
        assert_eq!(c.counter_bucket_size_ms, 60_000);
        assert_eq!(c.counter_window_ms, 86_400_000);
        assert_eq!(c.segments.power_user_threshold, 5);
    }
}
