// pulseboard-core/src/segment.rs
//
// Segment engine — pure predicate evaluation, edge-triggered ENTER/EXIT
// emission: a small struct holding segment thresholds, with a pure
// evaluation function that reads the current profile/counter state and
// returns which segments just turned on or off.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;

use crate::bus::SegmentSink;
use crate::clock::Clock;
use crate::counter::RollingCounter;
use crate::events::{SegmentAction, SegmentEvent};
use crate::metrics::Metrics;
use crate::profile::Profile;

#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    pub power_user_threshold: u64,
    pub power_user_window_ms: i64,
    pub reengage_inactivity_ms: i64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            power_user_threshold: 5,
            power_user_window_ms: 24 * 60 * 60 * 1000,
            reengage_inactivity_ms: 10 * 60 * 1000,
        }
    }
}

/// Fixed evaluation/emission order — keeps emitted ENTER/EXIT sequences
/// deterministic across runs instead of depending on hash-map iteration
/// order.
const SEGMENT_ORDER: &[&str] = &["pro_plan", "power_user", "reengage"];

pub struct SegmentEngine {
    config: SegmentConfig,
}

impl SegmentEngine {
    pub fn new(config: SegmentConfig) -> Self {
        Self { config }
    }

    fn evaluate(&self, profile: &Profile, counter: &RollingCounter, clock: &dyn Clock) -> HashSet<String> {
        let mut active = HashSet::new();

        if profile.traits.get("plan").map(|t| t.value == Value::String("pro".into())).unwrap_or(false) {
            active.insert("pro_plan".to_string());
        }

        let feature_used = counter.count(
            &profile.profile_id,
            "Feature Used",
            self.config.power_user_window_ms,
            clock,
        );
        if feature_used >= self.config.power_user_threshold {
            active.insert("power_user".to_string());
        }

        let inactivity_ms = (clock.now() - profile.last_seen).num_milliseconds();
        if inactivity_ms >= self.config.reengage_inactivity_ms && profile.observation_count >= 2 {
            active.insert("reengage".to_string());
        }

        active
    }

    /// Evaluate all built-in segments against `profile`, publish ENTER/EXIT
    /// transitions to `sink`, and return the new membership set (the caller
    /// persists it via `ProfileStore::update_segments`). Edge-triggered only:
    /// a segment held across two consecutive evaluations emits nothing.
    pub fn evaluate_and_emit(
        &self,
        profile: &Profile,
        counter: &RollingCounter,
        clock: &dyn Clock,
        sink: &dyn SegmentSink,
        metrics: &Metrics,
    ) -> HashSet<String> {
        metrics.segments_evaluations.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let new_membership = self.evaluate(profile, counter, clock);
        let now = clock.now();

        for name in SEGMENT_ORDER {
            let was_member = profile.segments.contains(*name);
            let is_member = new_membership.contains(*name);
            if is_member && !was_member {
                sink.publish(SegmentEvent {
                    profile_id: profile.profile_id.clone(),
                    segment: name.to_string(),
                    action: SegmentAction::Enter,
                    ts: now,
                });
                metrics.segments_enter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            } else if was_member && !is_member {
                sink.publish(SegmentEvent {
                    profile_id: profile.profile_id.clone(),
                    segment: name.to_string(),
                    action: SegmentAction::Exit,
                    ts: now,
                });
                metrics.segments_exit.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        new_membership
    }
}

impl Default for SegmentEngine {
    fn default() -> Self {
        Self::new(SegmentConfig::default())
    }
}
