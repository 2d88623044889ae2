// pulseboard-core/src/pipeline.rs
//
// Orchestration — wires identity resolution, the profile store, the rolling
// counter, the segment engine, and the event processor together.
//
// `ingest` and `process` are deliberately split: `ingest` does the cheap
// synchronous work (validate, resolve identity, hand to the processor's
// buffer) on the caller's task; `process` is what the processor dispatches
// once an event clears its watermark, and does the state-mutating work
// (merge identifiers/traits, advance lastSeen, append counters, evaluate
// segments).

use std::sync::Arc;

use tracing::error;

use crate::bus::SegmentSink;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::counter::RollingCounter;
use crate::events::{Event, EventType};
use crate::error::ValidationError;
use crate::identity::IdentityGraph;
use crate::metrics::Metrics;
use crate::processor::{EventProcessor, SubmitOutcome};
use crate::profile::{ProfileIdentifiers, ProfileStore, ProfileSummary};
use crate::segment::SegmentEngine;

/// The assembled engine: identity resolution, profile store, rolling
/// counter, segment engine, and the event processor that buffers/orders
/// events before they reach `process`.
pub struct Pipeline {
    config: EngineConfig,
    identity: Arc<IdentityGraph>,
    profiles: Arc<ProfileStore>,
    counter: Arc<RollingCounter>,
    sink: Arc<dyn SegmentSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    processor: Arc<EventProcessor>,
    housekeeping: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, sink: Arc<dyn SegmentSink>) -> Arc<Self> {
        let identity = Arc::new(IdentityGraph::new());
        let profiles = Arc::new(ProfileStore::new());
        let counter = Arc::new(RollingCounter::new(config.counter_bucket_size_ms));
        let segments = Arc::new(SegmentEngine::new(config.segments));
        let metrics = Arc::new(Metrics::new());

        // Built in two steps: the processor's dispatch handler needs a
        // reference back to the rest of the pipeline, so we construct the
        // shared state first and close over clones of it.
        let identity_h = identity.clone();
        let profiles_h = profiles.clone();
        let counter_h = counter.clone();
        let segments_h = segments.clone();
        let sink_h = sink.clone();
        let clock_h = clock.clone();
        let metrics_h = metrics.clone();

        let handler = Arc::new(move |event: Event| {
            Self::process(
                &identity_h,
                &profiles_h,
                &counter_h,
                &segments_h,
                sink_h.as_ref(),
                clock_h.as_ref(),
                &metrics_h,
                event,
            );
        });

        let processor = EventProcessor::new(config, clock.clone(), metrics.clone(), handler);

        Arc::new(Self {
            config,
            identity,
            profiles,
            counter,
            sink,
            clock,
            metrics,
            processor,
            housekeeping: tokio::sync::Mutex::new(None),
        })
    }

    /// Validate, resolve the canonical profile id, and hand the event to the
    /// processor's buffer. Cheap and synchronous.
    pub fn ingest(&self, event: Event) -> Result<SubmitOutcome, ValidationError> {
        event.validate()?;

        let raw_ids = event.raw_identifiers();
        let canonical_id = if matches!(event.event_type, EventType::Identify | EventType::Alias) && raw_ids.len() >= 2
        {
            let (canonical_id, merges) = self.identity.canonical_id_for(&raw_ids);
            // A union just tied two previously-distinct roots together —
            // migrate whatever profile/counter state was keyed by the
            // absorbed root onto the survivor before anything else reads it.
            for (absorbed, survivor) in merges {
                self.profiles.migrate(&absorbed, &survivor);
                self.counter.migrate(&absorbed, &survivor);
            }
            canonical_id
        } else {
            // Single-identifier events still need a root lookup (possibly a
            // fresh singleton) so later TRACK/IDENTIFY events for the same
            // raw id land on the same profile once it's unioned.
            raw_ids
                .first()
                .map(|id| self.identity.find(id))
                .unwrap_or_else(|| IdentityGraph::normalize(""))
        };

        Ok(self.processor.submit(event, &canonical_id))
    }

    /// Apply one (already-ordered, already-deduped) event to profile/counter
    /// state and re-evaluate segments. Runs off the processor's drain path,
    /// never off `ingest` directly, so a late-arriving straggler is applied
    /// in timestamp order relative to its profile's other events.
    #[allow(clippy::too_many_arguments)]
    fn process(
        identity: &IdentityGraph,
        profiles: &ProfileStore,
        counter: &RollingCounter,
        segments: &SegmentEngine,
        sink: &dyn SegmentSink,
        clock: &dyn Clock,
        metrics: &Metrics,
        event: Event,
    ) {
        let raw_ids = event.raw_identifiers();
        let canonical_id = raw_ids
            .first()
            .map(|id| identity.find(id))
            .unwrap_or_else(|| IdentityGraph::normalize(""));

        let mut ids = ProfileIdentifiers::default();
        for raw in &raw_ids {
            let normalized = IdentityGraph::normalize(raw);
            if let Some(rest) = normalized.strip_prefix("user:") {
                ids.user_ids.insert(rest.to_string());
            } else if let Some(rest) = normalized.strip_prefix("email:") {
                ids.emails.insert(rest.to_string());
            } else if let Some(rest) = normalized.strip_prefix("anon:") {
                ids.anonymous_ids.insert(rest.to_string());
            }
        }
        profiles.merge_identifiers(&canonical_id, &ids);

        if !event.traits.is_empty() {
            profiles.merge_traits(&canonical_id, &event.traits, event.ts);
        }

        profiles.update_last_seen(&canonical_id, event.ts);

        if event.event_type == EventType::Track {
            if let Some(name) = &event.name {
                counter.append(&canonical_id, name, event.ts);
            }
        }

        let Some(handle) = profiles.get(&canonical_id) else {
            error!(profile_id = %canonical_id, "profile vanished between update and segment evaluation");
            return;
        };
        let snapshot = handle.read().clone();
        let new_membership = segments.evaluate_and_emit(&snapshot, counter, clock, sink, metrics);
        profiles.update_segments(&canonical_id, new_membership);
    }

    /// Start the processor's background watermark ticker, plus a periodic
    /// sweep that evicts rolling-counter buckets older than
    /// `counter_window_ms` so memory doesn't grow unboundedly for long-lived
    /// profiles (spec §3: "evicted on read or periodically").
    pub async fn start(&self) {
        self.processor.start().await;

        let counter = self.counter.clone();
        let clock = self.clock.clone();
        let window_ms = self.config.counter_window_ms;
        let interval_ms = self.config.ticker_interval_ms;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                counter.evict(window_ms, None, clock.as_ref());
            }
        });
        *self.housekeeping.lock().await = Some(handle);
    }

    /// Stop accepting new ingests, cancel the housekeeping sweep, and flush
    /// every buffered event before returning.
    pub async fn stop(&self) {
        self.processor.stop().await;
        if let Some(handle) = self.housekeeping.lock().await.take() {
            handle.abort();
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn top_profiles(&self, n: usize) -> Vec<ProfileSummary> {
        self.profiles.get_top_n(n, &self.counter, self.clock.as_ref(), self.config.counter_window_ms)
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.n_profiles()
    }

    pub fn sink(&self) -> &Arc<dyn SegmentSink> {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingSink;
    use crate::clock::TestClock;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn track(event_id: &str, user_id: &str, name: &str, ts: chrono::DateTime<Utc>) -> Event {
        Event {
            event_id: event_id.into(),
            ts,
            event_type: EventType::Track,
            user_id: Some(user_id.into()),
            email: None,
            anonymous_id: None,
            name: Some(name.into()),
            properties: Default::default(),
            traits: Default::default(),
        }
    }

    fn identify(event_id: &str, user_id: &str, anonymous_id: &str, ts: chrono::DateTime<Utc>) -> Event {
        Event {
            event_id: event_id.into(),
            ts,
            event_type: EventType::Identify,
            user_id: Some(user_id.into()),
            email: None,
            anonymous_id: Some(anonymous_id.into()),
            name: None,
            properties: Default::default(),
            traits: Default::default(),
        }
    }

    #[tokio::test]
    async fn identify_then_track_accumulate_on_same_profile() {
        let base = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(base));
        let sink: Arc<dyn SegmentSink> = Arc::new(RecordingSink::new());
        let pipeline = Pipeline::new(EngineConfig::default(), clock.clone(), sink);

        pipeline.ingest(identify("e1", "u1", "anon1", base)).unwrap();
        pipeline.ingest(track("e2", "u1", "Feature Used", base)).unwrap();
        pipeline.processor.tick().await;

        assert_eq!(pipeline.profile_count(), 1);
        let summary = pipeline.top_profiles(1).remove(0);
        assert_eq!(summary.feature_used_count, 1);
        assert!(summary.identifiers.anonymous_ids.contains(&"anon1".to_string()));
    }

    #[tokio::test]
    async fn reject_invalid_event_before_it_reaches_the_processor() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let sink: Arc<dyn SegmentSink> = Arc::new(RecordingSink::new());
        let pipeline = Pipeline::new(EngineConfig::default(), clock, sink);

        let mut bad = track("e1", "u1", "x", Utc::now());
        bad.name = None;
        let result = pipeline.ingest(bad);
        assert_eq!(result, Err(ValidationError::MissingTrackName));
        assert_eq!(pipeline.profile_count(), 0);
    }

    #[tokio::test]
    async fn lww_trait_merge_survives_end_to_end() {
        let base = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(base));
        let sink: Arc<dyn SegmentSink> = Arc::new(RecordingSink::new());
        let pipeline = Pipeline::new(EngineConfig::default(), clock.clone(), sink);

        let mut first = identify("e1", "u1", "anon1", base);
        first.traits.insert("plan".to_string(), json!("pro"));
        pipeline.ingest(first).unwrap();
        pipeline.processor.tick().await;

        let mut stale = identify("e2", "u1", "anon1", base - Duration::seconds(30));
        stale.traits.insert("plan".to_string(), json!("basic"));
        pipeline.ingest(stale).unwrap();
        pipeline.processor.tick().await;

        let summary = pipeline.top_profiles(1).remove(0);
        assert_eq!(summary.plan, Some(json!("pro")));
    }

    fn alias(event_id: &str, user_id: &str, anonymous_id: &str, ts: chrono::DateTime<Utc>) -> Event {
        Event {
            event_id: event_id.into(),
            ts,
            event_type: EventType::Alias,
            user_id: Some(user_id.into()),
            email: None,
            anonymous_id: Some(anonymous_id.into()),
            name: None,
            properties: Default::default(),
            traits: Default::default(),
        }
    }

    #[tokio::test]
    async fn alias_merges_two_previously_distinct_profiles() {
        let base = Utc::now();
        let clock = Arc::new(TestClock::new(base));
        let sink: Arc<dyn SegmentSink> = Arc::new(RecordingSink::new());
        let pipeline = Pipeline::new(EngineConfig::default(), clock.clone(), sink);

        // Two profiles, known only by disjoint identifiers, each already
        // carrying their own trait and activity history.
        let mut known_by_user = track("e1", "u1", "Feature Used", base);
        known_by_user.traits.insert("plan".to_string(), json!("pro"));
        pipeline.ingest(known_by_user).unwrap();

        let mut known_by_anon = Event {
            event_id: "e2".into(),
            ts: base,
            event_type: EventType::Track,
            user_id: None,
            email: None,
            anonymous_id: Some("anon1".into()),
            name: Some("Feature Used".into()),
            properties: Default::default(),
            traits: Default::default(),
        };
        known_by_anon.traits.insert("country".to_string(), json!("US"));
        pipeline.ingest(known_by_anon).unwrap();

        clock.advance(Duration::milliseconds(EngineConfig::default().window_size_ms) + Duration::milliseconds(1));
        pipeline.processor.tick().await;
        assert_eq!(pipeline.profile_count(), 2);

        // ALIAS ties the two identifiers together — the resolution promise
        // is that this collapses the two profiles into one, not that a
        // second, separately-tracked profile keeps living alongside it.
        pipeline.ingest(alias("e3", "u1", "anon1", clock.now())).unwrap();

        assert_eq!(pipeline.profile_count(), 1);
        let summary = pipeline.top_profiles(1).remove(0);
        assert!(summary.identifiers.user_ids.contains(&"u1".to_string()));
        assert!(summary.identifiers.anonymous_ids.contains(&"anon1".to_string()));
        assert_eq!(summary.plan, Some(json!("pro")));
        assert_eq!(summary.country, Some(json!("US")));
        assert_eq!(summary.feature_used_count, 2);
    }

    #[tokio::test]
    async fn power_user_segment_emits_on_fifth_feature_event() {
        let base = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(base));
        let sink = Arc::new(RecordingSink::new());
        let sink_dyn: Arc<dyn SegmentSink> = sink.clone();
        let pipeline = Pipeline::new(EngineConfig::default(), clock.clone(), sink_dyn);

        for i in 0..5 {
            let ev = track(&format!("e{i}"), "u1", "Feature Used", base);
            pipeline.ingest(ev).unwrap();
        }
        pipeline.processor.tick().await;

        let events = sink.drain();
        assert!(events.iter().any(|e| e.segment == "power_user"));
    }
}
