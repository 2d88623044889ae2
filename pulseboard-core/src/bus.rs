// pulseboard-core/src/bus.rs
//
// Segment-event fan-out. Fan-out to multiple subscribers is explicit
// (a broadcast queue) rather than hidden behind a reactive framework.
// `SegmentSink` is the seam; `BroadcastSink` is the one in-memory
// implementation, built on `tokio::sync::broadcast`.

use tokio::sync::broadcast;

use crate::events::SegmentEvent;

pub trait SegmentSink: Send + Sync {
    fn publish(&self, event: SegmentEvent);
}

pub struct BroadcastSink {
    tx: broadcast::Sender<SegmentEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SegmentEvent> {
        self.tx.subscribe()
    }
}

impl SegmentSink for BroadcastSink {
    fn publish(&self, event: SegmentEvent) {
        // No subscribers is a normal state (e.g. in tests) — ignore the error.
        let _ = self.tx.send(event);
    }
}

/// Sink used by tests/benches that only care about accumulated history.
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<SegmentEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self { events: parking_lot::Mutex::new(Vec::new()) }
    }

    pub fn drain(&self) -> Vec<SegmentEvent> {
        std::mem::take(&mut self.events.lock())
    }

    pub fn snapshot(&self) -> Vec<SegmentEvent> {
        self.events.lock().clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentSink for RecordingSink {
    fn publish(&self, event: SegmentEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SegmentAction;
    use chrono::Utc;

    #[test]
    fn recording_sink_accumulates_in_order() {
        let sink = RecordingSink::new();
        sink.publish(SegmentEvent {
            profile_id: "p1".into(),
            segment: "pro_plan".into(),
            action: SegmentAction::Enter,
            ts: Utc::now(),
        });
        sink.publish(SegmentEvent {
            profile_id: "p1".into(),
            segment: "pro_plan".into(),
            action: SegmentAction::Exit,
            ts: Utc::now(),
        });
        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, SegmentAction::Enter);
        assert_eq!(events[1].action, SegmentAction::Exit);
        assert!(sink.drain().is_empty());
    }
}
