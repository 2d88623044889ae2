// pulseboard-core/src/lib.rs
//
// Real-time customer data platform core: identity resolution, a rolling
// activity counter, a per-trait LWW profile store, a rule-based segment
// engine, and the event processor/pipeline that ties them together.
//
// No HTTP/SSE/auth surface lives here — those belong to whatever service
// embeds this crate. This crate only defines the in-process engine.

pub mod bus;
pub mod clock;
pub mod config;
pub mod counter;
pub mod error;
pub mod eval;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod profile;
pub mod segment;

pub use bus::{BroadcastSink, RecordingSink, SegmentSink};
pub use clock::{Clock, SystemClock, TestClock};
pub use config::EngineConfig;
pub use error::ValidationError;
pub use events::{Event, EventType, SegmentAction, SegmentEvent};
pub use metrics::{Metrics, MetricsSnapshot};
pub use pipeline::Pipeline;
pub use processor::{DropReason, SubmitOutcome};
pub use profile::ProfileSummary;
