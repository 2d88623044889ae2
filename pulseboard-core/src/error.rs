// pulseboard-core/src/error.rs
//
// Error taxonomy.
//
// ValidationError is the only *propagated* error: a schema violation is a
// programming/ingestion mistake worth surfacing to the caller as a `Result`.
// Lateness and duplicate-suppression are expected, high-frequency outcomes of
// normal operation, not errors — they're represented as `SubmitOutcome`
// variants in `processor.rs` instead of an `Err` path.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event id is empty")]
    EmptyEventId,
    #[error("event has no identifier (userId/email/anonymousId)")]
    NoIdentifier,
    #[error("TRACK event is missing a name")]
    MissingTrackName,
}
