// pulseboard-core/src/events.rs
//
// Shared event types flowing through the pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Identify,
    Track,
    Alias,
}

/// Inbound event from the upstream bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventId")]
    pub event_id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "anonymousId", skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub traits: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Validity rules: non-empty eventId, at least one identifier field, and
    /// (if TRACK) a non-empty name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.trim().is_empty() {
            return Err(ValidationError::EmptyEventId);
        }
        if self.user_id.is_none() && self.email.is_none() && self.anonymous_id.is_none() {
            return Err(ValidationError::NoIdentifier);
        }
        if self.event_type == EventType::Track {
            match &self.name {
                Some(n) if !n.trim().is_empty() => {}
                _ => return Err(ValidationError::MissingTrackName),
            }
        }
        Ok(())
    }

    /// Raw identifier strings present on this event, in a stable order
    /// (user, email, anonymous) so canonicalization is deterministic.
    pub fn raw_identifiers(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(3);
        if let Some(u) = &self.user_id {
            ids.push(format!("user:{u}"));
        }
        if let Some(e) = &self.email {
            ids.push(format!("email:{e}"));
        }
        if let Some(a) = &self.anonymous_id {
            ids.push(format!("anon:{a}"));
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentAction {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEvent {
    #[serde(rename = "profileId")]
    pub profile_id: String,
    pub segment: String,
    pub action: SegmentAction,
    pub ts: DateTime<Utc>,
}
