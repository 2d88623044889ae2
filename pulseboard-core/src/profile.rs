// pulseboard-core/src/profile.rs
//
// Profile store — per-trait LWW over a unified customer profile.
//
// Sharded `DashMap<profile_id, Arc<RwLock<Profile>>>`: cloning the `Arc` out
// of the map before taking the lock keeps the per-profile update batch
// (identifiers + traits + lastSeen + segments) atomic without holding the
// map's shard lock for the whole operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ProfileIdentifiers {
    pub user_ids: HashSet<String>,
    pub emails: HashSet<String>,
    pub anonymous_ids: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct Trait {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub profile_id: String,
    pub identifiers: ProfileIdentifiers,
    pub traits: HashMap<String, Trait>,
    pub last_seen: DateTime<Utc>,
    pub segments: HashSet<String>,
    /// Count of events that have advanced `last_seen` for this profile.
    /// Used by the `reengage` segment to distinguish "brand new profile,
    /// never seen again" from "seen before, now inactive".
    pub observation_count: u64,
}

impl Profile {
    fn new(profile_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            identifiers: ProfileIdentifiers::default(),
            traits: HashMap::new(),
            last_seen: now,
            segments: HashSet::new(),
            observation_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    #[serde(rename = "profileId")]
    pub profile_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<Value>,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
    pub identifiers: SummaryIdentifiers,
    #[serde(rename = "featureUsedCount")]
    pub feature_used_count: u64,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryIdentifiers {
    #[serde(rename = "userIds")]
    pub user_ids: Vec<String>,
    pub emails: Vec<String>,
    #[serde(rename = "anonymousIds")]
    pub anonymous_ids: Vec<String>,
}

pub struct ProfileStore {
    profiles: DashMap<String, Arc<RwLock<Profile>>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self { profiles: DashMap::new() }
    }

    fn handle_for(&self, profile_id: &str, now: DateTime<Utc>) -> Arc<RwLock<Profile>> {
        self.profiles
            .entry(profile_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Profile::new(profile_id, now))))
            .clone()
    }

    pub fn get_or_create(&self, profile_id: &str) -> Arc<RwLock<Profile>> {
        self.handle_for(profile_id, Utc::now())
    }

    pub fn get(&self, profile_id: &str) -> Option<Arc<RwLock<Profile>>> {
        self.profiles.get(profile_id).map(|p| p.clone())
    }

    /// Set-union identifiers into the profile. Grow-only: never removes an
    /// identifier.
    pub fn merge_identifiers(&self, profile_id: &str, ids: &ProfileIdentifiers) {
        let handle = self.handle_for(profile_id, Utc::now());
        let mut p = handle.write();
        p.identifiers.user_ids.extend(ids.user_ids.iter().cloned());
        p.identifiers.emails.extend(ids.emails.iter().cloned());
        p.identifiers.anonymous_ids.extend(ids.anonymous_ids.iter().cloned());
    }

    /// Per-trait LWW: update trait `name` iff `event_ts` is strictly newer
    /// than the stored `updated_at`. On equal timestamps the existing value
    /// wins — stable under ties.
    pub fn merge_traits(&self, profile_id: &str, traits: &HashMap<String, Value>, event_ts: DateTime<Utc>) {
        let handle = self.handle_for(profile_id, event_ts);
        let mut p = handle.write();
        for (name, value) in traits {
            let should_update = match p.traits.get(name) {
                Some(existing) => event_ts > existing.updated_at,
                None => true,
            };
            if should_update {
                p.traits.insert(name.clone(), Trait { value: value.clone(), updated_at: event_ts });
            }
        }
    }

    pub fn update_last_seen(&self, profile_id: &str, ts: DateTime<Utc>) {
        let handle = self.handle_for(profile_id, ts);
        let mut p = handle.write();
        p.observation_count += 1;
        if ts > p.last_seen {
            p.last_seen = ts;
        }
    }

    /// Replace the segment membership set atomically.
    pub fn update_segments(&self, profile_id: &str, new_set: HashSet<String>) {
        let handle = self.handle_for(profile_id, Utc::now());
        let mut p = handle.write();
        p.segments = new_set;
    }

    pub fn n_profiles(&self) -> usize {
        self.profiles.len()
    }

    /// Merge `from_id`'s profile into `to_id` and drop the `from_id` entry.
    /// Called when `IdentityGraph::union` reports that a previously-distinct
    /// root was absorbed into another — identifiers union, traits merge
    /// per-trait LWW (comparing each trait's own `updated_at`, no incoming
    /// event timestamp needed), `lastSeen`/`segments` take the union/max, and
    /// `observation_count` sums (both histories genuinely happened). No-op
    /// if `from_id` has no profile or equals `to_id`.
    pub fn migrate(&self, from_id: &str, to_id: &str) {
        if from_id == to_id {
            return;
        }
        let Some((_, from_handle)) = self.profiles.remove(from_id) else {
            return;
        };
        let from = from_handle.read().clone();
        let to_handle = self.handle_for(to_id, from.last_seen);
        let mut to = to_handle.write();

        to.identifiers.user_ids.extend(from.identifiers.user_ids);
        to.identifiers.emails.extend(from.identifiers.emails);
        to.identifiers.anonymous_ids.extend(from.identifiers.anonymous_ids);

        for (name, trait_) in from.traits {
            let should_update = match to.traits.get(&name) {
                Some(existing) => trait_.updated_at > existing.updated_at,
                None => true,
            };
            if should_update {
                to.traits.insert(name, trait_);
            }
        }

        if from.last_seen > to.last_seen {
            to.last_seen = from.last_seen;
        }
        to.observation_count += from.observation_count;
        to.segments.extend(from.segments);
    }

    /// Top-N profile summaries ordered by `lastSeen` descending.
    pub fn get_top_n(
        &self,
        n: usize,
        counter: &crate::counter::RollingCounter,
        clock: &dyn crate::clock::Clock,
        counter_window_ms: i64,
    ) -> Vec<ProfileSummary> {
        let mut all: Vec<Profile> = self.profiles.iter().map(|e| e.value().read().clone()).collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all.truncate(n);
        all.into_iter()
            .map(|p| {
                let feature_used_count = counter.count(&p.profile_id, "Feature Used", counter_window_ms, clock);
                ProfileSummary {
                    profile_id: p.profile_id.clone(),
                    plan: p.traits.get("plan").map(|t| t.value.clone()),
                    country: p.traits.get("country").map(|t| t.value.clone()),
                    last_seen: p.last_seen,
                    identifiers: SummaryIdentifiers {
                        user_ids: p.identifiers.user_ids.into_iter().collect(),
                        emails: p.identifiers.emails.into_iter().collect(),
                        anonymous_ids: p.identifiers.anonymous_ids.into_iter().collect(),
                    },
                    feature_used_count,
                    segments: p.segments.into_iter().collect(),
                }
            })
            .collect()
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(user: &str) -> ProfileIdentifiers {
        ProfileIdentifiers {
            user_ids: [user.to_string()].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = ProfileStore::new();
        let a = store.get_or_create("p1");
        let b = store.get_or_create("p1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn lww_prevents_stale_overwrite() {
        let store = ProfileStore::new();
        let t0 = Utc::now();
        let mut traits = HashMap::new();
        traits.insert("plan".to_string(), Value::String("pro".into()));
        store.merge_traits("p1", &traits, t0);

        let mut stale = HashMap::new();
        stale.insert("plan".to_string(), Value::String("basic".into()));
        store.merge_traits("p1", &stale, t0 - chrono::Duration::seconds(10));

        let p = store.get_or_create("p1");
        assert_eq!(p.read().traits["plan"].value, Value::String("pro".into()));
    }

    #[test]
    fn lww_tie_keeps_existing_value() {
        let store = ProfileStore::new();
        let t0 = Utc::now();
        let mut a = HashMap::new();
        a.insert("plan".to_string(), Value::String("first".into()));
        store.merge_traits("p1", &a, t0);

        let mut b = HashMap::new();
        b.insert("plan".to_string(), Value::String("second".into()));
        store.merge_traits("p1", &b, t0);

        let p = store.get_or_create("p1");
        assert_eq!(p.read().traits["plan"].value, Value::String("first".into()));
    }

    #[test]
    fn identifiers_are_grow_only() {
        let store = ProfileStore::new();
        store.merge_identifiers("p1", &ids("u1"));
        store.merge_identifiers("p1", &ids("u2"));
        let p = store.get_or_create("p1");
        let r = p.read();
        assert!(r.identifiers.user_ids.contains("u1"));
        assert!(r.identifiers.user_ids.contains("u2"));
    }

    #[test]
    fn last_seen_is_monotone() {
        let store = ProfileStore::new();
        let t0 = Utc::now();
        store.update_last_seen("p1", t0);
        store.update_last_seen("p1", t0 - chrono::Duration::seconds(5));
        let p = store.get_or_create("p1");
        assert_eq!(p.read().last_seen, t0);
    }

    #[test]
    fn update_segments_replaces_atomically() {
        let store = ProfileStore::new();
        let mut s = HashSet::new();
        s.insert("pro_plan".to_string());
        store.update_segments("p1", s.clone());
        let p = store.get_or_create("p1");
        assert_eq!(p.read().segments, s);
    }

    #[test]
    fn migrate_merges_identifiers_traits_and_counts_then_drops_the_source() {
        let store = ProfileStore::new();
        let t0 = Utc::now();

        store.merge_identifiers("user:u1", &ids("u1"));
        let mut traits_a = HashMap::new();
        traits_a.insert("plan".to_string(), Value::String("pro".into()));
        store.merge_traits("user:u1", &traits_a, t0);
        store.update_last_seen("user:u1", t0);

        store.merge_identifiers("anon:a1", &ids("a1"));
        let mut traits_b = HashMap::new();
        traits_b.insert("country".to_string(), Value::String("US".into()));
        store.merge_traits("anon:a1", &traits_b, t0 - chrono::Duration::seconds(5));
        store.update_last_seen("anon:a1", t0 - chrono::Duration::seconds(5));

        assert_eq!(store.n_profiles(), 2);

        store.migrate("user:u1", "anon:a1");

        assert_eq!(store.n_profiles(), 1);
        assert!(store.get("user:u1").is_none());
        let merged = store.get_or_create("anon:a1");
        let r = merged.read();
        assert!(r.identifiers.user_ids.contains("u1"));
        assert!(r.identifiers.user_ids.contains("a1"));
        assert_eq!(r.traits["plan"].value, Value::String("pro".into()));
        assert_eq!(r.traits["country"].value, Value::String("US".into()));
        assert_eq!(r.last_seen, t0);
        assert_eq!(r.observation_count, 2);
    }
}
