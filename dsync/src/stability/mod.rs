//! Cross-cycle stability tracking
//!
//! A series is only eligible for transfer once its remote image count has
//! been observed unchanged on two consecutive cycles. Any change in count
//! resets the record; there is no partial credit toward stability.

mod store;

pub use store::{JsonFileStore, MemoryStore, StabilityStore};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dsync_common::time::Clock;
use dsync_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Identifies a series within the scope of one remote source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StabilityKey {
    pub remote_node: String,
    pub study_uid: String,
    pub series_uid: String,
}

impl StabilityKey {
    pub fn new(
        remote_node: impl Into<String>,
        study_uid: impl Into<String>,
        series_uid: impl Into<String>,
    ) -> Self {
        Self {
            remote_node: remote_node.into(),
            study_uid: study_uid.into(),
            series_uid: series_uid.into(),
        }
    }
}

/// Persisted string form: `remote|study|series` (UIDs never contain `|`)
impl fmt::Display for StabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.remote_node, self.study_uid, self.series_uid)
    }
}

/// Last observation of a series.
///
/// Timestamps are kept in their persisted RFC 3339 text so that a corrupt
/// value survives loading and can be purged by cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityRecord {
    pub last_image_count: i64,
    pub last_seen_at: String,
    #[serde(default)]
    pub stable_since: Option<String>,
}

impl StabilityRecord {
    fn first_sighting(count: i64, now: DateTime<Utc>) -> Self {
        Self {
            last_image_count: count,
            last_seen_at: now.to_rfc3339(),
            stable_since: None,
        }
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_seen_at)
    }

    pub fn stable_since(&self) -> Option<DateTime<Utc>> {
        self.stable_since.as_deref().and_then(parse_timestamp)
    }

    pub fn is_stable(&self) -> bool {
        self.stable_since.is_some()
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub struct StabilityTracker {
    store: Box<dyn StabilityStore>,
    clock: Arc<dyn Clock>,
}

impl StabilityTracker {
    pub fn new(store: Box<dyn StabilityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Load persisted state; corrupt state starts cold
    pub fn load(&mut self) -> Result<()> {
        self.store.load()?;
        info!(records = self.store.len(), "Stability state loaded");
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        self.store.save()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn record(&self, key: &StabilityKey) -> Option<StabilityRecord> {
        self.store.get(&key.to_string())
    }

    /// Record an observation and report whether the series is stable.
    ///
    /// A first sighting is never stable. An unchanged count is stable; a
    /// changed count resets the record and is not stable.
    pub fn observe(&mut self, key: &StabilityKey, current_image_count: i64) -> bool {
        let now = self.clock.now();
        let id = key.to_string();

        match self.store.get(&id) {
            None => {
                debug!(key = %id, images = current_image_count, "First sighting");
                self.store
                    .put(id, StabilityRecord::first_sighting(current_image_count, now));
                false
            }
            Some(mut record) if record.last_image_count == current_image_count => {
                record.last_seen_at = now.to_rfc3339();
                if record.stable_since.is_none() {
                    record.stable_since = Some(now.to_rfc3339());
                }
                debug!(key = %id, images = current_image_count, "Stable");
                self.store.put(id, record);
                true
            }
            Some(record) => {
                debug!(
                    key = %id,
                    previous = record.last_image_count,
                    images = current_image_count,
                    "Image count changed, stability reset"
                );
                self.store
                    .put(id, StabilityRecord::first_sighting(current_image_count, now));
                false
            }
        }
    }

    /// Forget a series after a successful transfer (idempotent)
    pub fn mark_transferred(&mut self, key: &StabilityKey) {
        if self.store.delete(&key.to_string()) {
            debug!(key = %key, "Stability record cleared after transfer");
        }
    }

    /// Purge records unseen for more than `max_age_hours`, and records
    /// whose timestamp cannot be parsed. Returns the number purged.
    pub fn cleanup(&mut self, max_age_hours: u32) -> usize {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(ChronoDuration::hours(i64::from(max_age_hours)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale: Vec<String> = self
            .store
            .entries()
            .into_iter()
            .filter(|(_, record)| match record.last_seen() {
                Some(seen) => seen < cutoff,
                None => true,
            })
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            self.store.delete(key);
        }
        if !stale.is_empty() {
            info!(purged = stale.len(), max_age_hours, "Stability cleanup");
        }
        stale.len()
    }
}
