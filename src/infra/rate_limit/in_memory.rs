// In-memory rate-limit store.

use crate::core::rate_limit::{RateLimitEvent, RateLimitStore};
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// (subject key, action)
type ActionKey = (String, String);

pub struct InMemoryRateLimitStore {
    /// Event timestamps per subject and action, oldest first
    events: DashMap<ActionKey, Vec<DateTime<Utc>>>,
    /// Resources currently held
    resources: DashMap<ActionKey, u32>,
    /// (subject key, window start) -> cost spent in that window
    spend: DashMap<(String, DateTime<Utc>), u32>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            resources: DashMap::new(),
            spend: DashMap::new(),
        }
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(subject_key: &str, action: &str) -> ActionKey {
    (subject_key.to_string(), action.to_string())
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn record_event(&self, event: &RateLimitEvent) -> Result<(), StoreError> {
        let mut times = self
            .events
            .entry(key(&event.subject_key, &event.action))
            .or_default();
        // Keep the list sorted even if events arrive out of order.
        let pos = times.partition_point(|t| *t <= event.timestamp);
        times.insert(pos, event.timestamp);
        Ok(())
    }

    async fn event_times_since(
        &self,
        subject_key: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        Ok(self
            .events
            .get(&key(subject_key, action))
            .map(|times| times.iter().copied().filter(|t| *t >= since).collect())
            .unwrap_or_default())
    }

    async fn last_event(
        &self,
        subject_key: &str,
        action: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .events
            .get(&key(subject_key, action))
            .and_then(|times| times.last().copied()))
    }

    async fn active_resources(&self, subject_key: &str, action: &str) -> Result<u32, StoreError> {
        Ok(self
            .resources
            .get(&key(subject_key, action))
            .map(|n| *n)
            .unwrap_or(0))
    }

    async fn adjust_active_resources(
        &self,
        subject_key: &str,
        action: &str,
        delta: i32,
    ) -> Result<u32, StoreError> {
        let mut held = self.resources.entry(key(subject_key, action)).or_insert(0);
        *held = (*held as i64 + delta as i64).max(0) as u32;
        Ok(*held)
    }

    async fn try_consume(
        &self,
        subject_key: &str,
        window_start: DateTime<Utc>,
        cost: u32,
        budget: u32,
    ) -> Result<bool, StoreError> {
        let mut used = self
            .spend
            .entry((subject_key.to_string(), window_start))
            .or_insert(0);
        if used.saturating_add(cost) > budget {
            return Ok(false);
        }
        *used += cost;
        Ok(true)
    }

    async fn purge_events(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for mut times in self.events.iter_mut() {
            let before = times.len();
            times.retain(|t| *t >= older_than);
            removed += (before - times.len()) as u64;
        }
        self.events.retain(|_, times| !times.is_empty());
        self.spend.retain(|(_, start), _| *start >= older_than);
        Ok(removed)
    }
}
