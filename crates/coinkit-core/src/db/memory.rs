//! In-memory store

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{EventLifecycleStore, MetricStore, SubscriptionStore};
use crate::error::Result;
use crate::models::{EventLifecycleState, MetricSummary, PersistedSample, Unit};

#[derive(Default)]
struct State {
    samples: BTreeMap<String, PersistedSample>,
    lifecycle: HashMap<String, EventLifecycleState>,
    subscriptions: BTreeSet<(String, String)>,
}

/// Store kept entirely in process memory behind one lock
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn get_last(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.state.lock().samples.get(key).map(|s| s.value))
    }

    async fn record(&self, key: &str, name: &str, value: f64, unit: Unit) -> Result<()> {
        let sample = PersistedSample {
            key: key.to_string(),
            name: name.to_string(),
            value,
            unit,
            updated_at: Utc::now(),
        };
        self.state.lock().samples.insert(key.to_string(), sample);
        Ok(())
    }

    async fn get_sample(&self, key: &str) -> Result<Option<PersistedSample>> {
        Ok(self.state.lock().samples.get(key).cloned())
    }

    async fn list_metrics(&self) -> Result<Vec<MetricSummary>> {
        Ok(self
            .state
            .lock()
            .samples
            .values()
            .map(|s| MetricSummary {
                key: s.key.clone(),
                name: s.name.clone(),
                unit: s.unit,
            })
            .collect())
    }
}

#[async_trait]
impl EventLifecycleStore for MemoryStore {
    async fn get(&self, event_id: &str) -> Result<EventLifecycleState> {
        Ok(*self
            .state
            .lock()
            .lifecycle
            .entry(event_id.to_string())
            .or_default())
    }

    async fn mark_scheduled(&self, event_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.lifecycle.entry(event_id.to_string()).or_default();
        entry.scheduled_notified_at.get_or_insert(at);
        Ok(())
    }

    async fn mark_released(&self, event_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.lifecycle.entry(event_id.to_string()).or_default();
        entry.release_notified_at.get_or_insert(at);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn add(&self, user_id: &str, metric_key: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .subscriptions
            .insert((user_id.to_string(), metric_key.to_string())))
    }

    async fn remove(&self, user_id: &str, metric_key: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .subscriptions
            .remove(&(user_id.to_string(), metric_key.to_string())))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .subscriptions
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn subscribers(&self, metric_key: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .subscriptions
            .iter()
            .filter(|(_, key)| key == metric_key)
            .map(|(user, _)| user.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn record_overwrites_previous_sample() {
        let store = MemoryStore::new();
        store.record("a:rate", "A", 0.05, Unit::Rate).await.unwrap();
        store.record("a:rate", "A", 0.07, Unit::Rate).await.unwrap();

        assert_eq!(store.get_last("a:rate").await.unwrap(), Some(0.07));
        assert_eq!(store.list_metrics().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_marks_are_set_once() {
        let store = MemoryStore::new();
        let first = Utc::now();
        let later = first + Duration::hours(1);

        assert_eq!(store.get("evt").await.unwrap(), EventLifecycleState::default());

        store.mark_scheduled("evt", first).await.unwrap();
        store.mark_scheduled("evt", later).await.unwrap();

        let state = store.get("evt").await.unwrap();
        assert_eq!(state.scheduled_notified_at, Some(first));
        assert_eq!(state.release_notified_at, None);
    }
}
