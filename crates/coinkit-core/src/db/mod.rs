//! Persistence layer for CoinKit
//!
//! The evaluators only see the traits below. [`SqliteStore`] backs a real
//! deployment; [`MemoryStore`] backs tests and dry runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::{EventLifecycleState, MetricSummary, PersistedSample, Unit};

/// Latest value per metric key
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Create tables if they are missing. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Latest value for a key
    async fn get_last(&self, key: &str) -> Result<Option<f64>>;

    /// Overwrite the sample for a key
    async fn record(&self, key: &str, name: &str, value: f64, unit: Unit) -> Result<()>;

    /// Full latest sample for a key
    async fn get_sample(&self, key: &str) -> Result<Option<PersistedSample>>;

    /// Every stored key, anchors included, ordered by key
    async fn list_metrics(&self) -> Result<Vec<MetricSummary>>;
}

/// One-shot notification flags per scheduled event
#[async_trait]
pub trait EventLifecycleStore: Send + Sync {
    /// State for an event, created empty on first sight
    async fn get(&self, event_id: &str) -> Result<EventLifecycleState>;

    /// Record that the "scheduled" alert fired. Keeps an earlier timestamp.
    async fn mark_scheduled(&self, event_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Record that the "launches today" alert fired. Keeps an earlier timestamp.
    async fn mark_released(&self, event_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Users who want to be mentioned on a metric's minor alerts
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Subscribe; false when the subscription already existed
    async fn add(&self, user_id: &str, metric_key: &str) -> Result<bool>;

    /// Unsubscribe; false when there was nothing to remove
    async fn remove(&self, user_id: &str, metric_key: &str) -> Result<bool>;

    /// Metric keys a user follows, sorted
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<String>>;

    /// Users following a metric key
    async fn subscribers(&self, metric_key: &str) -> Result<Vec<String>>;
}

/// Store handles shared by the engine, dispatcher and API
#[derive(Clone)]
pub struct Database {
    /// Latest metric values
    pub metrics: Arc<dyn MetricStore>,
    /// Event lifecycle flags
    pub events: Arc<dyn EventLifecycleStore>,
    /// Mention subscriptions
    pub subscriptions: Arc<dyn SubscriptionStore>,
}

impl Database {
    /// Open the SQLite store described by the config and create its schema
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::connect(&config.url).await?);
        store.ensure_schema().await?;
        Ok(Self::from_store(store))
    }

    /// Fresh in-memory store
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }

    /// Use one object for all three roles
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: MetricStore + EventLifecycleStore + SubscriptionStore + 'static,
    {
        Self {
            metrics: store.clone(),
            events: store.clone(),
            subscriptions: store,
        }
    }

    /// Non-anchor metrics, for user-facing listings
    pub async fn visible_metrics(&self) -> Result<Vec<MetricSummary>> {
        Ok(self
            .metrics
            .list_metrics()
            .await?
            .into_iter()
            .filter(|m| !crate::models::is_anchor_key(&m.key))
            .collect())
    }

    /// Subscribe a user to a known, user-facing metric
    pub async fn subscribe(&self, user_id: &str, metric_key: &str) -> Result<bool> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(Error::validation("user id must not be empty"));
        }

        let known = self
            .visible_metrics()
            .await?
            .iter()
            .any(|m| m.key == metric_key);
        if !known {
            return Err(Error::validation(format!("unknown metric '{metric_key}'")));
        }

        self.subscriptions.add(user_id, metric_key).await
    }
}
