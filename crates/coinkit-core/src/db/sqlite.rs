//! SQLite store

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::{EventLifecycleStore, MetricStore, SubscriptionStore};
use crate::error::Result;
use crate::models::{EventLifecycleState, MetricSummary, PersistedSample, Unit};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        key TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_lifecycle (
        event_id TEXT PRIMARY KEY,
        scheduled_notified_at TEXT,
        release_notified_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        user_id TEXT NOT NULL,
        metric_key TEXT NOT NULL,
        PRIMARY KEY (user_id, metric_key)
    )
    "#,
];

/// SQLite-backed store.
///
/// The pool holds a single connection, so every statement is serialized.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        info!(url, "Connected to SQLite store");

        Ok(Self { pool })
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ensured");
        Ok(())
    }

    async fn get_last(&self, key: &str) -> Result<Option<f64>> {
        let value = sqlx::query_scalar::<_, f64>("SELECT value FROM metrics WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn record(&self, key: &str, name: &str, value: f64, unit: Unit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics (key, name, value, unit, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                name = excluded.name,
                value = excluded.value,
                unit = excluded.unit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(name)
        .bind(value)
        .bind(unit.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_sample(&self, key: &str) -> Result<Option<PersistedSample>> {
        let row = sqlx::query_as::<_, SampleRow>(
            "SELECT key, name, value, unit, updated_at FROM metrics WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_metrics(&self) -> Result<Vec<MetricSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>("SELECT key, name, unit FROM metrics ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl EventLifecycleStore for SqliteStore {
    async fn get(&self, event_id: &str) -> Result<EventLifecycleState> {
        sqlx::query("INSERT OR IGNORE INTO event_lifecycle (event_id) VALUES (?)")
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, LifecycleRow>(
            r#"
            SELECT scheduled_notified_at, release_notified_at
            FROM event_lifecycle
            WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(EventLifecycleState {
            scheduled_notified_at: row.scheduled_notified_at,
            release_notified_at: row.release_notified_at,
        })
    }

    async fn mark_scheduled(&self, event_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_lifecycle (event_id, scheduled_notified_at)
            VALUES (?, ?)
            ON CONFLICT(event_id) DO UPDATE SET
                scheduled_notified_at = COALESCE(event_lifecycle.scheduled_notified_at, excluded.scheduled_notified_at)
            "#,
        )
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_released(&self, event_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_lifecycle (event_id, release_notified_at)
            VALUES (?, ?)
            ON CONFLICT(event_id) DO UPDATE SET
                release_notified_at = COALESCE(event_lifecycle.release_notified_at, excluded.release_notified_at)
            "#,
        )
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn add(&self, user_id: &str, metric_key: &str) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, metric_key) VALUES (?, ?)")
                .bind(user_id)
                .bind(metric_key)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, user_id: &str, metric_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND metric_key = ?")
            .bind(user_id)
            .bind(metric_key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT metric_key FROM subscriptions WHERE user_id = ? ORDER BY metric_key",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn subscribers(&self, metric_key: &str) -> Result<Vec<String>> {
        let users = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM subscriptions WHERE metric_key = ? ORDER BY user_id",
        )
        .bind(metric_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

// Database row types for mapping

#[derive(sqlx::FromRow)]
struct SampleRow {
    key: String,
    name: String,
    value: f64,
    unit: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SampleRow> for PersistedSample {
    type Error = crate::error::Error;

    fn try_from(row: SampleRow) -> Result<Self> {
        Ok(PersistedSample {
            unit: row.unit.parse()?,
            key: row.key,
            name: row.name,
            value: row.value,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    key: String,
    name: String,
    unit: String,
}

impl TryFrom<SummaryRow> for MetricSummary {
    type Error = crate::error::Error;

    fn try_from(row: SummaryRow) -> Result<Self> {
        Ok(MetricSummary {
            unit: row.unit.parse()?,
            key: row.key,
            name: row.name,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LifecycleRow {
    scheduled_notified_at: Option<DateTime<Utc>>,
    release_notified_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    async fn memory_store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let store = memory_store().await;
        store.ensure_schema().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn record_upserts_one_row_per_key() {
        let store = memory_store().await;

        assert_eq!(store.get_last("aave:rlusd:supply:cap_util").await.unwrap(), None);

        store
            .record("aave:rlusd:supply:cap_util", "Aave RLUSD Supply Cap Utilization", 0.5, Unit::Ratio)
            .await
            .unwrap();
        store
            .record("aave:rlusd:supply:cap_util", "Aave RLUSD Supply Cap Utilization", 1.0, Unit::Ratio)
            .await
            .unwrap();

        assert_eq!(store.get_last("aave:rlusd:supply:cap_util").await.unwrap(), Some(1.0));

        let sample = store.get_sample("aave:rlusd:supply:cap_util").await.unwrap().unwrap();
        assert_eq!(sample.unit, Unit::Ratio);
        assert_eq!(sample.name, "Aave RLUSD Supply Cap Utilization");

        assert_eq!(store.list_metrics().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_metrics_is_sorted_and_includes_anchors() {
        let store = memory_store().await;
        store.record("silo:usdc:borrow:rate", "Silo", 0.1, Unit::Rate).await.unwrap();
        store
            .record("silo:usdc:borrow:rate:anchor", "Silo (anchor)", 0.1, Unit::Rate)
            .await
            .unwrap();
        store.record("aave:pyusd:borrow:cap_util", "Aave", 0.2, Unit::Ratio).await.unwrap();

        let keys: Vec<String> = store
            .list_metrics()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();

        assert_eq!(
            keys,
            vec![
                "aave:pyusd:borrow:cap_util".to_string(),
                "silo:usdc:borrow:rate".to_string(),
                "silo:usdc:borrow:rate:anchor".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn lifecycle_timestamps_never_move() {
        let store = memory_store().await;
        let first = Utc.with_ymd_and_hms(2026, 2, 3, 18, 30, 0).unwrap();

        let state = store.get("block-1").await.unwrap();
        assert_eq!(state, EventLifecycleState::default());

        store.mark_scheduled("block-1", first).await.unwrap();
        store.mark_scheduled("block-1", first + Duration::days(1)).await.unwrap();
        store.mark_released("block-1", first).await.unwrap();

        let state = store.get("block-1").await.unwrap();
        assert_eq!(state.scheduled_notified_at, Some(first));
        assert_eq!(state.release_notified_at, Some(first));
    }

    #[tokio::test]
    async fn subscriptions_crud() {
        let store = memory_store().await;

        assert!(store.add("42", "silo:usdc:borrow:rate").await.unwrap());
        assert!(!store.add("42", "silo:usdc:borrow:rate").await.unwrap());
        assert!(store.add("42", "aave:rlusd:supply:cap_util").await.unwrap());
        assert!(store.add("7", "silo:usdc:borrow:rate").await.unwrap());

        assert_eq!(
            store.list_for_user("42").await.unwrap(),
            vec!["aave:rlusd:supply:cap_util".to_string(), "silo:usdc:borrow:rate".to_string()]
        );
        assert_eq!(
            store.subscribers("silo:usdc:borrow:rate").await.unwrap(),
            vec!["42".to_string(), "7".to_string()]
        );

        assert!(store.remove("42", "silo:usdc:borrow:rate").await.unwrap());
        assert!(!store.remove("42", "silo:usdc:borrow:rate").await.unwrap());
    }

    #[tokio::test]
    async fn values_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("state.db").display());

        {
            let store = SqliteStore::connect(&url).await.unwrap();
            store.ensure_schema().await.unwrap();
            store.record("euler:usdc:borrow:rate", "Euler", 0.081, Unit::Rate).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(store.get_last("euler:usdc:borrow:rate").await.unwrap(), Some(0.081));
    }
}
