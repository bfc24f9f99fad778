//! Evaluation cycle orchestration
//!
//! One cycle fans out to every adapter, then walks the records sequentially,
//! routing each to the evaluator for its unit. Adapter failures and bad
//! records are isolated; persistence failures abort the cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::caps::CapEvaluator;
use super::events::EventEvaluator;
use super::rates::RateEvaluator;
use crate::config::EngineConfig;
use crate::db::{Database, MetricStore};
use crate::error::{Error, FetchError, Result};
use crate::models::{Alert, MetricRecord, MetricValue, Unit};
use crate::sources::SourceAdapter;

/// An adapter that contributed no records this cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterFailure {
    /// Adapter name
    pub adapter: String,
    /// Rendered error
    pub reason: String,
}

/// Outcome of one evaluation cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Alerts in processing order
    pub alerts: Vec<Alert>,
    /// Adapters that failed or timed out
    pub failures: Vec<AdapterFailure>,
    /// Records evaluated
    pub records_processed: usize,
    /// Records dropped because their value was unusable
    pub records_rejected: usize,
}

/// Runs evaluation cycles over a fixed set of adapters
pub struct Engine {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    metrics: Arc<dyn MetricStore>,
    rates: RateEvaluator,
    caps: CapEvaluator,
    events: EventEvaluator,
    adapter_timeout: Duration,
    cycle_lock: Mutex<()>,
}

impl Engine {
    /// Create an engine over the given adapters and stores
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, db: &Database, config: &EngineConfig) -> Self {
        Self {
            adapters,
            metrics: db.metrics.clone(),
            rates: RateEvaluator::new(db.metrics.clone(), config.rates.clone()),
            caps: CapEvaluator::new(config.cap_threshold),
            events: EventEvaluator::new(db.events.clone()),
            adapter_timeout: config.adapter_timeout,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Names of the configured adapters, in polling order
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run one cycle, waiting for any cycle already in flight
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;
        self.cycle().await
    }

    /// Run one cycle, failing with [`Error::CycleInFlight`] if one is running
    pub async fn try_run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.try_lock().map_err(|_| Error::CycleInFlight)?;
        self.cycle().await
    }

    async fn cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        counter!("coinkit_cycles_total").increment(1);

        self.metrics.ensure_schema().await?;

        let mut report = CycleReport::default();
        let today = Utc::now().date_naive();

        for (adapter, result) in self.fetch_all().await {
            let records = match result {
                Ok(records) => {
                    debug!(adapter = %adapter, records = records.len(), "Adapter fetched");
                    records
                }
                Err(e) => {
                    warn!(adapter = %adapter, error = %e, "Adapter failed");
                    counter!("coinkit_adapter_failures_total", "adapter" => adapter.clone())
                        .increment(1);
                    report.failures.push(AdapterFailure {
                        adapter,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for record in records {
                match self.process(&record, today).await {
                    Ok(alerts) => {
                        report.records_processed += 1;
                        report.alerts.extend(alerts);
                    }
                    Err(e @ Error::NumericCoercion { .. }) => {
                        warn!(key = %record.key, error = %e, "Rejected record");
                        counter!("coinkit_records_rejected_total").increment(1);
                        report.records_rejected += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        for alert in &report.alerts {
            counter!(
                "coinkit_alerts_total",
                "category" => alert.category.as_str(),
                "severity" => alert.severity.as_str()
            )
            .increment(1);
        }

        let elapsed = started.elapsed();
        histogram!("coinkit_cycle_duration_seconds").record(elapsed.as_secs_f64());

        info!(
            alerts = report.alerts.len(),
            failures = report.failures.len(),
            processed = report.records_processed,
            rejected = report.records_rejected,
            elapsed_ms = elapsed.as_millis() as u64,
            "Cycle complete"
        );

        Ok(report)
    }

    /// Fetch every adapter concurrently, results in adapter order
    async fn fetch_all(&self) -> Vec<(String, std::result::Result<Vec<MetricRecord>, FetchError>)> {
        let fetches = self.adapters.iter().map(|adapter| async move {
            let result = match timeout(self.adapter_timeout, adapter.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.adapter_timeout)),
            };
            (adapter.name().to_string(), result)
        });

        join_all(fetches).await
    }

    /// Persist one record and evaluate it, tagging alerts with its adapter
    async fn process(&self, record: &MetricRecord, today: NaiveDate) -> Result<Vec<Alert>> {
        let key = record.key.as_str();
        let name = record.display_name.as_str();

        let mut alerts = match &record.value {
            MetricValue::Events(events) => {
                self.metrics
                    .record(key, name, events.len() as f64, Unit::Json)
                    .await?;
                self.events.evaluate(key, events, today).await?
            }
            MetricValue::Ratio(value) => {
                let value = finite(key, *value)?;
                let last = self.metrics.get_last(key).await?;
                self.metrics.record(key, name, value, Unit::Ratio).await?;
                self.caps.evaluate(key, name, value, last)
            }
            MetricValue::Rate(value) => {
                let value = finite(key, *value)?;
                self.metrics.record(key, name, value, Unit::Rate).await?;
                self.rates
                    .evaluate(key, name, value, Unit::Rate, record.adapter_tag.as_deref())
                    .await?
            }
        };

        for alert in &mut alerts {
            alert.adapter_tag = record.adapter_tag.clone();
        }

        Ok(alerts)
    }
}

fn finite(key: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::coercion(key, format!("{value} is not finite")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertCategory, AlertKind, ScheduledEvent, Severity};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    enum Behavior {
        Records(Vec<MetricRecord>),
        Fail,
        Hang,
        Gate {
            started: Arc<Notify>,
            release: Arc<Notify>,
        },
    }

    struct FakeAdapter {
        name: &'static str,
        behavior: Behavior,
    }

    impl FakeAdapter {
        fn new(name: &'static str, behavior: Behavior) -> Arc<dyn SourceAdapter> {
            Arc::new(Self { name, behavior })
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> std::result::Result<Vec<MetricRecord>, FetchError> {
            match &self.behavior {
                Behavior::Records(records) => Ok(records
                    .iter()
                    .cloned()
                    .map(|r| r.with_adapter(self.name))
                    .collect()),
                Behavior::Fail => Err(FetchError::Transient("connection reset".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
                Behavior::Gate { started, release } => {
                    started.notify_one();
                    release.notified().await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn engine(adapters: Vec<Arc<dyn SourceAdapter>>, db: &Database) -> Engine {
        let config = EngineConfig {
            adapter_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        Engine::new(adapters, db, &config)
    }

    #[tokio::test]
    async fn failing_adapter_is_isolated() {
        let db = Database::in_memory();
        let engine = engine(
            vec![
                FakeAdapter::new("silo", Behavior::Records(vec![MetricRecord::rate("a:rate", "A", 0.05)])),
                FakeAdapter::new("euler", Behavior::Fail),
                FakeAdapter::new("aave", Behavior::Records(vec![MetricRecord::ratio("c:cap", "C", 1.0)])),
            ],
            &db,
        );
        db.metrics.record("c:cap", "C", 0.5, Unit::Ratio).await.unwrap();

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.records_processed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].adapter, "euler");
        assert_eq!(db.metrics.get_last("a:rate").await.unwrap(), Some(0.05));
        assert_eq!(db.metrics.get_last("c:cap").await.unwrap(), Some(1.0));

        assert_eq!(report.alerts.len(), 2);
        assert!(matches!(report.alerts[0].kind, AlertKind::AnchorSet { .. }));
        assert_eq!(report.alerts[0].adapter_tag.as_deref(), Some("silo"));
        assert!(matches!(report.alerts[1].kind, AlertKind::CapReached { .. }));
        assert_eq!(report.alerts[1].adapter_tag.as_deref(), Some("aave"));
    }

    #[tokio::test]
    async fn slow_adapter_times_out() {
        let db = Database::in_memory();
        let engine = engine(vec![FakeAdapter::new("metadao", Behavior::Hang)], &db);

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn non_finite_values_are_rejected_per_record() {
        let db = Database::in_memory();
        let engine = engine(
            vec![FakeAdapter::new(
                "dolomite",
                Behavior::Records(vec![
                    MetricRecord::rate("bad:rate", "Bad", f64::NAN),
                    MetricRecord::rate("good:rate", "Good", 0.04),
                ]),
            )],
            &db,
        );

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.records_rejected, 1);
        assert_eq!(report.records_processed, 1);
        assert_eq!(db.metrics.get_last("bad:rate").await.unwrap(), None);
        assert_eq!(db.metrics.get_last("good:rate").await.unwrap(), Some(0.04));
    }

    #[tokio::test]
    async fn events_store_a_count_proxy() {
        let db = Database::in_memory();
        let events = vec![
            ScheduledEvent {
                id: Some("a".into()),
                title: "A".into(),
                ..Default::default()
            },
            ScheduledEvent {
                id: Some("b".into()),
                title: "B".into(),
                ..Default::default()
            },
        ];
        let engine = engine(
            vec![FakeAdapter::new(
                "metadao",
                Behavior::Records(vec![MetricRecord::events("metadao:icos:scheduled", "ICOs", events)]),
            )],
            &db,
        );

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.alerts.len(), 2);
        assert!(report.alerts.iter().all(|a| a.category == AlertCategory::Event));
        let sample = db.metrics.get_sample("metadao:icos:scheduled").await.unwrap().unwrap();
        assert_eq!(sample.value, 2.0);
        assert_eq!(sample.unit, Unit::Json);
    }

    #[tokio::test]
    async fn caps_compare_against_the_previous_sample() {
        let db = Database::in_memory();
        db.metrics.record("c:cap", "C", 0.9, Unit::Ratio).await.unwrap();
        let engine = engine(
            vec![FakeAdapter::new("aave", Behavior::Records(vec![MetricRecord::ratio("c:cap", "C", 1.0)]))],
            &db,
        );

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.alerts.len(), 1);
        assert!(matches!(report.alerts[0].kind, AlertKind::CapReached { .. }));
        assert_eq!(report.alerts[0].adapter_tag.as_deref(), Some("aave"));
        assert_eq!(db.metrics.get_last("c:cap").await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn alerts_follow_adapter_then_record_order() {
        let db = Database::in_memory();
        let engine = engine(
            vec![
                FakeAdapter::new(
                    "silo",
                    Behavior::Records(vec![
                        MetricRecord::rate("s1:rate", "S1", 0.1),
                        MetricRecord::rate("s2:rate", "S2", 0.2),
                    ]),
                ),
                FakeAdapter::new("jupiter", Behavior::Records(vec![MetricRecord::rate("j:rate", "J", 0.3)])),
            ],
            &db,
        );

        let first = engine.run_cycle().await.unwrap();
        let keys: Vec<&str> = first.alerts.iter().map(|a| a.metric_key.as_str()).collect();
        assert_eq!(keys, vec!["s1:rate", "s2:rate", "j:rate"]);
        assert!(first.alerts.iter().all(|a| a.severity == Severity::Minor));

        let second = engine.run_cycle().await.unwrap();
        assert!(second.alerts.is_empty());
    }

    #[tokio::test]
    async fn overlapping_try_is_rejected() {
        let db = Database::in_memory();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let config = EngineConfig {
            adapter_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let gate = FakeAdapter::new(
            "silo",
            Behavior::Gate {
                started: started.clone(),
                release: release.clone(),
            },
        );
        let engine = Arc::new(Engine::new(vec![gate], &db, &config));

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_cycle().await }
        });

        started.notified().await;
        assert!(matches!(engine.try_run_cycle().await, Err(Error::CycleInFlight)));

        release.notify_one();
        assert!(running.await.unwrap().is_ok());

        release.notify_one();
        assert!(engine.try_run_cycle().await.is_ok());
    }
}
