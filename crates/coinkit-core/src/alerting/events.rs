//! Lifecycle evaluation for scheduled events
//!
//! An event goes unseen -> scheduled-notified -> released-notified. Each step
//! fires once, tracked through the [`EventLifecycleStore`].

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::db::EventLifecycleStore;
use crate::error::Result;
use crate::models::{Alert, AlertCategory, AlertKind, ScheduledEvent, Severity};

/// Decides alerts for scheduled event lists
pub struct EventEvaluator {
    store: Arc<dyn EventLifecycleStore>,
}

impl EventEvaluator {
    /// Create an evaluator over a lifecycle store
    pub fn new(store: Arc<dyn EventLifecycleStore>) -> Self {
        Self { store }
    }

    /// Evaluate every event in the list against its lifecycle state.
    ///
    /// `today` is the UTC calendar day used for the launch-day check.
    pub async fn evaluate(
        &self,
        metric_key: &str,
        events: &[ScheduledEvent],
        today: NaiveDate,
    ) -> Result<Vec<Alert>> {
        let mut alerts = Vec::new();

        for event in events {
            let Some(id) = event.id.as_deref() else {
                debug!(title = %event.title, "Skipping event without id");
                continue;
            };

            let state = self.store.get(id).await?;
            let starts_at = event.starts_at();

            if state.scheduled_notified_at.is_none() {
                info!(event_id = id, title = %event.title, "New scheduled event");

                alerts.push(Alert::new(
                    AlertCategory::Event,
                    Severity::Major,
                    metric_key,
                    AlertKind::EventScheduled {
                        title: event.title.clone(),
                        starts_at,
                        summary: event.summary.clone(),
                        fundraising_goals: event.fundraising_goals.clone(),
                        link: event.link.clone(),
                    },
                ));
                self.store.mark_scheduled(id, Utc::now()).await?;
            }

            let launches_today = starts_at.is_some_and(|dt| dt.date_naive() == today);
            if launches_today && state.release_notified_at.is_none() {
                info!(event_id = id, title = %event.title, "Event launches today");

                alerts.push(Alert::new(
                    AlertCategory::Event,
                    Severity::Major,
                    metric_key,
                    AlertKind::EventLaunchesToday {
                        title: event.title.clone(),
                    },
                ));
                self.store.mark_released(id, Utc::now()).await?;
            }
        }

        Ok(alerts)
    }
}
