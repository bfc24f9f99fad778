//! Sticky-anchor evaluation for rate metrics
//!
//! Each rate metric has a shadow `<key>:anchor` sample. A move is measured
//! against the anchor, not the previous value, and the anchor only follows the
//! metric when a move was large enough to alert on. Slow drift therefore never
//! alerts until it adds up to a full band.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::MetricStore;
use crate::error::Result;
use crate::models::{
    anchor_key, Alert, AlertCategory, AlertKind, Direction, MoveBand, Severity, Unit,
};

/// Move thresholds, as decimal fractions (0.01 == 1 percentage point)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateThresholds {
    /// Major alert at or above this move
    pub major: f64,
    /// Minor alert at or above this move
    pub minor: f64,
    /// Minor alert at or above this move for `fine_adapters`
    pub fine: f64,
    /// Adapters whose rates alert on the fine band
    pub fine_adapters: Vec<String>,
}

impl Default for RateThresholds {
    fn default() -> Self {
        Self {
            major: 0.10,
            minor: 0.01,
            fine: 0.005,
            fine_adapters: vec!["jupiter".to_string()],
        }
    }
}

impl RateThresholds {
    /// Band crossed by a move of `abs_delta`, first match wins
    fn band(&self, abs_delta: f64, unit: Unit, adapter_tag: Option<&str>) -> Option<MoveBand> {
        if abs_delta >= self.major {
            Some(MoveBand::Major)
        } else if abs_delta >= self.minor {
            Some(MoveBand::Minor)
        } else if abs_delta >= self.fine && unit == Unit::Rate && self.is_fine_grained(adapter_tag) {
            Some(MoveBand::Fine)
        } else {
            None
        }
    }

    fn is_fine_grained(&self, adapter_tag: Option<&str>) -> bool {
        adapter_tag.is_some_and(|tag| {
            self.fine_adapters
                .iter()
                .any(|adapter| adapter.eq_ignore_ascii_case(tag))
        })
    }
}

/// Decides alerts for rate metrics
pub struct RateEvaluator {
    store: Arc<dyn MetricStore>,
    thresholds: RateThresholds,
}

impl RateEvaluator {
    /// Create an evaluator over a metric store
    pub fn new(store: Arc<dyn MetricStore>, thresholds: RateThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Evaluate one observation.
    ///
    /// Writes the anchor when none exists yet or when an alert fires.
    pub async fn evaluate(
        &self,
        key: &str,
        display_name: &str,
        value: f64,
        unit: Unit,
        adapter_tag: Option<&str>,
    ) -> Result<Vec<Alert>> {
        if unit != Unit::Rate {
            debug!(key, %unit, "Skipping anchor evaluation for non-rate metric");
            return Ok(Vec::new());
        }

        let anchor_key = anchor_key(key);
        let anchor_name = format!("{display_name} (anchor)");

        let Some(anchor) = self.store.get_last(&anchor_key).await? else {
            self.store.record(&anchor_key, &anchor_name, value, unit).await?;
            debug!(key, value, "Anchor set");

            return Ok(vec![Alert::new(
                AlertCategory::Rate,
                Severity::Minor,
                key,
                AlertKind::AnchorSet {
                    name: display_name.to_string(),
                    value,
                },
            )]);
        };

        let delta = value - anchor;
        let direction = if delta > 0.0 { Direction::Up } else { Direction::Down };

        let Some(band) = self.thresholds.band(delta.abs(), unit, adapter_tag) else {
            debug!(key, anchor, value, "Move below thresholds");
            return Ok(Vec::new());
        };

        self.store.record(&anchor_key, &anchor_name, value, unit).await?;

        let severity = match band {
            MoveBand::Major => Severity::Major,
            MoveBand::Minor | MoveBand::Fine => Severity::Minor,
        };

        debug!(key, anchor, value, ?band, "Rate moved, re-anchored");

        Ok(vec![Alert::new(
            AlertCategory::Rate,
            severity,
            key,
            AlertKind::RateMoved {
                name: display_name.to_string(),
                band,
                direction,
                anchor,
                current: value,
            },
        )])
    }
}
