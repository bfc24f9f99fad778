//! Metric data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::ScheduledEvent;
use crate::error::{Error, Result};

/// Suffix of the shadow sample holding a rate metric's anchor
pub const ANCHOR_SUFFIX: &str = ":anchor";

/// Key of the anchor sample for a rate metric
pub fn anchor_key(metric_key: &str) -> String {
    format!("{metric_key}{ANCHOR_SUFFIX}")
}

/// Whether a stored key is an anchor shadow rather than a user-facing metric
pub fn is_anchor_key(key: &str) -> bool {
    key.ends_with(ANCHOR_SUFFIX)
}

/// Unit of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Decimal rate, 0.05 == 5%
    Rate,
    /// Capacity utilization, 1.0 == full
    Ratio,
    /// Structured payload (scheduled events)
    Json,
}

impl Unit {
    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Rate => "rate",
            Unit::Ratio => "ratio",
            Unit::Json => "json",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rate" => Ok(Unit::Rate),
            "ratio" => Ok(Unit::Ratio),
            "json" => Ok(Unit::Json),
            other => Err(Error::validation(format!("unknown unit '{other}'"))),
        }
    }
}

/// Payload of a metric record. The variant decides which evaluator runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum MetricValue {
    /// Continuous rate, evaluated against a sticky anchor
    Rate(f64),
    /// Cap utilization, evaluated on full/not-full transitions
    Ratio(f64),
    /// Scheduled event list, evaluated through the lifecycle tracker
    #[serde(rename = "json")]
    Events(Vec<ScheduledEvent>),
}

impl MetricValue {
    /// Unit implied by the variant
    pub fn unit(&self) -> Unit {
        match self {
            MetricValue::Rate(_) => Unit::Rate,
            MetricValue::Ratio(_) => Unit::Ratio,
            MetricValue::Events(_) => Unit::Json,
        }
    }
}

/// A single observation produced by a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Globally unique, colon segmented key
    pub key: String,

    /// Human-readable name
    pub display_name: String,

    /// Observed value
    pub value: MetricValue,

    /// Adapter that produced the record, used for routing
    pub adapter_tag: Option<String>,
}

impl MetricRecord {
    /// Build a rate record
    pub fn rate(key: impl Into<String>, display_name: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            value: MetricValue::Rate(value),
            adapter_tag: None,
        }
    }

    /// Build a cap utilization record
    pub fn ratio(key: impl Into<String>, display_name: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            value: MetricValue::Ratio(value),
            adapter_tag: None,
        }
    }

    /// Build a scheduled event list record
    pub fn events(
        key: impl Into<String>,
        display_name: impl Into<String>,
        events: Vec<ScheduledEvent>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            value: MetricValue::Events(events),
            adapter_tag: None,
        }
    }

    /// Build a record from an untyped payload.
    ///
    /// Numeric units accept JSON numbers and numeric strings; anything else is a
    /// [`Error::NumericCoercion`] for this record.
    pub fn from_raw(
        key: impl Into<String>,
        display_name: impl Into<String>,
        unit: Unit,
        raw: serde_json::Value,
        adapter_tag: Option<String>,
    ) -> Result<Self> {
        let key = key.into();

        let value = match unit {
            Unit::Rate => MetricValue::Rate(coerce_number(&key, &raw)?),
            Unit::Ratio => MetricValue::Ratio(coerce_number(&key, &raw)?),
            Unit::Json => {
                let events = match raw {
                    serde_json::Value::Null => Vec::new(),
                    other => serde_json::from_value(other)?,
                };
                MetricValue::Events(events)
            }
        };

        Ok(Self {
            key,
            display_name: display_name.into(),
            value,
            adapter_tag,
        })
    }

    /// Tag the record with the adapter that produced it
    pub fn with_adapter(mut self, tag: impl Into<String>) -> Self {
        self.adapter_tag = Some(tag.into());
        self
    }

    /// Unit implied by the value
    pub fn unit(&self) -> Unit {
        self.value.unit()
    }
}

fn coerce_number(key: &str, raw: &serde_json::Value) -> Result<f64> {
    let value = match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::coercion(key, format!("{n} is not representable")))?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::coercion(key, format!("'{s}': {e}")))?,
        other => return Err(Error::coercion(key, format!("unexpected {other}"))),
    };

    if !value.is_finite() {
        return Err(Error::coercion(key, format!("{value} is not finite")));
    }
    Ok(value)
}

/// Latest persisted value of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSample {
    /// Metric key
    pub key: String,
    /// Display name
    pub name: String,
    /// Latest value
    pub value: f64,
    /// Unit
    pub unit: Unit,
    /// When the value was written
    pub updated_at: DateTime<Utc>,
}

/// Metric listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Metric key
    pub key: String,
    /// Display name
    pub name: String,
    /// Unit
    pub unit: Unit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anchor_keys_are_recognised() {
        assert_eq!(anchor_key("silo:usdc:borrow:rate"), "silo:usdc:borrow:rate:anchor");
        assert!(is_anchor_key("silo:usdc:borrow:rate:anchor"));
        assert!(!is_anchor_key("silo:usdc:borrow:rate"));
    }

    #[test]
    fn from_raw_accepts_numeric_strings() {
        let record = MetricRecord::from_raw(
            "dolomite:usdc:borrow:rate",
            "Dolomite USDC Borrow APR",
            Unit::Rate,
            json!(" 0.0667 "),
            Some("dolomite".into()),
        )
        .unwrap();

        assert_eq!(record.value, MetricValue::Rate(0.0667));
        assert_eq!(record.adapter_tag.as_deref(), Some("dolomite"));
    }

    #[test]
    fn from_raw_rejects_non_numeric_values() {
        let err = MetricRecord::from_raw("k", "K", Unit::Ratio, json!("n/a"), None).unwrap_err();
        assert!(matches!(err, Error::NumericCoercion { ref key, .. } if key == "k"));

        let err = MetricRecord::from_raw("k", "K", Unit::Rate, json!("NaN"), None).unwrap_err();
        assert!(matches!(err, Error::NumericCoercion { .. }));
    }

    #[test]
    fn from_raw_treats_null_event_list_as_empty() {
        let record =
            MetricRecord::from_raw("metadao:icos:scheduled", "ICOs", Unit::Json, json!(null), None)
                .unwrap();
        assert_eq!(record.value, MetricValue::Events(Vec::new()));
    }

    #[test]
    fn unit_round_trips_through_storage_text() {
        for unit in [Unit::Rate, Unit::Ratio, Unit::Json] {
            assert_eq!(unit.as_str().parse::<Unit>().unwrap(), unit);
        }
        assert!("percent".parse::<Unit>().is_err());
    }
}
