//! Alert data models
//!
//! Alerts carry structured parameters only. Turning them into text is the job of
//! [`crate::alerting::render`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which evaluator produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    /// Rate anchor moves
    Rate,
    /// Cap transitions
    Cap,
    /// Scheduled event lifecycle
    Event,
}

impl AlertCategory {
    /// Lowercase name used in logs and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            AlertCategory::Rate => "rate",
            AlertCategory::Cap => "cap",
            AlertCategory::Event => "event",
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine, only subscribers are pinged
    #[default]
    Minor,
    /// Everyone is pinged
    Major,
}

impl Severity {
    /// Lowercase name used in logs and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
        }
    }
}

/// Direction of a rate move relative to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Above the anchor
    Up,
    /// At or below the anchor
    Down,
}

/// Threshold band a rate move crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveBand {
    /// At least 10 percentage points
    Major,
    /// At least 1 percentage point
    Minor,
    /// At least 0.5 percentage points, for adapters with fine-grained alerting
    Fine,
}

/// Structured alert payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum AlertKind {
    /// First observation of a rate metric
    AnchorSet {
        /// Metric display name
        name: String,
        /// Initial anchor
        value: f64,
    },
    /// A rate moved past a threshold band
    RateMoved {
        /// Metric display name
        name: String,
        /// Band crossed
        band: MoveBand,
        /// Up or down
        direction: Direction,
        /// Previous anchor
        anchor: f64,
        /// New value, now the anchor
        current: f64,
    },
    /// A cap filled up
    CapReached {
        /// Metric display name
        name: String,
    },
    /// A full cap has room again
    CapReleased {
        /// Metric display name
        name: String,
        /// Current utilization
        usage: f64,
    },
    /// A new event showed up on the calendar
    EventScheduled {
        /// Event title
        title: String,
        /// Parsed start, when known
        starts_at: Option<DateTime<Utc>>,
        /// Summary text
        summary: Option<String>,
        /// Fundraising goals text
        fundraising_goals: Option<String>,
        /// Announcement link
        link: Option<String>,
    },
    /// An event starts today (UTC)
    EventLaunchesToday {
        /// Event title
        title: String,
    },
}

/// An alert produced by one evaluation cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Evaluator that produced the alert
    pub category: AlertCategory,

    /// Severity level
    pub severity: Severity,

    /// Metric the alert is about
    pub metric_key: String,

    /// Adapter that produced the metric, used for routing
    pub adapter_tag: Option<String>,

    /// Structured payload
    pub kind: AlertKind,
}

impl Alert {
    /// Create an alert without an adapter tag
    pub fn new(
        category: AlertCategory,
        severity: Severity,
        metric_key: impl Into<String>,
        kind: AlertKind,
    ) -> Self {
        Self {
            category,
            severity,
            metric_key: metric_key.into(),
            adapter_tag: None,
            kind,
        }
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        crate::alerting::render::message(self)
    }
}
