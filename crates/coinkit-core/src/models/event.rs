//! Scheduled event models

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A discrete scheduled event (an ICO on the MetaDAO calendar)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Stable identifier; events without one cannot be tracked
    pub id: Option<String>,

    /// Project or event title
    pub title: String,

    /// Start instant as published upstream (ISO 8601)
    pub start_time: Option<String>,

    /// End instant as published upstream (ISO 8601)
    pub end_time: Option<String>,

    /// One-paragraph summary
    pub summary: Option<String>,

    /// Fundraising goals text
    pub fundraising_goals: Option<String>,

    /// Best announcement link
    pub link: Option<String>,

    /// Raw descriptive text the start time may have been parsed from
    pub details: Option<String>,
}

impl ScheduledEvent {
    /// Parsed start instant, if present and well formed
    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.start_time.as_deref().and_then(parse_start_time)
    }

    /// UTC calendar day the event starts on
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.starts_at().map(|dt| dt.date_naive())
    }
}

/// Which one-shot notifications have already gone out for an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLifecycleState {
    /// When the "scheduled" alert fired
    pub scheduled_notified_at: Option<DateTime<Utc>>,

    /// When the "launches today" alert fired
    pub release_notified_at: Option<DateTime<Utc>>,
}

/// Parse an upstream start time into a UTC instant.
///
/// Accepts RFC 3339 (`Z` or numeric offset), naive date-times taken as UTC and
/// bare dates taken as midnight UTC. Returns `None` for anything else.
pub fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = raw.trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}
