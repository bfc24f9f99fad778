//! MetaDAO scheduled ICO calendar, read from its public Notion collection

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{fetch_json, SourceAdapter};
use crate::error::FetchError;
use crate::models::{MetricRecord, ScheduledEvent};

const BASE_URL: &str = "https://www.idontbelieve.link";
const QUERY_PATH: &str = "/api/v3/queryCollection";

/// Key of the scheduled ICO list record
pub const METRIC_KEY: &str = "metadao:icos:scheduled";
const METRIC_NAME: &str = "MetaDAO Scheduled ICOs";

const SCHEDULED_GROUP: &str = "Scheduled ICOs";

// Notion property ids of the collection
const GROUP_PROP: &str = "Us=`";
const TITLE_PROP: &str = "title";
const ICO_TEXT_PROP: &str = "cIAG";
const TLDR_PROP: &str = "=cT`";
const GOALS_PROP: &str = "QwBV";

fn query_payload() -> Value {
    let group = |value: Option<&str>, hidden: Option<bool>| {
        let mut entry = json!({
            "value": {"type": "select"},
            "property": GROUP_PROP,
        });
        if let Some(value) = value {
            entry["value"]["value"] = json!(value);
        }
        if let Some(hidden) = hidden {
            entry["hidden"] = json!(hidden);
        }
        entry
    };

    json!({
        "clientType": "notion_app",
        "source": {
            "type": "collection",
            "id": "27eeb888-79cf-81b9-88d0-000b44f10b2c",
            "spaceId": "fe163126-0b1d-4f84-8d35-a3b3855bc1eb",
        },
        "collectionView": {
            "id": "27eeb888-79cf-81e2-8719-000c3ad62b00",
            "spaceId": "fe163126-0b1d-4f84-8d35-a3b3855bc1eb",
        },
        "loader": {
            "reducers": {
                "gallery_groups": {
                    "type": "groups",
                    "version": "v2",
                    "groupBy": {
                        "sort": {"type": "manual"},
                        "type": "select",
                        "property": GROUP_PROP,
                        "hideEmptyGroups": true,
                    },
                    "groupSortPreference": [
                        group(Some("Live ICOs"), Some(true)),
                        group(Some(SCHEDULED_GROUP), Some(false)),
                        group(Some("Announced-ICOs"), None),
                        group(Some("Post-ICO"), Some(false)),
                        group(None, Some(true)),
                        group(Some("Past-ICO"), Some(true)),
                    ],
                    "limit": 200,
                    "blockResults": {
                        "type": "independent",
                        "defaultLimit": 500,
                        "loadContentCover": true,
                        "groupOverrides": {},
                    },
                }
            },
            "sort": [],
            "searchQuery": "",
            "userTimeZone": "Europe/Berlin",
        },
    })
}

/// MetaDAO ICO calendar
pub struct MetaDaoAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl MetaDaoAdapter {
    /// Adapter against the public MetaDAO Notion API
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    /// Adapter against another host (tests, proxies)
    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for MetaDaoAdapter {
    fn name(&self) -> &str {
        "metadao"
    }

    async fn fetch(&self) -> Result<Vec<MetricRecord>, FetchError> {
        let url = format!("{}{QUERY_PATH}", self.base_url);
        let request = self
            .client
            .post(&url)
            .query(&[("src", "initial_load")])
            .json(&query_payload());

        let payload = match fetch_json(request).await {
            Ok(payload) => payload,
            Err(FetchError::RateLimited) => {
                warn!("MetaDAO rate limited, skipping this cycle");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let events = scheduled_events(&payload, Utc::now());
        debug!(events = events.len(), "Fetched MetaDAO scheduled ICOs");

        Ok(vec![MetricRecord::events(METRIC_KEY, METRIC_NAME, events).with_adapter(self.name())])
    }
}

/// Extract every block in the scheduled group, soonest first, undated last
fn scheduled_events(payload: &Value, now: DateTime<Utc>) -> Vec<ScheduledEvent> {
    let Some(blocks) = payload.pointer("/recordMap/block").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut events: Vec<ScheduledEvent> = blocks
        .values()
        .filter_map(|wrap| wrap.get("value"))
        .filter_map(|block| {
            let props = block.get("properties")?.as_object()?;
            if prop_text(props, GROUP_PROP).as_deref() != Some(SCHEDULED_GROUP) {
                return None;
            }
            let title = prop_text(props, TITLE_PROP)?;
            let details = prop_text(props, ICO_TEXT_PROP);
            let (start_date, end_date) = find_date(props).unwrap_or_default();
            let start_time = start_date.or_else(|| {
                details
                    .as_deref()
                    .and_then(|text| parse_launch_text(text, now))
                    .map(|dt| dt.to_rfc3339())
            });
            let id = block
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| title.clone());

            Some(ScheduledEvent {
                id: Some(id),
                title,
                start_time,
                end_time: end_date,
                summary: prop_text(props, TLDR_PROP),
                fundraising_goals: prop_text(props, GOALS_PROP),
                link: best_link(props),
                details,
            })
        })
        .collect();

    events.sort_by_key(|event| {
        let starts_at = event.starts_at();
        (starts_at.is_none(), starts_at)
    });
    events
}

/// Concatenated plain text of a rich-text property, `None` when blank
fn prop_text(props: &Map<String, Value>, key: &str) -> Option<String> {
    let parts = props.get(key)?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get(0)?.as_str())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Hyperlinks from `["a", url]` decorations across all properties, first seen first
fn links(props: &Map<String, Value>) -> Vec<String> {
    let mut seen = HashSet::new();
    props
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|part| part.get(1)?.as_array())
        .flatten()
        .filter_map(|decoration| match decoration.as_array()?.as_slice() {
            [kind, url] if kind == "a" => url.as_str(),
            _ => None,
        })
        .filter(|url| seen.insert(*url))
        .map(String::from)
        .collect()
}

/// First post or article on X, else the first X link at all
fn best_link(props: &Map<String, Value>) -> Option<String> {
    let x_links: Vec<String> = links(props)
        .into_iter()
        .filter(|l| l.contains("x.com/") || l.contains("twitter.com/"))
        .collect();
    x_links
        .iter()
        .find(|l| l.contains("/status/") || l.contains("/article/"))
        .or_else(|| x_links.first())
        .cloned()
}

/// First `["d", {start_date, end_date}]` date decoration anywhere in the properties
fn find_date(props: &Map<String, Value>) -> Option<(Option<String>, Option<String>)> {
    fn walk(value: &Value) -> Option<(Option<String>, Option<String>)> {
        match value {
            Value::Array(items) => {
                if let [kind, Value::Object(date)] = items.as_slice() {
                    if kind == "d" && date.contains_key("start_date") {
                        let field = |k: &str| date.get(k).and_then(Value::as_str).map(String::from);
                        return Some((field("start_date"), field("end_date")));
                    }
                }
                items.iter().find_map(walk)
            }
            Value::Object(map) => map.values().find_map(walk),
            _ => None,
        }
    }

    props.values().find_map(walk)
}

fn launch_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*launch date:\s*").expect("valid regex"))
}

fn ordinal_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("valid regex"))
}

fn has_year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}\b").expect("valid regex"))
}

/// Parse free text like `Launch Date: February 3rd at 18:30 UTC`.
///
/// A missing year means the next occurrence of that date relative to `now`.
/// Anything announced as TBA has no start.
fn parse_launch_text(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if text.to_lowercase().contains("tba") {
        return None;
    }

    let cleaned = launch_prefix().replace(text, "");
    let cleaned = ordinal_suffix().replace_all(&cleaned, "$1");
    let cleaned = cleaned
        .replace(" at ", " ")
        .replace(',', " ")
        .replace("UTC", " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if has_year().is_match(&cleaned) {
        return parse_dated(&cleaned);
    }

    let this_year = parse_dated(&format!("{cleaned} {}", now.year()))?;
    if this_year.date_naive() < now.date_naive() {
        return parse_dated(&format!("{cleaned} {}", now.year() + 1));
    }
    Some(this_year)
}

fn parse_dated(text: &str) -> Option<DateTime<Utc>> {
    const DATE_TIMES: [&str; 4] = ["%B %d %Y %H:%M", "%B %d %H:%M %Y", "%d %B %Y %H:%M", "%d %B %H:%M %Y"];
    const DATES: [&str; 2] = ["%B %d %Y", "%d %B %Y"];

    DATE_TIMES
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATES
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;
    use chrono::TimeZone;
    use rstest::rstest;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    #[rstest]
    #[case("Launch Date: February 3rd at 18:30 UTC", Some((2026, 2, 3, 18, 30)))]
    #[case("launch date: March 1st", Some((2026, 3, 1, 0, 0)))]
    #[case("Launch Date: January 5th at 14:00 UTC", Some((2027, 1, 5, 14, 0)))]
    #[case("Launch Date: January 5th, 2026 at 14:00 UTC", Some((2026, 1, 5, 14, 0)))]
    #[case("Launch Date: TBA", None)]
    #[case("soon", None)]
    fn launch_text(#[case] text: &str, #[case] expected: Option<(i32, u32, u32, u32, u32)>) {
        let expected = expected.map(|(y, mo, d, h, mi)| Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap());
        assert_eq!(parse_launch_text(text, now()), expected);
    }

    fn block(id: &str, title: &str, group: &str, extra: Value) -> Value {
        let mut props = json!({
            "title": [[title]],
            "Us=`": [[group]],
        });
        if let (Value::Object(props), Value::Object(extra)) = (&mut props, extra) {
            props.extend(extra);
        }
        json!({"value": {"id": id, "properties": props}})
    }

    fn collection() -> Value {
        json!({"recordMap": {"block": {
            "b1": block("b1", "Later", SCHEDULED_GROUP, json!({
                "cIAG": [["Launch Date: March 10th at 16:00 UTC"]],
            })),
            "b2": block("b2", "Umbra", SCHEDULED_GROUP, json!({
                "=cT`": [["Privacy ", []], ["layer"]],
                "QwBV": [["$2M min"]],
                "links": [
                    ["Site", [["a", "https://umbra.xyz"]]],
                    ["X", [["a", "https://x.com/umbra"]]],
                    ["Post", [["a", "https://x.com/umbra/status/42"]]],
                    ["Dup", [["a", "https://x.com/umbra"]]],
                ],
                "date": [["‣", [["d", {"type": "date", "start_date": "2026-02-03", "end_date": "2026-02-07"}]]]],
            })),
            "b3": block("b3", "Mystery", SCHEDULED_GROUP, json!({
                "cIAG": [["Launch Date: TBA"]],
            })),
            "b4": block("b4", "Done", "Past-ICO", json!({})),
            "b5": {"value": {"id": "b5"}},
        }}})
    }

    #[test]
    fn scheduled_group_only_sorted_by_start() {
        let events = scheduled_events(&collection(), now());

        let titles: Vec<&str> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Umbra", "Later", "Mystery"]);

        let umbra = &events[0];
        assert_eq!(umbra.id.as_deref(), Some("b2"));
        assert_eq!(umbra.start_time.as_deref(), Some("2026-02-03"));
        assert_eq!(umbra.end_time.as_deref(), Some("2026-02-07"));
        assert_eq!(umbra.summary.as_deref(), Some("Privacy layer"));
        assert_eq!(umbra.fundraising_goals.as_deref(), Some("$2M min"));
        assert_eq!(umbra.link.as_deref(), Some("https://x.com/umbra/status/42"));

        assert_eq!(events[1].start_time.as_deref(), Some("2026-03-10T16:00:00+00:00"));
        assert_eq!(events[2].start_time, None);
    }

    #[test]
    fn profile_link_when_no_post() {
        let props = json!({"l": [["X", [["a", "https://umbra.xyz"]]], ["X", [["b"], ["a", "https://twitter.com/umbra"]]]]});
        let Value::Object(props) = props else { unreachable!() };

        assert_eq!(best_link(&props).as_deref(), Some("https://twitter.com/umbra"));
    }

    #[tokio::test]
    async fn fetch_wraps_events_in_one_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(QUERY_PATH))
            .and(query_param("src", "initial_load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection()))
            .mount(&server)
            .await;

        let adapter = MetaDaoAdapter::with_base_url(reqwest::Client::new(), server.uri());
        let records = adapter.fetch().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, METRIC_KEY);
        assert_eq!(records[0].adapter_tag.as_deref(), Some("metadao"));
        assert!(matches!(&records[0].value, MetricValue::Events(events) if events.len() == 3));
    }

    #[tokio::test]
    async fn rate_limit_skips_the_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = MetaDaoAdapter::with_base_url(reqwest::Client::new(), server.uri());

        assert!(adapter.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_failures_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = MetaDaoAdapter::with_base_url(reqwest::Client::new(), server.uri());

        assert!(matches!(adapter.fetch().await, Err(FetchError::Transient(_))));
    }
}
