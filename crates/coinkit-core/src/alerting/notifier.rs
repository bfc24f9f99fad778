//! Notification delivery for alerts

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::NotifierConfig;
use crate::db::SubscriptionStore;
use crate::error::Result;
use crate::models::{Alert, Severity};

/// Text sent to the operator when a cycle fails
pub const ENGINE_ERROR_TEXT: &str = "CoinKit tripped over its own tail and hit an engine error. \
Check the logs before it knocks something else off the table.";

/// Result of delivering one alert
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Metric the alert was raised for
    pub metric_key: String,
    /// Webhook the alert was posted to
    pub destination: String,
    /// Whether the destination accepted the message
    pub success: bool,
    /// Delivery failure, when `success` is false
    pub error: Option<String>,
    /// When delivery was attempted
    pub sent_at: DateTime<Utc>,
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response from the destination
    #[error("Destination rejected the message with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Something that can put text in front of people
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `text` to `destination`
    async fn deliver(&self, destination: &str, text: &str) -> std::result::Result<(), NotificationError>;
}

#[derive(Debug, Serialize)]
struct DiscordPayload<'a> {
    content: &'a str,
    allowed_mentions: AllowedMentions,
}

#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 2],
}

/// Posts messages to Discord webhook URLs
pub struct DiscordWebhookSink {
    client: Client,
}

impl DiscordWebhookSink {
    /// Create a sink whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhookSink {
    async fn deliver(&self, destination: &str, text: &str) -> std::result::Result<(), NotificationError> {
        let payload = DiscordPayload {
            content: text,
            allowed_mentions: AllowedMentions {
                parse: ["everyone", "users"],
            },
        };

        let response = self
            .client
            .post(destination)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected { status, body });
        }

        debug!("Webhook message delivered");
        Ok(())
    }
}

/// Routes alerts to destinations by adapter and adds mentions
pub struct AlertDispatcher {
    sink: Arc<dyn NotificationSink>,
    routes: HashMap<String, String>,
    operator_destination: Option<String>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl AlertDispatcher {
    /// Create a dispatcher; route keys are matched case-insensitively
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        config: &NotifierConfig,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|(adapter, destination)| (adapter.to_lowercase(), destination.clone()))
            .collect();

        Self {
            sink,
            routes,
            operator_destination: config.operator_destination.clone(),
            subscriptions,
        }
    }

    /// Destination for an alert, by its adapter tag
    pub fn route(&self, alert: &Alert) -> Option<&str> {
        let tag = alert.adapter_tag.as_deref()?.to_lowercase();
        self.routes.get(&tag).map(String::as_str)
    }

    /// Deliver every routable alert, in order. Failures are reported, never raised.
    pub async fn dispatch(&self, alerts: &[Alert]) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(alerts.len());

        for alert in alerts {
            let Some(destination) = self.route(alert) else {
                warn!(
                    metric_key = %alert.metric_key,
                    category = alert.category.as_str(),
                    "No route for alert"
                );
                continue;
            };

            let mut text = alert.message();
            if let Some(mentions) = self.mentions(alert).await {
                text.push('\n');
                text.push_str(&mentions);
            }

            let outcome = self.sink.deliver(destination, &text).await;
            if let Err(e) = &outcome {
                error!(metric_key = %alert.metric_key, error = %e, "Alert delivery failed");
            }

            results.push(DeliveryResult {
                metric_key: alert.metric_key.clone(),
                destination: destination.to_string(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
                sent_at: Utc::now(),
            });
        }

        let delivered = results.iter().filter(|r| r.success).count();
        info!(alerts = alerts.len(), delivered, "Alerts dispatched");

        results
    }

    /// Best-effort message to the operator destination, if one is configured
    pub async fn notify_operator(&self, text: &str) {
        let Some(destination) = self.operator_destination.as_deref() else {
            debug!("No operator destination configured");
            return;
        };

        if let Err(e) = self.sink.deliver(destination, text).await {
            error!(error = %e, "Failed to notify operator");
        }
    }

    /// `@everyone` for major alerts, otherwise the metric's subscribers
    async fn mentions(&self, alert: &Alert) -> Option<String> {
        if alert.severity == Severity::Major {
            return Some("@everyone".to_string());
        }

        let users = match self.subscriptions.subscribers(&alert.metric_key).await {
            Ok(users) => users,
            Err(e) => {
                warn!(metric_key = %alert.metric_key, error = %e, "Could not load subscribers");
                return None;
            }
        };

        if users.is_empty() {
            return None;
        }

        Some(
            users
                .iter()
                .map(|user| format!("<@{user}>"))
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}
