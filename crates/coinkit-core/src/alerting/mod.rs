//! Alerting for CoinKit
//!
//! Evaluators turn observations into structured alerts, the engine drives a
//! cycle over all adapters, and the dispatcher delivers the rendered text.

mod caps;
mod engine;
mod events;
mod notifier;
mod rates;
pub mod render;
mod scheduler;

pub use caps::{CapEvaluator, DEFAULT_CAP_THRESHOLD};
pub use engine::{AdapterFailure, CycleReport, Engine};
pub use events::EventEvaluator;
pub use notifier::{
    AlertDispatcher, DeliveryResult, DiscordWebhookSink, NotificationError, NotificationSink,
    ENGINE_ERROR_TEXT,
};
pub use rates::{RateEvaluator, RateThresholds};
pub use scheduler::Scheduler;
