//! # CoinKit
//!
//! Polls DeFi lending markets and an ICO calendar, and alerts on the changes
//! that matter.
//!
//! Every few minutes each source adapter is polled. Borrow rates alert when
//! they drift a full band away from a sticky anchor, cap utilizations alert
//! when a cap fills or frees up, and scheduled ICOs alert once when they are
//! announced and once on launch day.
//!
//! ## Architecture
//!
//! - **Sources**: one adapter per upstream API, normalized into metric records
//! - **Alerting**: rate, cap and event evaluators driven by the cycle engine
//! - **Storage**: SQLite for latest samples, anchors, event state and subscriptions
//! - **API**: REST API for metrics, subscriptions and manual cycles
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the scheduler and the API
//! coinkit serve
//!
//! # Run a single cycle and print the alerts
//! coinkit once
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sources;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertDispatcher, CycleReport, Engine, Scheduler};
    pub use crate::config::Config;
    pub use crate::db::Database;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::sources::SourceAdapter;
}
