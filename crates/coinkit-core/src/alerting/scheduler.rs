//! Periodic driver: run a cycle, dispatch its alerts, repeat

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::engine::{CycleReport, Engine};
use super::notifier::{AlertDispatcher, ENGINE_ERROR_TEXT};
use crate::error::Result;

/// Runs the engine on a fixed interval
pub struct Scheduler {
    engine: Arc<Engine>,
    dispatcher: Arc<AlertDispatcher>,
    interval: Duration,
}

impl Scheduler {
    /// Create a scheduler that runs `engine` every `interval`
    pub fn new(engine: Arc<Engine>, dispatcher: Arc<AlertDispatcher>, interval: Duration) -> Self {
        Self {
            engine,
            dispatcher,
            interval,
        }
    }

    /// Tick until Ctrl-C. The first tick fires immediately.
    pub async fn run(&self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    }

    /// Tick until `shutdown` resolves. A signal that lands mid-cycle stops
    /// the loop once that cycle finishes.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        info!(interval = ?self.interval, "Starting scheduler");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // A failed cycle is already logged and reported
                    let _ = self.tick().await;
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }
    }

    /// One iteration: run a cycle and dispatch its alerts, or report the failure
    pub async fn tick(&self) -> Result<CycleReport> {
        match self.engine.run_cycle().await {
            Ok(report) => {
                self.dispatcher.dispatch(&report.alerts).await;
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Evaluation cycle failed");
                counter!("coinkit_cycle_failures_total").increment(1);
                self.dispatcher.notify_operator(ENGINE_ERROR_TEXT).await;
                Err(e)
            }
        }
    }
}
