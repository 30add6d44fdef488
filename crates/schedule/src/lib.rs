//! Calendar-driven capture scheduling: a cooperative tick loop, not a
//! worker pool. A tick only fires once the previous handler has returned,
//! so an over-long capture suppresses the ticks it overlaps.

#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrona_core::{Error, Result};
use chrono::Utc;
use cron::Schedule;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The capture pipeline invoked on each tick.
pub type CaptureFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct Scheduler {
    schedule: Schedule,
    expression: String,
    capture: CaptureFn,
    running: Mutex<bool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("expression", &self.expression)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Validate the five-field cron expression and build a scheduler.
    pub fn new(expression: &str, capture: CaptureFn) -> Result<Self> {
        let schedule = parse_expression(expression)?;
        Ok(Self {
            schedule,
            expression: expression.to_string(),
            capture,
            running: Mutex::new(false),
            cancel: Mutex::new(None),
        })
    }

    /// Run the tick loop until `cancel` fires. A failing tick is logged and
    /// the loop keeps going; a second `start` while running is an error.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        {
            let mut running = self.running.lock().expect("scheduler lock poisoned");
            if *running {
                return Err(Error::Scheduler("scheduler is already running".to_string()));
            }
            *running = true;
        }
        *self.cancel.lock().expect("scheduler lock poisoned") = Some(cancel.clone());
        info!(schedule = %self.expression, "scheduler started");

        loop {
            // Next fire time is computed after the previous handler returns:
            // ticks overlapped by their own runtime are suppressed, not queued.
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    info!("scheduler: triggering snapshot");
                    match (self.capture)(cancel.clone()).await {
                        Ok(()) => info!("scheduler: snapshot completed successfully"),
                        Err(e) => error!(error = %format!("{:#}", e), "scheduler: snapshot failed"),
                    }
                }
            }
        }

        *self.running.lock().expect("scheduler lock poisoned") = false;
        info!("scheduler stopped");
        Ok(())
    }

    /// Cancel a running loop. No-op when idle.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().expect("scheduler lock poisoned").take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().expect("scheduler lock poisoned")
    }
}

/// Parse a standard five-field cron expression (minute, hour, day-of-month,
/// month, day-of-week). The parser itself works on six/seven fields, so a
/// zero seconds field is prepended; anything but five fields is rejected to
/// keep the configured surface honest.
fn parse_expression(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(Error::Scheduler(format!(
            "invalid cron schedule {:?}: expected 5 fields, got {}",
            expression, fields
        )));
    }
    Schedule::from_str(&format!("0 {}", expression))
        .map_err(|e| Error::Scheduler(format!("invalid cron schedule {:?}: {}", expression, e)))
}
