//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers driving the periodic simulator loops."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Async rate limiter that ensures deterministic loop intervals.
///
/// The first tick completes one full `period` after construction.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Owned handle to a loop started with [`spawn_periodic`].
///
/// Dropping the handle without calling [`PeriodicTask::shutdown`] aborts the loop.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the loop after its current iteration and await completion.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|err| anyhow::anyhow!("{} task join failure: {}", self.name, err)),
            None => Ok(()),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run `action` every `period` on the tokio runtime until shut down.
///
/// `period` must be non-zero; configuration validation guarantees this for
/// the daemon loops.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, mut action: F) -> PeriodicTask
where
    F: FnMut() + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut limiter = RateLimiter::new(period);
        debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = limiter.tick() => action(),
            }
        }
        debug!(task = name, "periodic task stopped");
    });
    PeriodicTask {
        name,
        shutdown: shutdown_tx,
        task: Some(task),
    }
}
