//! Interval-driven background loops with explicit shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Handle to a loop started by [`spawn_interval`].
///
/// Dropping the handle stops the loop.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Whether the loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the loop and wait for the current tick to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(task = self.name, error = %e, "Background task ended abnormally");
            }
        }
        tracing::debug!(task = self.name, "Background task stopped");
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Shortest tick period; tokio intervals reject a zero period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Run `tick` every `period` until the handle is stopped or dropped.
///
/// The first tick fires after one full period. A slow tick delays the next
/// one instead of causing a burst of catch-up ticks. Periods shorter than
/// [`MIN_PERIOD`] are raised to it.
///
/// Must be called from within a tokio runtime.
pub fn spawn_interval<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> BackgroundTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick().await;
                }
                _ = &mut shutdown_rx => {
                    break;
                }
            }
        }
    });

    tracing::debug!(task = name, ?period, "Background task started");

    BackgroundTask {
        name,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}
