//! Named callbacks fired on a fixed interval
//!
//! Each task runs on its own tokio task. Callbacks are synchronous and are
//! expected to do nothing heavier than an enqueue.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Handle to a running recurring task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct RecurringTask {
    name: String,
    interval: Duration,
    handle: JoinHandle<()>,
}

impl RecurringTask {
    /// Invoke `callback` every `interval`, starting one interval from now
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();

        debug!(task = %name, interval = ?interval, "Starting recurring task");

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                trace!(task = %task_name, "Recurring task fired");
                callback();
            }
        });

        Self {
            name,
            interval,
            handle,
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Firing interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the task
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Still scheduled
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_on_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let task = RecurringTask::spawn("counter", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(task.name(), "counter");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_callbacks() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let task = RecurringTask::spawn("cancelled", Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        task.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!task.is_running());
    }
}
