use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use super::downloader::{FeedDownloader, RefreshSummary};
use crate::config::Config;
use crate::shutdown::{Shutdown, ShutdownTrigger};
use crate::storage::FeedStore;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Shutdown has been triggered; a stopped scheduler cannot be restarted
    #[error("Scheduler has been stopped")]
    Stopped,

    /// The timer period must be non-zero
    #[error("Refresh interval must be greater than zero")]
    ZeroInterval,

    #[error("Scheduler task failed: {0}")]
    Join(String),
}

struct Shared<S> {
    downloader: FeedDownloader,
    store: Arc<S>,
    interval: Duration,
    min_delay: Duration,
    /// Held for the duration of a refresh cycle
    cycle: tokio::sync::Mutex<()>,
}

impl<S: FeedStore + 'static> Shared<S> {
    /// Runs one cycle unless another is already in flight.
    async fn run_cycle(&self) -> Option<RefreshSummary> {
        let Ok(_running) = self.cycle.try_lock() else {
            tracing::debug!("Refresh cycle already in progress, skipping");
            return None;
        };
        Some(
            self.downloader
                .refresh_feeds(Arc::clone(&self.store), self.min_delay)
                .await,
        )
    }
}

/// Owns the periodic refresh timer.
///
/// Constructed once by the process entry point. Cycles never overlap: timer
/// ticks that fall due while a cycle runs are skipped, and
/// [`refresh_now`](Self::refresh_now) returns `None` instead of starting a
/// second cycle. [`stop`](Self::stop) fires the shutdown trigger, which also
/// cancels the in-flight requests of any fetcher built on the same signal.
pub struct Scheduler<S> {
    shared: Arc<Shared<S>>,
    trigger: ShutdownTrigger,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FeedStore + 'static> Scheduler<S> {
    pub fn new(
        downloader: FeedDownloader,
        store: Arc<S>,
        config: &Config,
        trigger: ShutdownTrigger,
    ) -> Self {
        Self::with_timing(
            downloader,
            store,
            config.refresh_interval(),
            config.min_refresh_delay(),
            trigger,
        )
    }

    pub fn with_timing(
        downloader: FeedDownloader,
        store: Arc<S>,
        interval: Duration,
        min_delay: Duration,
        trigger: ShutdownTrigger,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                downloader,
                store,
                interval,
                min_delay,
                cycle: tokio::sync::Mutex::new(()),
            }),
            trigger,
            task: Mutex::new(None),
        }
    }

    /// Spawns the timer loop. The first cycle starts immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.trigger.is_triggered() {
            return Err(SchedulerError::Stopped);
        }
        if self.shared.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }

        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        tracing::info!(
            interval_secs = self.shared.interval.as_secs(),
            min_delay_secs = self.shared.min_delay.as_secs(),
            "Starting feed scheduler"
        );
        *task = Some(tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            self.trigger.subscribe(),
        )));
        Ok(())
    }

    /// Triggers shutdown and waits for the timer loop to exit.
    ///
    /// A cycle in flight finishes promptly because its requests are
    /// cancelled; each cancelled feed is logged as a failure.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.trigger.trigger();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.await.map_err(|e| SchedulerError::Join(e.to_string()))?;
        }
        tracing::info!("Feed scheduler stopped");
        Ok(())
    }

    /// Runs a cycle right away, or returns `None` if one is already running.
    pub async fn refresh_now(&self) -> Option<RefreshSummary> {
        self.shared.run_cycle().await
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<S> Drop for Scheduler<S> {
    fn drop(&mut self) {
        self.trigger.trigger();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_loop<S: FeedStore + 'static>(shared: Arc<Shared<S>>, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(shared.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                tracing::info!("Scheduler shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                shared.run_cycle().await;
            }
        }
    }
}
