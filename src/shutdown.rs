//! Process-wide cancellation signal for in-flight network work.
//!
//! A [`ShutdownTrigger`] is held by whoever owns the process lifecycle (the
//! [`Scheduler`](crate::feed::Scheduler) in practice). Every
//! [`HttpFetcher`](crate::feed::HttpFetcher) carries a cloned [`Shutdown`] and
//! races each request against it, so triggering drops all outstanding request
//! futures and releases their sockets.

use tokio::sync::watch;

/// Creates a connected trigger/listener pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx: Some(rx) })
}

/// Sending half. Dropping it does not cancel listeners.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signals every listener. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a new listener attached to this trigger.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Receiving half, cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    /// A listener that is never triggered. Used for one-shot CLI commands and tests.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes once shutdown has been triggered.
    ///
    /// If the trigger is dropped without firing, this never completes.
    pub async fn triggered(&self) {
        let Some(mut rx) = self.rx.clone() else {
            return std::future::pending().await;
        };
        let fired = rx.wait_for(|triggered| *triggered).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}
