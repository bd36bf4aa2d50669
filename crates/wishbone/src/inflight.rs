//! Tracks work the reduction loop has not finished yet.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counts queued wishes and running actor tails.
///
/// A wish is queued from `accept` until the loop has dispatched it and folded
/// every effect its actor had ready. An actor tail runs from the moment the
/// loop hands off a pending effect stream until the loop has folded the last
/// effect of that stream.
#[derive(Default)]
pub struct InflightTracker {
    queued: AtomicUsize,
    running: AtomicUsize,
    closed: AtomicBool,
    changed: Notify,
}

impl InflightTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn wish_queued(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn wish_dispatched(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub(crate) fn tail_started(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn tail_finished(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Wake every waiter for good; used on dispose.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) || done(self) {
                return;
            }
            changed.await;
        }
    }

    pub(crate) async fn drained(&self) {
        self.wait_until(|t| t.queued() == 0).await
    }

    pub(crate) async fn settled(&self) {
        self.wait_until(|t| t.queued() == 0 && t.running() == 0).await
    }
}
