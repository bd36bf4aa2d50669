//! Wish sources that can be connected to and disconnected from a store.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use tokio::runtime::Handle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::StoreError;
use crate::inflight::InflightTracker;

/// Identity of a [`Source`]. Connecting the same id twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Non-blocking handle into a store's wish intake.
///
/// Cheap to clone. This is what sources push into, and what news observers
/// use to feed follow-up wishes back into the store.
pub struct Intake<W> {
    store: Arc<str>,
    tx: tokio::sync::mpsc::UnboundedSender<W>,
    tracker: Arc<InflightTracker>,
    disposed: Arc<AtomicBool>,
    runtime: Handle,
}

impl<W> Clone for Intake<W> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tx: self.tx.clone(),
            tracker: self.tracker.clone(),
            disposed: self.disposed.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<W> Intake<W> {
    pub(crate) fn new(
        store: Arc<str>,
        tx: tokio::sync::mpsc::UnboundedSender<W>,
        tracker: Arc<InflightTracker>,
        disposed: Arc<AtomicBool>,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            tx,
            tracker,
            disposed,
            runtime,
        }
    }

    /// Queue a wish. Never blocks; a disposed store silently drops it.
    pub fn accept(&self, wish: W) {
        if self.try_accept(wish).is_err() {
            trace!(store = %self.store, "wish dropped, store disposed");
        }
    }

    /// Queue a wish, reporting whether the store is still accepting work.
    pub fn try_accept(&self, wish: W) -> Result<(), StoreError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed(self.store.to_string()));
        }
        self.tracker.wish_queued();
        if self.tx.send(wish).is_err() {
            self.tracker.wish_dispatched();
            return Err(StoreError::Disposed(self.store.to_string()));
        }
        Ok(())
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

/// Live connection between a source and a store. Dropping it disconnects.
#[must_use = "dropping a Subscription disconnects it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

/// An external producer of wishes.
///
/// `subscribe` starts forwarding every wish the source produces from now on
/// into `intake`; cancelling the returned [`Subscription`] stops it.
pub trait Source<W>: Send + Sync {
    fn id(&self) -> SourceId;

    fn subscribe(&self, intake: Intake<W>) -> Subscription;
}

type Sinks<W> = Arc<Mutex<Vec<(u64, Intake<W>)>>>;

/// In-process hot source. Every [`emit`](WishSubject::emit) is delivered
/// synchronously to each subscribed intake.
///
/// Unsubscribing removes the intake from the subject under its lock, so a
/// wish emitted after [`Store::disconnect_source`](crate::Store::disconnect_source)
/// returns never reaches that store.
pub struct WishSubject<W> {
    id: SourceId,
    sinks: Sinks<W>,
    next_key: Arc<AtomicU64>,
}

impl<W> Clone for WishSubject<W> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sinks: self.sinks.clone(),
            next_key: self.next_key.clone(),
        }
    }
}

impl<W> Default for WishSubject<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> WishSubject<W> {
    pub fn new() -> Self {
        Self {
            id: SourceId::new(),
            sinks: Arc::new(Mutex::new(Vec::new())),
            next_key: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<W: Clone> WishSubject<W> {
    pub fn emit(&self, wish: W) {
        let sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, intake) in sinks.iter() {
            intake.accept(wish.clone());
        }
    }
}

impl<W: Send + 'static> Source<W> for WishSubject<W> {
    fn id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, intake: Intake<W>) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, intake));

        let sinks = Arc::downgrade(&self.sinks);
        Subscription::new(move || {
            if let Some(sinks) = sinks.upgrade() {
                sinks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(k, _)| *k != key);
            }
        })
    }
}

/// Adapts any stream of wishes into a [`Source`].
///
/// A stream can only be consumed once: the first subscription takes it and
/// later subscriptions receive nothing. Wishes are forwarded by a task that
/// is aborted when the subscription is cancelled. Forwarding goes through a
/// gate that cancelling closes, so once `cancel` returns no further wish from
/// the stream reaches the store, even if the task is still mid-poll on
/// another worker.
pub struct StreamSource<W> {
    id: SourceId,
    stream: Mutex<Option<BoxStream<'static, W>>>,
}

impl<W: Send + 'static> StreamSource<W> {
    pub fn new(stream: impl Stream<Item = W> + Send + 'static) -> Self {
        Self {
            id: SourceId::new(),
            stream: Mutex::new(Some(stream.boxed())),
        }
    }
}

impl<W: Send + 'static> Source<W> for StreamSource<W> {
    fn id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, intake: Intake<W>) -> Subscription {
        let taken = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut stream) = taken else {
            debug!(source = %self.id, "stream source already consumed");
            return Subscription::empty();
        };

        let open = Arc::new(Mutex::new(true));
        let gate = open.clone();
        let runtime = intake.runtime().clone();
        let forward = runtime.spawn(async move {
            while let Some(wish) = stream.next().await {
                let open = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if !*open || intake.try_accept(wish).is_err() {
                    break;
                }
            }
        });
        Subscription::new(move || {
            *open.lock().unwrap_or_else(PoisonError::into_inner) = false;
            forward.abort();
        })
    }
}
