//! Fan-out of states and news to live observers.
//!
//! Each relay is one mutex-guarded cell holding the senders of every live
//! [`Observation`]. The state relay additionally holds the latest state and
//! its version. Subscribing and publishing both happen under the lock, so a
//! subscriber sees each state exactly once: as its replayed head or as a
//! live update.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// A live, unbounded sequence of values from a store.
///
/// Returned by [`Store::observe_state`](crate::Store::observe_state) and
/// [`Store::observe_news`](crate::Store::observe_news). Ends once the store
/// is disposed. Dropping it unsubscribes.
pub struct Observation<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Observation<T> {
    /// Take the next value if one is already buffered.
    ///
    /// Fails with [`TryRecvError::Empty`] when nothing is buffered yet and
    /// with [`TryRecvError::Disconnected`] once the store is disposed and
    /// every buffered value has been taken. Unlike polling the stream, this
    /// never yields to the runtime, so it can drain any number of values.
    pub fn try_next(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

impl<T> Stream for Observation<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

struct Listeners<T> {
    senders: SmallVec<[mpsc::UnboundedSender<T>; 4]>,
    closed: bool,
}

impl<T: Clone> Listeners<T> {
    fn new() -> Self {
        Self {
            senders: SmallVec::new(),
            closed: false,
        }
    }

    fn attach(&mut self, head: Option<&T>) -> Observation<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed {
            if let Some(head) = head {
                let _ = tx.send(head.clone());
            }
            self.senders.push(tx);
        }
        Observation { rx }
    }

    fn deliver(&mut self, value: &T) {
        self.senders.retain(|tx| tx.send(value.clone()).is_ok());
    }

    fn count(&mut self) -> usize {
        self.senders.retain(|tx| !tx.is_closed());
        self.senders.len()
    }

    fn close(&mut self) {
        self.closed = true;
        self.senders.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StateCell<T> {
    latest: T,
    version: u64,
    listeners: Listeners<T>,
}

/// Replay-latest relay for states.
pub(crate) struct StateRelay<T> {
    cell: Mutex<StateCell<T>>,
}

impl<T: Clone> StateRelay<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            cell: Mutex::new(StateCell {
                latest: initial,
                version: 0,
                listeners: Listeners::new(),
            }),
        }
    }

    /// Subscribe; the current state is the first value delivered.
    pub(crate) fn subscribe(&self) -> Observation<T> {
        let mut cell = lock(&self.cell);
        let StateCell {
            latest, listeners, ..
        } = &mut *cell;
        listeners.attach(Some(&*latest))
    }

    pub(crate) fn current(&self) -> T {
        lock(&self.cell).latest.clone()
    }

    /// Publish a new state; returns its version.
    pub(crate) fn publish(&self, value: T) -> u64 {
        let mut cell = lock(&self.cell);
        if cell.listeners.closed {
            return cell.version;
        }
        cell.listeners.deliver(&value);
        cell.latest = value;
        cell.version += 1;
        cell.version
    }

    pub(crate) fn observer_count(&self) -> usize {
        lock(&self.cell).listeners.count()
    }

    /// Stop delivering. Open observations end after draining what they
    /// hold; the latest state stays readable.
    pub(crate) fn close(&self) {
        lock(&self.cell).listeners.close();
    }
}

/// No-replay relay for news.
pub(crate) struct NewsRelay<T> {
    listeners: Mutex<Listeners<T>>,
}

impl<T: Clone> NewsRelay<T> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Listeners::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Observation<T> {
        lock(&self.listeners).attach(None)
    }

    pub(crate) fn publish(&self, value: T) {
        lock(&self.listeners).deliver(&value);
    }

    pub(crate) fn observer_count(&self) -> usize {
        lock(&self.listeners).count()
    }

    pub(crate) fn close(&self) {
        lock(&self.listeners).close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};

    fn ready<T>(obs: &mut Observation<T>) -> Vec<T> {
        std::iter::from_fn(|| obs.try_next().ok()).collect()
    }

    #[test]
    fn state_relay_hands_latest_then_updates() {
        let relay = StateRelay::new(0);
        relay.publish(1);

        let mut obs = relay.subscribe();
        relay.publish(2);
        relay.publish(3);

        assert_eq!(ready(&mut obs), vec![1, 2, 3]);
        assert_eq!(relay.current(), 3);
    }

    #[test]
    fn news_relay_never_replays() {
        let relay = NewsRelay::new();
        relay.publish("before");

        let mut obs = relay.subscribe();
        assert!(ready(&mut obs).is_empty());

        relay.publish("after");
        assert_eq!(ready(&mut obs), vec!["after"]);
    }

    #[test]
    fn every_subscriber_sees_the_same_sequence() {
        let relay = StateRelay::new('a');
        let mut first = relay.subscribe();
        relay.publish('b');
        let mut second = relay.subscribe();
        relay.publish('c');

        assert_eq!(ready(&mut first), vec!['a', 'b', 'c']);
        assert_eq!(ready(&mut second), vec!['b', 'c']);
    }

    #[test]
    fn versions_count_published_states() {
        let relay = StateRelay::new(10);
        assert_eq!(relay.publish(11), 1);
        assert_eq!(relay.publish(12), 2);
        assert_eq!(relay.current(), 12);
    }

    #[test]
    fn try_next_tells_empty_from_ended() {
        let relay = StateRelay::new(0);
        let mut obs = relay.subscribe();

        assert_eq!(obs.try_next(), Ok(0));
        assert_eq!(obs.try_next(), Err(TryRecvError::Empty));

        relay.publish(1);
        relay.close();
        assert_eq!(obs.try_next(), Ok(1));
        assert_eq!(obs.try_next(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn try_next_drains_long_backlogs() {
        let relay = StateRelay::new(0);
        let mut obs = relay.subscribe();
        for n in 1..=500 {
            relay.publish(n);
        }
        assert_eq!(ready(&mut obs).len(), 501);
    }

    #[test]
    fn dropped_observations_are_pruned() {
        let relay = StateRelay::new(());
        let kept = relay.subscribe();
        drop(relay.subscribe());

        relay.publish(());
        assert_eq!(relay.observer_count(), 1);
        drop(kept);
        assert_eq!(relay.observer_count(), 0);
    }

    #[test]
    fn close_ends_observations_and_keeps_latest() {
        let relay = StateRelay::new(1);
        let mut obs = relay.subscribe();
        relay.close();
        relay.publish(2);

        assert_eq!(obs.next().now_or_never(), Some(Some(1)));
        assert_eq!(obs.next().now_or_never(), Some(None));
        assert_eq!(relay.current(), 1);

        let mut late = relay.subscribe();
        assert_eq!(late.next().now_or_never(), Some(None));
    }

    #[test]
    fn closed_news_relay_drops_publications() {
        let relay = NewsRelay::new();
        let mut obs = relay.subscribe();
        relay.close();
        relay.publish(5);

        assert_eq!(obs.next().now_or_never(), Some(None));
        assert_eq!(relay.observer_count(), 0);
    }
}
