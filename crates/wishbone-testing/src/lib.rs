//! Testing utilities for Wishbone stores.
//!
//! - [`Observer`] keeps everything an [`Observation`] has produced so far,
//!   without waiting for more
//! - [`Recorder`] is a shared call log for actors and observers under test
//! - [`eventually`] polls a condition until it holds or a timeout expires
//! - [`init_tracing`] routes `tracing` output to the test writer

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;
use wishbone::{Observation, TryRecvError};

/// Default timeout used by [`eventually`] helpers in this crate.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Collects the values of an [`Observation`].
///
/// Values are pulled in on every read, so after `store.drained().await` an
/// observer holds every state the store published up to that point.
pub struct Observer<T> {
    observation: Observation<T>,
    values: Vec<T>,
    completed: bool,
}

impl<T> Observer<T> {
    pub fn new(observation: Observation<T>) -> Self {
        Self {
            observation,
            values: Vec::new(),
            completed: false,
        }
    }

    fn pull(&mut self) {
        while !self.completed {
            match self.observation.try_next() {
                Ok(value) => self.values.push(value),
                Err(TryRecvError::Disconnected) => self.completed = true,
                Err(TryRecvError::Empty) => break,
            }
        }
    }

    pub fn values(&mut self) -> &[T] {
        self.pull();
        &self.values
    }

    pub fn len(&mut self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.values().is_empty()
    }

    pub fn last(&mut self) -> Option<&T> {
        self.values().last()
    }

    /// Whether the observation has ended (the store was disposed).
    pub fn is_completed(&mut self) -> bool {
        self.pull();
        self.completed
    }
}

/// A shared, append-only log.
pub struct Recorder<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: T) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Recorder<T> {
    pub fn entries(&self) -> Vec<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Poll `condition` every few milliseconds until it holds.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, failing if it takes longer than `timeout`.
pub async fn within<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    match tokio::time::timeout(timeout, future).await {
        Ok(output) => Ok(output),
        Err(_) => bail!("future did not complete within {timeout:?}"),
    }
}

/// Install a test-friendly `tracing` subscriber. Honours `RUST_LOG`; safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use wishbone::{effects, Store, StoreBuilder};

    fn counter() -> Store<u32, u32, ()> {
        StoreBuilder::reducer_only(0, |state: &u32, add: &u32| state + add)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn observer_collects_without_blocking() {
        let store = counter();
        let mut states = Observer::new(store.observe_state());
        assert_eq!(states.values(), &[0]);

        store.accept(2);
        store.accept(3);
        store.drained().await;

        assert_eq!(states.values(), &[0, 2, 5]);
        assert!(!states.is_completed());

        store.dispose();
        assert!(states.is_completed());
        assert_eq!(states.last(), Some(&5));
    }

    #[tokio::test]
    async fn observer_keeps_every_value_of_a_long_run() {
        let store = counter();
        let mut states = Observer::new(store.observe_state());

        for _ in 0..300 {
            store.accept(1);
        }
        store.drained().await;

        assert_eq!(states.len(), 301);
        assert_eq!(states.last(), Some(&300));
        assert_eq!(store.current_state(), 300);
    }

    #[tokio::test]
    async fn recorder_clones_share_entries() {
        let recorder = Recorder::new();
        let twin = recorder.clone();
        twin.record("a");
        recorder.record("b");
        assert_eq!(recorder.entries(), vec!["a", "b"]);
        assert_eq!(twin.len(), 2);
    }

    #[tokio::test]
    async fn eventually_times_out_with_an_error() {
        let err = eventually(Duration::from_millis(20), || false).await.unwrap_err();
        assert!(err.to_string().contains("condition not met"));
    }

    #[tokio::test]
    async fn within_returns_the_output() {
        let store: Store<u8, u8, ()> = StoreBuilder::new(0)
            .actor(|_: u8, _: &u8| effects::none())
            .reducer(|state: &u8, _: &u8| *state)
            .build()
            .unwrap();
        within(DEFAULT_TIMEOUT, store.settled()).await.unwrap();
        assert_eq!(within(DEFAULT_TIMEOUT, async { 7 }).await.unwrap(), 7);
    }
}
