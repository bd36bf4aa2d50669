//! The reduction loop.
//!
//! One task per store. Actors may run concurrently on their own tasks, but
//! every fold (reducer, state publication, news, post-processing) happens
//! here, one effect at a time:
//!
//! ```text
//! accept(wish) ──► wish channel ──┐
//!                                 ▼
//!                        Engine::on_wish
//!                                 │ snapshot current state
//!                                 ▼
//!                        Actor::invoke ──► ready effects ──► fold
//!                                 │
//!                                 └─► pending tail ──► own task
//!                                                        │
//!                 effect channel ◄───────────────────────┘
//!                        │
//!                        ▼
//!                      fold: reduce ─► publish state ─► news ─► post-process ─┐
//!                        ▲                                                    │
//!                        └────────────────── follow-up effect ◄───────────────┘
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::assertions::enforce;
use crate::config::{ActorFailurePolicy, StoreConfig};
use crate::element::{Actor, EffectStream, NewsPublisher, PostProcessor, Reducer};
use crate::error::{panic_message, FoldStage, StoreError, Violation};
use crate::store::Shared;

/// The policy objects the loop drives.
pub(crate) struct Policies<S, W, E, N> {
    pub(crate) actor: Box<dyn Actor<W, S, E>>,
    pub(crate) reducer: Box<dyn Reducer<S, E>>,
    pub(crate) post_processor: Option<Box<dyn PostProcessor<S, E>>>,
    pub(crate) news_publisher: Option<Box<dyn NewsPublisher<S, E, N>>>,
}

/// Messages from actor tails back to the loop.
enum TailEvent<E> {
    Effect(E),
    Finished,
    Failed(String),
}

/// Run a policy callback, turning a panic into a reduction failure.
pub(crate) fn guarded<T>(stage: FoldStage, f: impl FnOnce() -> T) -> Result<T, StoreError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| StoreError::ReductionFailed {
        stage,
        message: panic_message(payload.as_ref()),
    })
}

/// Check a follow-up chain against `config.max_follow_ups`.
///
/// Returns whether the chain may go on. Past the limit, strict mode fails
/// and lenient mode ends the chain.
fn chain_continues(config: &StoreConfig, follow_ups: usize) -> Result<bool, StoreError> {
    let limit = config.max_follow_ups;
    let holds = follow_ups <= limit;
    enforce(config.assertions, &config.name, holds, || Violation::RunawayChain { limit })?;
    Ok(holds)
}

/// Fold effects into a state nobody observes yet. Used for bootstrapping.
pub(crate) fn fold_detached<S: 'static, E: 'static>(
    mut state: S,
    effects: Vec<E>,
    reducer: &dyn Reducer<S, E>,
    post_processor: Option<&dyn PostProcessor<S, E>>,
    config: &StoreConfig,
) -> Result<S, StoreError> {
    for effect in effects {
        let mut next = Some(effect);
        let mut follow_ups = 0;
        while let Some(effect) = next.take() {
            state = guarded(FoldStage::Reducer, || reducer.reduce(&state, &effect))?;
            if let Some(post) = post_processor {
                next = guarded(FoldStage::PostProcessor, || post.post_process(&effect, &state))?;
            }
            if next.is_some() {
                follow_ups += 1;
                if !chain_continues(config, follow_ups)? {
                    next = None;
                }
            }
        }
    }
    Ok(state)
}

pub(crate) struct Engine<S, W, E, N> {
    shared: Arc<Shared<S, N>>,
    policies: Policies<S, W, E, N>,
    wishes: mpsc::UnboundedReceiver<W>,
    tail_tx: mpsc::UnboundedSender<TailEvent<E>>,
    tail_rx: mpsc::UnboundedReceiver<TailEvent<E>>,
    tails: JoinSet<()>,
}

impl<S, W, E, N> Engine<S, W, E, N>
where
    S: Clone + Send + Sync + 'static,
    W: Send + 'static,
    E: Send + 'static,
    N: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        shared: Arc<Shared<S, N>>,
        policies: Policies<S, W, E, N>,
        wishes: mpsc::UnboundedReceiver<W>,
    ) -> Self {
        let (tail_tx, tail_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            policies,
            wishes,
            tail_tx,
            tail_rx,
            tails: JoinSet::new(),
        }
    }

    /// Drive the loop until the store is disposed.
    ///
    /// Dropping the loop drops the `JoinSet`, which aborts every actor tail
    /// still running.
    pub(crate) async fn run(mut self) {
        debug!(store = %self.shared.name, "reduction loop started");

        while !self.shared.is_disposed() {
            tokio::select! {
                biased;
                Some(event) = self.tail_rx.recv() => self.on_tail_event(event),
                Some(wish) = self.wishes.recv() => self.on_wish(wish),
                Some(_) = self.tails.join_next(), if !self.tails.is_empty() => {}
                else => break,
            }
        }

        debug!(
            store = %self.shared.name,
            abandoned_tails = self.tails.len(),
            "reduction loop stopped"
        );
    }

    fn on_wish(&mut self, wish: W) {
        self.dispatch(wish);
        self.shared.tracker.wish_dispatched();
    }

    /// Invoke the actor against the current state, fold everything it has
    /// ready, and hand the rest to a tail task.
    fn dispatch(&mut self, wish: W) {
        let state = self.shared.state.current();
        let actor = &self.policies.actor;
        let mut effects = match catch_unwind(AssertUnwindSafe(|| actor.invoke(wish, &state))) {
            Ok(effects) => effects,
            Err(payload) => return self.actor_failed(panic_message(payload.as_ref())),
        };

        loop {
            match catch_unwind(AssertUnwindSafe(|| effects.next().now_or_never())) {
                Ok(Some(Some(effect))) => {
                    if !self.fold(effect) {
                        return;
                    }
                }
                Ok(Some(None)) => return,
                Ok(None) => return self.spawn_tail(effects),
                Err(payload) => return self.actor_failed(panic_message(payload.as_ref())),
            }
        }
    }

    fn spawn_tail(&mut self, effects: EffectStream<E>) {
        self.shared.tracker.tail_started();
        trace!(store = %self.shared.name, "actor pending, continuing on its own task");

        let tx = self.tail_tx.clone();
        self.tails.spawn(async move {
            let mut effects = AssertUnwindSafe(effects).catch_unwind();
            while let Some(next) = effects.next().await {
                let event = match next {
                    Ok(effect) => TailEvent::Effect(effect),
                    Err(payload) => {
                        let _ = tx.send(TailEvent::Failed(panic_message(payload.as_ref())));
                        return;
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            let _ = tx.send(TailEvent::Finished);
        });
    }

    fn on_tail_event(&mut self, event: TailEvent<E>) {
        match event {
            TailEvent::Effect(effect) => {
                self.fold(effect);
            }
            TailEvent::Finished => self.shared.tracker.tail_finished(),
            TailEvent::Failed(message) => {
                self.actor_failed(message);
                self.shared.tracker.tail_finished();
            }
        }
    }

    fn actor_failed(&mut self, message: String) {
        match self.shared.config.actor_failure {
            ActorFailurePolicy::Isolate => {
                warn!(
                    store = %self.shared.name,
                    %message,
                    "actor failed, remaining effects dropped"
                );
            }
            ActorFailurePolicy::DisposeStore => self.shared.fail(StoreError::ActorFailed(message)),
        }
    }

    /// Fold an effect and any follow-ups it triggers. Returns `false` once
    /// the store is no longer running.
    fn fold(&self, effect: E) -> bool {
        match self.fold_chain(effect) {
            Ok(()) => !self.shared.is_disposed(),
            Err(error) => {
                self.shared.fail(error);
                false
            }
        }
    }

    fn fold_chain(&self, effect: E) -> Result<(), StoreError> {
        let mut next = Some(effect);
        let mut follow_ups = 0;

        while let Some(effect) = next.take() {
            if self.shared.is_disposed() {
                return Ok(());
            }
            next = self.fold_one(effect)?;

            if next.is_some() {
                follow_ups += 1;
                if !chain_continues(&self.shared.config, follow_ups)? {
                    next = None;
                }
            }
        }
        Ok(())
    }

    fn fold_one(&self, effect: E) -> Result<Option<E>, StoreError> {
        let shared = &self.shared;
        let before = shared.state.current();

        let reducer = &self.policies.reducer;
        let after = guarded(FoldStage::Reducer, || reducer.reduce(&before, &effect))?;

        let version = shared.state.publish(after.clone());
        trace!(store = %shared.name, version, "effect folded");

        if let Some(publisher) = &self.policies.news_publisher {
            let news = guarded(FoldStage::NewsPublisher, || {
                publisher.publish(&effect, &before, &after)
            })?;
            if let Some(news) = news {
                trace!(store = %shared.name, "news published");
                shared.news.publish(news);
            }
        }

        match &self.policies.post_processor {
            Some(post) => guarded(FoldStage::PostProcessor, || post.post_process(&effect, &after)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssertionMode;

    #[derive(Debug)]
    enum Effect {
        Add(i32),
        Clamp,
    }

    fn reducer(state: &i32, effect: &Effect) -> i32 {
        match effect {
            Effect::Add(n) => state + n,
            Effect::Clamp => (*state).min(10),
        }
    }

    fn clamp_above_ten(effect: &Effect, state: &i32) -> Option<Effect> {
        match effect {
            Effect::Add(_) if *state > 10 => Some(Effect::Clamp),
            _ => None,
        }
    }

    #[test]
    fn detached_fold_applies_follow_ups_in_order() {
        let effects = vec![Effect::Add(4), Effect::Add(9), Effect::Add(-3)];
        let config = StoreConfig::default();
        let state = fold_detached(0, effects, &reducer, Some(&clamp_above_ten), &config).unwrap();
        assert_eq!(state, 7);
    }

    #[test]
    fn detached_fold_reports_reducer_panics() {
        let exploding = |_: &i32, _: &Effect| -> i32 { panic!("bad effect") };
        let config = StoreConfig::default();
        let err = fold_detached(0, vec![Effect::Add(1)], &exploding, None, &config).unwrap_err();
        assert_eq!(
            err,
            StoreError::ReductionFailed {
                stage: FoldStage::Reducer,
                message: "bad effect".to_string(),
            }
        );
    }

    fn always_add_one(_: &Effect, _: &i32) -> Option<Effect> {
        Some(Effect::Add(1))
    }

    #[test]
    fn runaway_chains_fail_in_strict_mode() {
        let config = StoreConfig::default().with_max_follow_ups(5);
        let err = fold_detached(0, vec![Effect::Add(1)], &reducer, Some(&always_add_one), &config)
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InvariantViolation(Violation::RunawayChain { limit: 5 })
        );
    }

    #[test]
    fn runaway_chains_are_cut_in_lenient_mode() {
        let config = StoreConfig::default()
            .with_max_follow_ups(5)
            .with_assertions(AssertionMode::Lenient);
        let state =
            fold_detached(0, vec![Effect::Add(1)], &reducer, Some(&always_add_one), &config)
                .unwrap();
        assert_eq!(state, 6, "the effect and five follow-ups");
    }

    #[test]
    fn guarded_passes_values_through() {
        assert_eq!(guarded(FoldStage::NewsPublisher, || 42), Ok(42));
    }
}
