//! The policy objects a store is built from.
//!
//! Each contract is a trait with a blanket impl for the matching closure, so
//! small features can be wired with closures and larger ones with structs.

use futures::stream::{self, BoxStream, StreamExt};
use futures::Future;

/// Effects produced by an [`Actor`] for one wish.
///
/// Effects that are ready on the first poll are folded before the next wish
/// is dispatched. Whatever is still pending is driven on its own task and
/// folded as it arrives.
pub type EffectStream<E> = BoxStream<'static, E>;

/// Maps a wish and the state at dispatch time to effects.
///
/// Actors decide; they never compute the next state. Anything that looks
/// like "the new value is" belongs in the [`Reducer`].
pub trait Actor<W, S, E>: Send + Sync + 'static {
    fn invoke(&self, wish: W, state: &S) -> EffectStream<E>;
}

impl<W, S, E, F> Actor<W, S, E> for F
where
    F: Fn(W, &S) -> EffectStream<E> + Send + Sync + 'static,
{
    fn invoke(&self, wish: W, state: &S) -> EffectStream<E> {
        self(wish, state)
    }
}

/// Folds one effect into a new state. Pure and synchronous.
pub trait Reducer<S, E>: Send + Sync + 'static {
    fn reduce(&self, state: &S, effect: &E) -> S;
}

impl<S, E, F> Reducer<S, E> for F
where
    F: Fn(&S, &E) -> S + Send + Sync + 'static,
{
    fn reduce(&self, state: &S, effect: &E) -> S {
        self(state, effect)
    }
}

/// Derives a follow-up effect from an effect that was just folded.
pub trait PostProcessor<S, E>: Send + Sync + 'static {
    fn post_process(&self, effect: &E, state: &S) -> Option<E>;
}

impl<S, E, F> PostProcessor<S, E> for F
where
    F: Fn(&E, &S) -> Option<E> + Send + Sync + 'static,
{
    fn post_process(&self, effect: &E, state: &S) -> Option<E> {
        self(effect, state)
    }
}

/// Turns a folded effect into an optional one-shot notification.
pub trait NewsPublisher<S, E, N>: Send + Sync + 'static {
    fn publish(&self, effect: &E, before: &S, after: &S) -> Option<N>;
}

impl<S, E, N, F> NewsPublisher<S, E, N> for F
where
    F: Fn(&E, &S, &S) -> Option<N> + Send + Sync + 'static,
{
    fn publish(&self, effect: &E, before: &S, after: &S) -> Option<N> {
        self(effect, before, after)
    }
}

/// Seeds a store when it is built.
///
/// [`effects`](Bootstrapper::effects) are folded into the initial state
/// before anyone can observe it. [`wishes`](Bootstrapper::wishes) are queued
/// ahead of any external wish.
pub trait Bootstrapper<W, E>: Send + Sync + 'static {
    fn effects(&self) -> Vec<E> {
        Vec::new()
    }

    fn wishes(&self) -> Vec<W> {
        Vec::new()
    }
}

/// Constructors for [`EffectStream`]s.
pub mod effects {
    use super::*;

    /// The wish does not apply; nothing changes.
    pub fn none<E: Send + 'static>() -> EffectStream<E> {
        stream::empty().boxed()
    }

    /// A single effect, ready immediately.
    pub fn just<E: Send + 'static>(effect: E) -> EffectStream<E> {
        stream::once(futures::future::ready(effect)).boxed()
    }

    /// Several effects, all ready immediately, folded in order.
    pub fn iter<E, I>(effects: I) -> EffectStream<E>
    where
        E: Send + 'static,
        I: IntoIterator<Item = E>,
        I::IntoIter: Send + 'static,
    {
        stream::iter(effects).boxed()
    }

    /// One effect produced by a future, e.g. the result of a request.
    pub fn later<E, Fut>(future: Fut) -> EffectStream<E>
    where
        E: Send + 'static,
        Fut: Future<Output = E> + Send + 'static,
    {
        stream::once(future).boxed()
    }
}
