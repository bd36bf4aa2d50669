//! The store: wish intake, state truth, and observer fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

use crate::config::StoreConfig;
use crate::element::{effects, Actor, Bootstrapper, NewsPublisher, PostProcessor, Reducer};
use crate::engine::{fold_detached, guarded, Engine, Policies};
use crate::error::{FoldStage, StoreError};
use crate::inflight::InflightTracker;
use crate::relay::{NewsRelay, Observation, StateRelay};
use crate::source::{Intake, Source, SourceId, Subscription};

/// State shared between the store handle and its reduction loop.
pub(crate) struct Shared<S, N> {
    pub(crate) name: Arc<str>,
    pub(crate) config: StoreConfig,
    pub(crate) state: StateRelay<S>,
    pub(crate) news: NewsRelay<N>,
    pub(crate) tracker: Arc<InflightTracker>,
    disposed: Arc<AtomicBool>,
    failure: Mutex<Option<StoreError>>,
    sources: DashMap<SourceId, Subscription>,
    engine_task: Mutex<Option<AbortHandle>>,
}

impl<S: Clone, N: Clone> Shared<S, N> {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear everything down. Returns `false` if already disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.sources.clear();
        self.state.close();
        self.news.close();
        self.tracker.close();
        let task = self
            .engine_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }

        debug!(store = %self.name, "store disposed");
        true
    }

    /// Record a fatal error and dispose. The first failure wins.
    pub(crate) fn fail(&self, failure: StoreError) {
        error!(store = %self.name, error = %failure, "store failed, disposing");
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(failure);
        self.dispose();
    }
}

/// Builder for a [`Store`].
///
/// An actor and a reducer are required; everything else is optional.
///
/// ```ignore
/// let store: Store<Counter, Wish, News> = StoreBuilder::new(Counter::default())
///     .config(StoreConfig::named("counter"))
///     .actor(CounterActor)
///     .reducer(CounterReducer)
///     .news_publisher(CounterNews)
///     .build()?;
/// ```
pub struct StoreBuilder<S, W, E, N> {
    initial: S,
    config: StoreConfig,
    actor: Option<Box<dyn Actor<W, S, E>>>,
    reducer: Option<Box<dyn Reducer<S, E>>>,
    post_processor: Option<Box<dyn PostProcessor<S, E>>>,
    news_publisher: Option<Box<dyn NewsPublisher<S, E, N>>>,
    bootstrapper: Option<Box<dyn Bootstrapper<W, E>>>,
}

impl<S, W, E, N> StoreBuilder<S, W, E, N>
where
    S: Clone + Send + Sync + 'static,
    W: Send + 'static,
    E: Send + 'static,
    N: Clone + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            config: StoreConfig::default(),
            actor: None,
            reducer: None,
            post_processor: None,
            news_publisher: None,
            bootstrapper: None,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn actor(mut self, actor: impl Actor<W, S, E>) -> Self {
        self.actor = Some(Box::new(actor));
        self
    }

    pub fn reducer(mut self, reducer: impl Reducer<S, E>) -> Self {
        self.reducer = Some(Box::new(reducer));
        self
    }

    pub fn post_processor(mut self, post_processor: impl PostProcessor<S, E>) -> Self {
        self.post_processor = Some(Box::new(post_processor));
        self
    }

    pub fn news_publisher(mut self, news_publisher: impl NewsPublisher<S, E, N>) -> Self {
        self.news_publisher = Some(Box::new(news_publisher));
        self
    }

    pub fn bootstrapper(mut self, bootstrapper: impl Bootstrapper<W, E>) -> Self {
        self.bootstrapper = Some(Box::new(bootstrapper));
        self
    }

    /// Wire everything up and start the reduction loop.
    ///
    /// Must be called from within a tokio runtime. Bootstrap effects are
    /// folded before this returns, so the first state any observer sees
    /// already includes them.
    pub fn build(self) -> Result<Store<S, W, N>, StoreError> {
        let actor = self
            .actor
            .ok_or_else(|| StoreError::Config("an actor is required".to_string()))?;
        let reducer = self
            .reducer
            .ok_or_else(|| StoreError::Config("a reducer is required".to_string()))?;
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::Config("a store must be built inside a tokio runtime".to_string())
        })?;

        let mut initial = self.initial;
        let mut seed_wishes = Vec::new();
        if let Some(bootstrapper) = &self.bootstrapper {
            let seed_effects = guarded(FoldStage::Bootstrap, || bootstrapper.effects())?;
            initial = fold_detached(
                initial,
                seed_effects,
                reducer.as_ref(),
                self.post_processor.as_deref(),
                &self.config,
            )?;
            seed_wishes = guarded(FoldStage::Bootstrap, || bootstrapper.wishes())?;
        }

        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let disposed = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            name: name.clone(),
            config: self.config,
            state: StateRelay::new(initial),
            news: NewsRelay::new(),
            tracker: Arc::new(InflightTracker::new()),
            disposed: disposed.clone(),
            failure: Mutex::new(None),
            sources: DashMap::new(),
            engine_task: Mutex::new(None),
        });

        let (wish_tx, wish_rx) = mpsc::unbounded_channel();
        let intake = Intake::new(name, wish_tx, shared.tracker.clone(), disposed, runtime.clone());

        let policies = Policies {
            actor,
            reducer,
            post_processor: self.post_processor,
            news_publisher: self.news_publisher,
        };
        let engine = Engine::new(shared.clone(), policies, wish_rx);
        let task = runtime.spawn(engine.run());
        *shared
            .engine_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());

        for wish in seed_wishes {
            intake.accept(wish);
        }

        debug!(store = %shared.name, "store built");
        Ok(Store { shared, intake })
    }
}

impl<S, E, N> StoreBuilder<S, E, E, N>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
    N: Clone + Send + Sync + 'static,
{
    /// A store whose wishes are folded directly, without an actor decision.
    pub fn reducer_only(initial: S, reducer: impl Reducer<S, E>) -> Self {
        Self::new(initial)
            .actor(|wish: E, _state: &S| effects::just(wish))
            .reducer(reducer)
    }
}

/// Owns the current state and drives the reduction loop.
///
/// Dropping a store disposes it.
pub struct Store<S, W, N>
where
    S: Clone,
    N: Clone,
{
    shared: Arc<Shared<S, N>>,
    intake: Intake<W>,
}

impl<S, W, N> Store<S, W, N>
where
    S: Clone + Send + Sync + 'static,
    W: Send + 'static,
    N: Clone + Send + Sync + 'static,
{
    pub fn builder<E: Send + 'static>(initial: S) -> StoreBuilder<S, W, E, N> {
        StoreBuilder::new(initial)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue a wish. Never blocks; after [`dispose`](Store::dispose) it is a
    /// no-op.
    pub fn accept(&self, wish: W) {
        self.intake.accept(wish);
    }

    /// Queue a wish, failing with [`StoreError::Disposed`] if the store no
    /// longer accepts work.
    pub fn try_accept(&self, wish: W) -> Result<(), StoreError> {
        self.intake.try_accept(wish)
    }

    /// A cloneable handle for feeding wishes from elsewhere, e.g. a task that
    /// reacts to news.
    pub fn intake(&self) -> Intake<W> {
        self.intake.clone()
    }

    /// Start forwarding wishes from `source`.
    ///
    /// Connecting a source that is already connected does nothing. A disposed
    /// store rejects new sources with [`StoreError::Disposed`].
    pub fn connect_source<Src>(&self, source: &Src) -> Result<(), StoreError>
    where
        Src: Source<W> + ?Sized,
    {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }

        let id = source.id();
        match self.shared.sources.entry(id) {
            Entry::Occupied(_) => {
                trace!(store = %self.shared.name, source = %id, "source already connected");
            }
            Entry::Vacant(slot) => {
                slot.insert(source.subscribe(self.intake.clone()));
                debug!(store = %self.shared.name, source = %id, "source connected");
            }
        }

        // dispose() may have cleared the map between the check and the insert
        if self.is_disposed() {
            self.shared.sources.remove(&id);
            return Err(self.disposed_error());
        }
        Ok(())
    }

    /// Stop forwarding wishes from `source`. Wishes already accepted from it
    /// are still processed. Returns whether it was connected.
    pub fn disconnect_source<Src>(&self, source: &Src) -> bool
    where
        Src: Source<W> + ?Sized,
    {
        self.disconnect(source.id())
    }

    pub fn disconnect(&self, id: SourceId) -> bool {
        let removed = self.shared.sources.remove(&id).is_some();
        if removed {
            debug!(store = %self.shared.name, source = %id, "source disconnected");
        }
        removed
    }

    pub fn is_connected(&self, id: SourceId) -> bool {
        self.shared.sources.contains_key(&id)
    }

    /// The current state first, then every state produced afterwards.
    pub fn observe_state(&self) -> Observation<S> {
        self.shared.state.subscribe()
    }

    /// News published from now on. Nothing is replayed.
    pub fn observe_news(&self) -> Observation<N> {
        self.shared.news.subscribe()
    }

    pub fn current_state(&self) -> S {
        self.shared.state.current()
    }

    pub fn state_observers(&self) -> usize {
        self.shared.state.observer_count()
    }

    pub fn news_observers(&self) -> usize {
        self.shared.news.observer_count()
    }

    pub fn inflight(&self) -> &InflightTracker {
        &self.shared.tracker
    }

    /// Resolves once every wish accepted so far has been dispatched and the
    /// effects its actor had ready have been folded. Actor work that is
    /// still pending is not waited for.
    pub async fn drained(&self) {
        self.shared.tracker.drained().await
    }

    /// Like [`drained`](Store::drained), but also waits for every running
    /// actor to finish and its effects to be folded.
    pub async fn settled(&self) {
        self.shared.tracker.settled().await
    }

    /// Release sources, observers and in-flight actor work. Idempotent.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// The error that made the store dispose itself, if any.
    pub fn failure(&self) -> Option<StoreError> {
        self.shared
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn disposed_error(&self) -> StoreError {
        StoreError::Disposed(self.shared.name.to_string())
    }
}

impl<S, W, N> Drop for Store<S, W, N>
where
    S: Clone,
    N: Clone,
{
    fn drop(&mut self) {
        self.shared.dispose();
    }
}
