//! # Wishbone
//!
//! A unidirectional state engine: wishes go in, one authoritative state and
//! a stream of one-shot news come out.
//!
//! ## Core Concepts
//!
//! Wishbone separates **deciding** from **folding**:
//! - Wish = intent (what someone would like to happen)
//! - Effect = an already-decided transition, internal to the store
//! - State = the single current value, replaced by every fold
//! - News = something that happened, delivered once to live observers
//!
//! The key principle: **actors decide, reducers fold, and only the reduction
//! loop writes state.**
//!
//! ## Architecture
//!
//! ```text
//! Sources (WishSubject, StreamSource, Intake)
//!     │
//!     ▼ accept()
//! wish channel
//!     │
//!     ▼
//! reduction loop ──► Actor.invoke(wish, current state)
//!     ▲                  │
//!     │                  ├─► ready effects ──► fold now
//!     │                  └─► pending effects ─► actor task ─┐
//!     │                                                    │
//!     └──────────────── effect channel ◄───────────────────┘
//!
//! fold = Reducer ─► publish state ─► NewsPublisher ─► PostProcessor
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One fold at a time** - many actors may run, but folds are serialized
//! 2. **Actors see the latest state** - the snapshot is taken on the loop at
//!    dispatch time, so a wish fed back from news sees every fold before it
//! 3. **Replay-latest states** - a new state observer gets the current state
//!    first, then every later state, none skipped or duplicated
//! 4. **No replay for news** - observers only see news published after they
//!    subscribed
//! 5. **Reducers are pure** - they never do I/O or emit effects; follow-ups
//!    go through the post-processor
//!
//! ## Failure Model
//!
//! - A panic in the reducer, post-processor or news publisher disposes the
//!   store; [`Store::failure`] tells you why
//! - A panic in an actor follows [`ActorFailurePolicy`]
//! - Expected failures (a request timing out, say) are the actor's job to
//!   turn into ordinary effects
//!
//! ## Example
//!
//! ```ignore
//! use wishbone::{effects, EffectStream, Store, StoreBuilder, WishSubject};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Counter { value: i64, loading: bool }
//!
//! #[derive(Debug, Clone)]
//! enum Wish { Bump, Fetch }
//!
//! enum Effect { Bumped, FetchStarted, Fetched(i64) }
//!
//! #[derive(Debug, Clone)]
//! enum News { Fetched }
//!
//! let store: Store<Counter, Wish, News> = StoreBuilder::new(Counter::default())
//!     .actor(|wish: Wish, state: &Counter| -> EffectStream<Effect> {
//!         match wish {
//!             Wish::Bump => effects![Effect::Bumped],
//!             Wish::Fetch if state.loading => effects![],
//!             Wish::Fetch => effects::just(Effect::FetchStarted)
//!                 .chain(effects::later(async { Effect::Fetched(fetch().await) }))
//!                 .boxed(),
//!         }
//!     })
//!     .reducer(|state: &Counter, effect: &Effect| match effect {
//!         Effect::Bumped => Counter { value: state.value + 1, ..state.clone() },
//!         Effect::FetchStarted => Counter { loading: true, ..state.clone() },
//!         Effect::Fetched(value) => Counter { value: *value, loading: false },
//!     })
//!     .news_publisher(|effect: &Effect, _: &Counter, _: &Counter| match effect {
//!         Effect::Fetched(_) => Some(News::Fetched),
//!         _ => None,
//!     })
//!     .build()?;
//!
//! let clicks = WishSubject::new();
//! store.connect_source(&clicks)?;
//! clicks.emit(Wish::Bump);
//!
//! let mut states = store.observe_state();
//! ```

// Core modules
mod assertions;
mod config;
mod effect_macro;
mod element;
mod engine;
mod error;
mod inflight;
mod relay;
mod source;
mod store;


// Re-export policy contracts
pub use element::{
    effects, Actor, Bootstrapper, EffectStream, NewsPublisher, PostProcessor, Reducer,
};

// Re-export configuration
pub use config::{ActorFailurePolicy, AssertionMode, StoreConfig, DEFAULT_MAX_FOLLOW_UPS};

// Re-export error types
pub use error::{FoldStage, StoreError, Violation};

// Re-export observation types
pub use relay::Observation;

// Re-export source types
pub use source::{Intake, Source, SourceId, StreamSource, Subscription, WishSubject};

// Re-export store types (primary entry point)
pub use inflight::InflightTracker;
pub use store::{Store, StoreBuilder};

// Re-export commonly used external types
pub use futures::stream::{BoxStream, StreamExt};
pub use tokio::sync::mpsc::error::TryRecvError;
