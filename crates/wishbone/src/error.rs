//! Error types for store construction and the reduction path.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// The stage of the fold that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldStage {
    Bootstrap,
    Reducer,
    PostProcessor,
    NewsPublisher,
}

impl fmt::Display for FoldStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FoldStage::Bootstrap => "bootstrapper",
            FoldStage::Reducer => "reducer",
            FoldStage::PostProcessor => "post-processor",
            FoldStage::NewsPublisher => "news publisher",
        };
        f.write_str(name)
    }
}

/// Internal consistency checks performed on the reduction path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// A post-processor kept deriving follow-ups from its own follow-ups.
    #[error("post-processor derived more than {limit} follow-up effects in one chain")]
    RunawayChain { limit: usize },
}

/// Errors surfaced by a [`Store`](crate::Store).
///
/// A healthy store never produces these from the outside: wishes go in,
/// states and news come out. They show up at construction time, when talking
/// to a store that has been disposed, or as the recorded reason a store shut
/// itself down (see [`Store::failure`](crate::Store::failure)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store was wired incorrectly.
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// The store was disposed and no longer accepts work.
    #[error("store `{0}` has been disposed")]
    Disposed(String),

    /// The reduction path panicked. Always fatal to the store.
    #[error("{stage} failed: {message}")]
    ReductionFailed { stage: FoldStage, message: String },

    /// An actor panicked while producing effects.
    #[error("actor failed: {0}")]
    ActorFailed(String),

    /// A strict-mode invariant check failed.
    #[error("invariant violated: {0}")]
    InvariantViolation(#[from] Violation),
}

/// Best-effort message extraction from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
