//! Store configuration.

use serde::{Deserialize, Serialize};

/// What happens when an actor panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorFailurePolicy {
    /// Drop the remaining effects of the failing wish and keep the store alive.
    #[default]
    Isolate,
    /// Record the failure and dispose the store.
    DisposeStore,
}

/// How internal invariant checks react when they fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionMode {
    /// A failed check disposes the store.
    #[default]
    Strict,
    /// A failed check is logged and processing continues. Meant for tests.
    Lenient,
}

/// Default for [`StoreConfig::max_follow_ups`].
pub const DEFAULT_MAX_FOLLOW_UPS: usize = 64;

/// Construction-time settings for a [`Store`](crate::Store).
///
/// Deserializable so applications can keep it alongside the rest of their
/// configuration; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name used in log fields and error messages.
    pub name: String,
    pub actor_failure: ActorFailurePolicy,
    pub assertions: AssertionMode,
    /// How many follow-ups a post-processor may chain onto one effect
    /// before the chain counts as runaway.
    pub max_follow_ups: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            actor_failure: ActorFailurePolicy::default(),
            assertions: AssertionMode::default(),
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
        }
    }
}

impl StoreConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_actor_failure(mut self, policy: ActorFailurePolicy) -> Self {
        self.actor_failure = policy;
        self
    }

    pub fn with_assertions(mut self, mode: AssertionMode) -> Self {
        self.assertions = mode;
        self
    }

    pub fn with_max_follow_ups(mut self, limit: usize) -> Self {
        self.max_follow_ups = limit;
        self
    }
}
