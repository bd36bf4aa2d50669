//! Invariant checks on the reduction path.
//!
//! The mode is chosen per store through [`StoreConfig`](crate::StoreConfig)
//! and defaults to [`AssertionMode::Strict`], where a failed check is fatal.

use tracing::warn;

use crate::config::AssertionMode;
use crate::error::{StoreError, Violation};

/// Evaluate an invariant. Strict mode turns a failure into an error for the
/// caller to treat as fatal; lenient mode only logs it.
pub(crate) fn enforce(
    mode: AssertionMode,
    store: &str,
    holds: bool,
    violation: impl FnOnce() -> Violation,
) -> Result<(), StoreError> {
    if holds {
        return Ok(());
    }

    let violation = violation();
    match mode {
        AssertionMode::Strict => Err(StoreError::InvariantViolation(violation)),
        AssertionMode::Lenient => {
            warn!(store, %violation, "invariant violated (lenient mode, continuing)");
            Ok(())
        }
    }
}
