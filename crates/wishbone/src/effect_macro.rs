//! Macros for reducing actor boilerplate.

/// Build an [`EffectStream`](crate::EffectStream) of immediately-ready effects.
///
/// `effects![]` is the "wish does not apply" case; with arguments the
/// effects are folded in the order given.
///
/// # Example
///
/// ```ignore
/// use wishbone::effects;
///
/// fn invoke(&self, wish: Wish, state: &State) -> EffectStream<Effect> {
///     match wish {
///         Wish::Reset if state.counter == 0 => effects![],
///         Wish::Reset => effects![Effect::Cleared, Effect::CounterReset],
///         Wish::Bump => effects![Effect::Bumped],
///     }
/// }
/// ```
#[macro_export]
macro_rules! effects {
    () => {
        $crate::effects::none()
    };
    ($($effect:expr),+ $(,)?) => {
        $crate::effects::iter(::std::vec![$($effect),+])
    };
}
