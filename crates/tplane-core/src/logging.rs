#![forbid(unsafe_code)]

//! Log shims.
//!
//! With the `tracing` feature the usual `tracing` macros are re-exported at
//! the crate root. Without it, the event macros expand to nothing and the
//! span macros to a [`NoopSpan`], so render code logs through
//! `tplane_core::debug!` and friends without cfg noise. `tracing-json` adds
//! [`init_json_subscriber`].

#[cfg(feature = "tracing")]
pub use tracing::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};

// Event shims swallow their arguments; span shims hand back a `NoopSpan`.
#[cfg(not(feature = "tracing"))]
mod shims {
    #[macro_export]
    macro_rules! trace { ($($t:tt)*) => {}; }
    #[macro_export]
    macro_rules! debug { ($($t:tt)*) => {}; }
    #[macro_export]
    macro_rules! info { ($($t:tt)*) => {}; }
    #[macro_export]
    macro_rules! warn { ($($t:tt)*) => {}; }
    #[macro_export]
    macro_rules! error { ($($t:tt)*) => {}; }
    #[macro_export]
    macro_rules! debug_span { ($($t:tt)*) => { $crate::logging::NoopSpan }; }
    #[macro_export]
    macro_rules! info_span { ($($t:tt)*) => { $crate::logging::NoopSpan }; }
}

/// What the span shims evaluate to when `tracing` is off.
#[cfg(not(feature = "tracing"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpan;

#[cfg(not(feature = "tracing"))]
impl NoopSpan {
    pub fn enter(&self) -> NoopGuard {
        NoopGuard
    }

    pub fn entered(self) -> NoopGuard {
        NoopGuard
    }
}

#[cfg(not(feature = "tracing"))]
#[derive(Debug)]
pub struct NoopGuard;

/// Install a JSON subscriber honoring `RUST_LOG`.
///
/// Returns `false` when a global subscriber is already installed.
#[cfg(feature = "tracing-json")]
pub fn init_json_subscriber() -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .is_ok()
}
