#![forbid(unsafe_code)]

//! Shared vocabulary for the plane renderer: cell geometry, text attribute
//! flags, the terminal capability descriptor, and the log shims.

pub mod geometry;
pub mod logging;
pub mod style;
pub mod terminal_capabilities;

// Without the feature the shims are `#[macro_export]`ed and already live here.
#[cfg(feature = "tracing")]
pub use logging::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};
