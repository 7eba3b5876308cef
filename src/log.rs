//! Logging shims.
//!
//! With the `tracing` feature enabled these are the macros of the
//! `tracing` crate. Without it they compile down to nothing, but still
//! type check their format arguments.

#[cfg(feature = "tracing")]
pub(crate) use tracing::debug;
#[cfg(feature = "tracing")]
pub(crate) use tracing::instrument;
#[cfg(feature = "tracing")]
pub(crate) use tracing::trace;
#[cfg(feature = "tracing")]
pub(crate) use tracing::warn;


#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
    ($($args:tt)*) => {{
        if false {
            let _args = format_args!($($args)*);
        }
    }};
}
#[cfg(not(feature = "tracing"))]
pub(crate) use log_debug as debug;

#[cfg(not(feature = "tracing"))]
macro_rules! log_trace {
    ($($args:tt)*) => {{
        if false {
            let _args = format_args!($($args)*);
        }
    }};
}
#[cfg(not(feature = "tracing"))]
pub(crate) use log_trace as trace;

#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
    ($($args:tt)*) => {{
        if false {
            let _args = format_args!($($args)*);
        }
    }};
}
#[cfg(not(feature = "tracing"))]
pub(crate) use log_warn as warn;
