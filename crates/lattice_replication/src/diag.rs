//! Usage-error reporting.

/// Logs a caller bug at error level.
///
/// With the `strict-asserts` feature in a debug build the error also
/// panics, so misuse is caught in development while production builds
/// degrade to a logged no-op.
macro_rules! usage_error {
    ($($arg:tt)+) => {{
        tracing::error!($($arg)+);
        debug_assert!(!cfg!(feature = "strict-asserts"), "replication usage error");
    }};
}

pub(crate) use usage_error;
