/// Emit a `log` record at trace level, if the `log` feature is enabled.
///
/// Without the feature the invocation expands to nothing. It has to be used
/// in statement position.
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        ::log::trace!(target: "vsalloc", $($arg)*);
    };
}
pub(crate) use trace;

/// Emit a `log` record at debug level, see [`trace!`].
macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        ::log::debug!(target: "vsalloc", $($arg)*);
    };
}
pub(crate) use debug;
