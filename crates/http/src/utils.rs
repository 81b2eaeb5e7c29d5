//! Internal helper macros.

/// Early-returns with the given error when the predicate does not hold.
///
/// Like `assert!`, but produces an `Err` instead of panicking, which keeps
/// validation checks in the codec readable.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error.into());
        }
    };
}

pub(crate) use ensure;
