use crate::brush_error::BrushError;

/// Structural self-checks for mesh tables, arenas, and other mutable state.
///
/// Mutating operations call [`DebugInvariants::debug_assert_invariants`] on
/// their way out, so a bug that corrupts twin symmetry or range tiling fails
/// at the operation that introduced it rather than at some later read.
pub trait DebugInvariants {
    /// Panic on broken invariants in debug builds or when a checking feature
    /// is enabled; free in release builds otherwise.
    fn debug_assert_invariants(&self);
    /// Run the full check unconditionally, returning the first violation.
    fn validate_invariants(&self) -> Result<(), BrushError>;
}

/// Runs a fallible check and panics with context when invariant checking is
/// compiled in.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
