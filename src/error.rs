//! Error types for `sparse_filter`.
//!
//! Every error here is a caller contract violation detected before a kernel
//! touches any buffer. Out-of-bounds sample offsets are *not* errors; they
//! simply contribute nothing.

use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the kernels and the layer wrapper.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A tensor had the wrong number of dimensions.
    #[error("{name} must be {expected}-dimensional, got shape {got:?}")]
    Rank {
        /// The offending buffer.
        name: &'static str,
        /// Required rank.
        expected: usize,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// A tensor's shape disagrees with the resolved layer geometry.
    #[error("{name} shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// The offending buffer.
        name: &'static str,
        /// Shape implied by the other operands.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// An image batch carries a different channel count than the layer expects.
    #[error("{name} has {got} planes, layer expects {expected}")]
    PlaneMismatch {
        /// The offending buffer.
        name: &'static str,
        /// Plane count required by the layer.
        expected: usize,
        /// Actual plane count.
        got: usize,
    },

    /// A dimension that must be positive was zero.
    #[error("{0} must be positive")]
    ZeroDimension(&'static str),

    /// A layer configuration failed validation.
    #[error("invalid layer configuration: {0}")]
    InvalidConfig(&'static str),
}
