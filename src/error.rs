//! Validation errors for the decomposition entry points.
//!
//! Only caller mistakes are errors. A swath that cannot be solved (everything
//! masked, singular banded system) or that runs out of iterations still returns
//! a [`Decomposition`](crate::Decomposition); its
//! [`DecomposeStatus`](crate::DecomposeStatus) tells the caller what happened.

use thiserror::Error;

/// Input that the decomposition refuses to work with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecomposeError {
    /// The swath has no rows or no columns.
    #[error("swath must have at least one row and one column, got {nrows}x{ncols}")]
    EmptySwath { nrows: usize, ncols: usize },

    /// Flat pixel data whose length is not `nrows·ncols`.
    #[error("expected {nrows}x{ncols} = {} pixels, got {got}", .nrows * .ncols)]
    PixelCount {
        nrows: usize,
        ncols: usize,
        got: usize,
    },

    /// Mask shape does not match the image shape.
    #[error("mask shape {mask:?} does not match image shape {image:?}")]
    MaskShape {
        image: (usize, usize),
        mask: (usize, usize),
    },

    /// Pixel uncertainty shape does not match the image shape.
    #[error("uncertainty shape {uncertainty:?} does not match image shape {image:?}")]
    UncertaintyShape {
        image: (usize, usize),
        uncertainty: (usize, usize),
    },

    /// Center trace length differs from the number of swath columns.
    #[error("center trace has {got} values but the swath has {ncols} columns")]
    TraceLength { ncols: usize, got: usize },

    /// A per-column curvature term has the wrong length.
    #[error("{name} has {got} values but the swath has {ncols} columns")]
    CurvatureLength {
        name: &'static str,
        ncols: usize,
        got: usize,
    },

    /// Trace, tilt or shear contains NaN or infinity.
    #[error("{name} contains a non-finite value at column {column}")]
    NonFinite { name: &'static str, column: usize },

    /// Oversampling factor below one.
    #[error("oversampling must be at least 1, got {0}")]
    Oversampling(usize),

    /// Negative or non-finite smoothing weight.
    #[error("{name} smoothing must be finite and non-negative, got {value}")]
    NegativeSmoothing { name: &'static str, value: f64 },

    /// Iteration cap of zero.
    #[error("max_iterations must be at least 1")]
    InvalidIterations,

    /// Convergence tolerance that is not a positive finite number.
    #[error("tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),

    /// Outlier rejection threshold that is not a positive finite number.
    #[error("reject_sigma must be positive and finite, got {0}")]
    InvalidRejectSigma(f64),
}
