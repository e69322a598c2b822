//! Slit decomposition of a single swath.
//!
//! The swath is modelled as the outer product of a spectrum (one value per
//! column) and an oversampled slit function (the cross-dispersion profile),
//! projected onto the pixel grid through the trace offsets and, on curved
//! orders, the slit tilt and shear. The two factors are found by alternating
//! regularized weighted least squares:
//!
//! 1. **Geometry**: resolve trace offsets, curvature and edge padding
//!    ([`SlitGeometry`]).
//! 2. **Initialization**: column sums give the first spectrum; curved orders
//!    are sigma-clipped against a crude separable model first.
//! 3. **Solve**: banded slit and spectrum systems in turn, with iterative
//!    outlier rejection, until the model stops changing.
//! 4. **Normalize**: slit function sums to `oversampling`, curved edges are
//!    zeroed, masks are combined.
//!
//! Degenerate swaths (nothing usable, no flux, singular systems) are not
//! errors: they return an all-zero [`Decomposition`] with
//! [`DecomposeStatus::Degenerate`].

pub(crate) mod band;
pub(crate) mod normalize;
pub(crate) mod projection;
pub(crate) mod solve;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::curvature::{Curvature, SlitGeometry};
use crate::initializer::{initialize_curved, initialize_straight, InitialEstimate};
use crate::{DecomposeError, Swath};

use projection::Projection;

// ── Status codes ────────────────────────────────────────────────────────────

/// Outcome of a decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecomposeStatus {
    /// Model change fell below the tolerance with a stable pixel selection.
    Converged,
    /// The iteration cap was reached first. The result is still usable.
    MaxIterations,
    /// Nothing could be solved; every output is zero.
    Degenerate,
}

impl DecomposeStatus {
    /// Numeric code used in [`Diagnostics::to_array`].
    pub fn code(&self) -> u8 {
        match self {
            DecomposeStatus::Converged => 0,
            DecomposeStatus::MaxIterations => 1,
            DecomposeStatus::Degenerate => 2,
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Parameters controlling a decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposeConfig {
    /// Smoothing of the spectrum, relative to the mean diagonal of its normal
    /// equations. Default 0.0.
    pub smoothing_spectrum: f64,
    /// Smoothing of the slit function, relative to the weighted signal power
    /// of the fitted pixels per `oversampling²`. Default 0.1.
    pub smoothing_slit: f64,
    /// Slit-function nodes per pixel. Default 1.
    pub oversampling: usize,
    /// Upper bound on alternating iterations. Default 20.
    pub max_iterations: usize,
    /// Relative model change below which the fit has converged. Default 1e-4.
    pub tolerance: f64,
    /// Outlier threshold in units of the residual RMS, used both by the
    /// initial clip and during iteration. Default 6.0.
    pub reject_sigma: f64,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self {
            smoothing_spectrum: 0.0,
            smoothing_slit: 0.1,
            oversampling: 1,
            max_iterations: 20,
            tolerance: 1e-4,
            reject_sigma: 6.0,
        }
    }
}

impl DecomposeConfig {
    /// Create a configuration with the given smoothing weights and oversampling.
    pub fn new(smoothing_spectrum: f64, smoothing_slit: f64, oversampling: usize) -> Self {
        Self {
            smoothing_spectrum,
            smoothing_slit,
            oversampling,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DecomposeError> {
        if self.oversampling < 1 {
            return Err(DecomposeError::Oversampling(self.oversampling));
        }
        for (name, value) in [
            ("spectrum", self.smoothing_spectrum),
            ("slit", self.smoothing_slit),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DecomposeError::NegativeSmoothing { name, value });
            }
        }
        if self.max_iterations == 0 {
            return Err(DecomposeError::InvalidIterations);
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(DecomposeError::InvalidTolerance(self.tolerance));
        }
        if !(self.reject_sigma.is_finite() && self.reject_sigma > 0.0) {
            return Err(DecomposeError::InvalidRejectSigma(self.reject_sigma));
        }
        Ok(())
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// How the solve went.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub status: DecomposeStatus,
    /// Alternating iterations performed.
    pub iterations: usize,
    /// RMS residual over the pixels used in the last iteration.
    pub residual_rms: f64,
    /// Relative model change of the last iteration (infinite after one).
    pub model_change: f64,
    /// Usable input pixels excluded from the final fit, by the initial clip
    /// or by iterative rejection.
    pub rejected_pixels: usize,
}

impl Diagnostics {
    /// Fixed-layout summary: `[iterations, residual_rms, model_change, status_code]`.
    pub fn to_array(&self) -> [f64; 4] {
        [
            self.iterations as f64,
            self.residual_rms,
            self.model_change,
            self.status.code() as f64,
        ]
    }
}

/// Spectrum, slit function and model of one swath.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Extracted flux per column.
    pub spectrum: DVector<f64>,
    /// Oversampled slit function, `oversampling·(nrows+1)+1` nodes summing to
    /// `oversampling`.
    pub slit: DVector<f64>,
    /// Reconstructed swath.
    pub model: DMatrix<f64>,
    /// Formal 1-sigma uncertainty per column.
    pub uncertainty: DVector<f64>,
    /// Pixels used in the final fit (`true` = good).
    pub mask: DMatrix<bool>,
    pub diagnostics: Diagnostics,
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Decompose a swath whose order runs along the columns.
///
/// Only the fractional part of `trace` matters; the slit function is placed
/// relative to it. `trace` must have one entry per swath column.
///
/// # Example
///
/// ```
/// use nalgebra::DMatrix;
/// use slitdec::{decompose, DecomposeConfig, Swath};
///
/// let image = DMatrix::from_fn(9, 30, |r, _| {
///     let y = r as f64 - 4.3;
///     1000.0 * (-0.5 * y * y).exp()
/// });
/// let trace = vec![4.3; 30];
/// let result = decompose(&Swath::new(image), &trace, &DecomposeConfig::default()).unwrap();
/// assert_eq!(result.spectrum.len(), 30);
/// assert_eq!(result.slit.len(), 9 + 1 + 1);
/// ```
pub fn decompose(
    swath: &Swath,
    trace: &[f64],
    config: &DecomposeConfig,
) -> Result<Decomposition, DecomposeError> {
    check_inputs(swath, trace, config)?;
    let geom = SlitGeometry::straight(trace, swath.nrows(), config.oversampling)?;
    let init = initialize_straight(swath);
    Ok(run(&geom, &init, config))
}

/// Decompose a swath whose order is tilted and/or sheared.
///
/// Light `y` rows from the trace is displaced horizontally by
/// `tilt·y + shear·y²` columns. The first and last `dx` spectrum entries,
/// where `dx` is the largest displacement over the swath rounded up, only see
/// part of their light and are returned as zero.
pub fn decompose_curved(
    swath: &Swath,
    trace: &[f64],
    curvature: &Curvature,
    config: &DecomposeConfig,
) -> Result<Decomposition, DecomposeError> {
    check_inputs(swath, trace, config)?;
    let geom = SlitGeometry::curved(trace, curvature, swath.nrows(), config.oversampling)?;
    let init = initialize_curved(swath, &geom, config.reject_sigma);
    Ok(run(&geom, &init, config))
}

fn check_inputs(
    swath: &Swath,
    trace: &[f64],
    config: &DecomposeConfig,
) -> Result<(), DecomposeError> {
    swath.check_not_empty()?;
    config.validate()?;
    if trace.len() != swath.ncols() {
        return Err(DecomposeError::TraceLength {
            ncols: swath.ncols(),
            got: trace.len(),
        });
    }
    Ok(())
}

fn run(geom: &SlitGeometry, init: &InitialEstimate, config: &DecomposeConfig) -> Decomposition {
    let projection = Projection::build(geom);

    match solve::solve(&projection, init, config) {
        Ok(outcome) => {
            let result = normalize::from_outcome(outcome, &init.usable, init.clipped, geom.dx);
            let d = &result.diagnostics;
            debug!(
                "Decomposed {}x{} swath (osample {}, dx {}): {:?} after {} iterations, rms {:.3e}, {} pixels rejected",
                geom.nrows,
                geom.ncols,
                geom.osample,
                geom.dx,
                d.status,
                d.iterations,
                d.residual_rms,
                d.rejected_pixels
            );
            result
        }
        Err(breakdown) => {
            debug!(
                "Degenerate {}x{} swath: {}",
                geom.nrows, geom.ncols, breakdown
            );
            normalize::degenerate(geom.ny(), &init.usable, init.clipped, &breakdown)
        }
    }
}
