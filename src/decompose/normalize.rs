//! Turns solver output into the public [`Decomposition`].

use nalgebra::{DMatrix, DVector};

use super::solve::{Breakdown, SolveOutcome};
use super::{DecomposeStatus, Decomposition, Diagnostics};

/// Public accept mask: usable on input and kept by the last solve.
pub(crate) fn accept_mask(usable: &DMatrix<bool>, accepted: &DMatrix<bool>) -> DMatrix<bool> {
    usable.zip_map(accepted, |u, a| u && a)
}

/// Zero the first and last `dx` spectrum entries. Those columns only see part
/// of their light when the order is tilted or sheared.
pub(crate) fn trim_edges(spectrum: &mut DVector<f64>, dx: usize) {
    let n = spectrum.len();
    if dx == 0 {
        return;
    }
    if 2 * dx >= n {
        spectrum.fill(0.0);
        return;
    }
    spectrum.rows_mut(0, dx).fill(0.0);
    spectrum.rows_mut(n - dx, dx).fill(0.0);
}

/// Usable pixels left out of `selection`, plus those the initializer clipped.
fn rejected_count(usable: &DMatrix<bool>, selection: &DMatrix<bool>, clipped: usize) -> usize {
    clipped
        + usable
            .iter()
            .zip(selection.iter())
            .filter(|(&u, &s)| u && !s)
            .count()
}

/// `clipped` counts pixels the initializer already removed from `usable`.
pub(crate) fn from_outcome(
    outcome: SolveOutcome,
    usable: &DMatrix<bool>,
    clipped: usize,
    dx: usize,
) -> Decomposition {
    let mask = accept_mask(usable, &outcome.accepted);
    let rejected_pixels = rejected_count(usable, &mask, clipped);

    let mut spectrum = outcome.spectrum;
    trim_edges(&mut spectrum, dx);

    Decomposition {
        spectrum,
        slit: outcome.slit,
        model: outcome.model,
        uncertainty: outcome.uncertainty,
        mask,
        diagnostics: Diagnostics {
            status: outcome.status,
            iterations: outcome.iterations,
            residual_rms: outcome.residual_rms,
            model_change: outcome.model_change,
            rejected_pixels,
        },
    }
}

/// All-zero result for a swath that cannot be decomposed. The slit function
/// keeps its regular length so callers can stack swaths without special cases.
/// No pixel enters a final fit, so the mask is all `false`; the iteration
/// count and rejections are those reached before the breakdown.
pub(crate) fn degenerate(
    ny: usize,
    usable: &DMatrix<bool>,
    clipped: usize,
    breakdown: &Breakdown,
) -> Decomposition {
    let (nrows, ncols) = usable.shape();
    Decomposition {
        spectrum: DVector::zeros(ncols),
        slit: DVector::zeros(ny),
        model: DMatrix::zeros(nrows, ncols),
        uncertainty: DVector::zeros(ncols),
        mask: DMatrix::from_element(nrows, ncols, false),
        diagnostics: Diagnostics {
            status: DecomposeStatus::Degenerate,
            iterations: breakdown.iterations,
            residual_rms: 0.0,
            model_change: 0.0,
            rejected_pixels: rejected_count(usable, &breakdown.accepted, clipped),
        },
    }
}
