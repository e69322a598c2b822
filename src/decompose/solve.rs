//! Alternating regularized solve for spectrum and slit function.
//!
//! Each iteration:
//! 1. fixes the spectrum and solves the banded slit-function system,
//! 2. normalizes the slit function to sum `osample`,
//! 3. fixes the slit function and solves the banded spectrum system,
//! 4. rebuilds the model and re-selects pixels within `reject_sigma` of it.
//!
//! The loop stops once the model changes by less than `tolerance` (relative)
//! and the pixel selection is stable, or when `max_iterations` is reached.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::band::{BandMatrix, SingularSystem};
use super::projection::{col_range, node_range, Projection};
use super::{DecomposeConfig, DecomposeStatus};
use crate::initializer::InitialEstimate;

/// Residual floor relative to the model peak, so that a noiseless fit does not
/// start rejecting pixels on round-off.
const RESIDUAL_FLOOR: f64 = 1e-10;

/// Why a swath could not be decomposed.
#[derive(Error, Debug, Clone, PartialEq)]
pub(crate) enum Degeneracy {
    #[error("no usable pixels")]
    NoPixels,
    #[error("slit function carries no flux")]
    NoFlux,
    #[error(transparent)]
    Singular(#[from] SingularSystem),
}

/// A solve that stopped on a [`Degeneracy`], with the state it reached.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason} in iteration {iterations}")]
pub(crate) struct Breakdown {
    pub reason: Degeneracy,
    /// Iteration that broke down, 0 if none started.
    pub iterations: usize,
    /// Pixel selection at that point.
    pub accepted: DMatrix<bool>,
}

#[derive(Debug, Clone)]
pub(crate) struct SolveOutcome {
    pub spectrum: DVector<f64>,
    pub slit: DVector<f64>,
    pub model: DMatrix<f64>,
    pub uncertainty: DVector<f64>,
    /// Pixels that entered the last solve.
    pub accepted: DMatrix<bool>,
    pub iterations: usize,
    pub residual_rms: f64,
    pub model_change: f64,
    pub status: DecomposeStatus,
}

pub(crate) fn solve(
    projection: &Projection,
    init: &InitialEstimate,
    config: &DecomposeConfig,
) -> Result<SolveOutcome, Breakdown> {
    let osample = config.oversampling as f64;
    let image = &init.image;

    let mut accepted = init.usable.clone();
    if !accepted.iter().any(|&a| a) {
        return Err(Breakdown {
            reason: Degeneracy::NoPixels,
            iterations: 0,
            accepted,
        });
    }

    let mut spectrum = init.spectrum.clone();
    let mut slit = DVector::zeros(projection.ny());
    let mut model = DMatrix::zeros(image.nrows(), image.ncols());
    let mut weights = DMatrix::zeros(image.nrows(), image.ncols());
    let mut previous: Option<DMatrix<f64>> = None;
    let mut residual_rms = 0.0;
    let mut model_change = f64::INFINITY;
    let mut iterations = 0;
    let mut status = DecomposeStatus::MaxIterations;

    for iteration in 1..=config.max_iterations {
        iterations = iteration;
        weights = init
            .weights
            .zip_map(&accepted, |w, good| if good { w } else { 0.0 });

        let breakdown = |reason: Degeneracy, accepted: &DMatrix<bool>| Breakdown {
            reason,
            iterations: iteration,
            accepted: accepted.clone(),
        };

        slit = solve_slit(projection, image, &weights, &spectrum, config.smoothing_slit)
            .map_err(|e| breakdown(e.into(), &accepted))?;
        let norm = slit.sum() / osample;
        if !norm.is_finite() || norm == 0.0 {
            return Err(breakdown(Degeneracy::NoFlux, &accepted));
        }
        slit /= norm;

        spectrum = solve_spectrum(projection, image, &weights, &slit, config.smoothing_spectrum)
            .map_err(|e| breakdown(e.into(), &accepted))?;
        model = projection.render(&spectrum, &slit);

        residual_rms = rms_residual(image, &model, &accepted);
        model_change = match &previous {
            Some(prev) => relative_change(&model, prev),
            None => f64::INFINITY,
        };

        let limit = config.reject_sigma * residual_rms.max(RESIDUAL_FLOOR * model.amax());
        let selection = DMatrix::from_fn(image.nrows(), image.ncols(), |r, c| {
            init.usable[(r, c)] && (image[(r, c)] - model[(r, c)]).abs() <= limit
        });
        let stable = selection == accepted;

        if iteration >= 2 && stable && model_change < config.tolerance {
            status = DecomposeStatus::Converged;
            break;
        }
        if iteration < config.max_iterations {
            if !selection.iter().any(|&a| a) {
                return Err(breakdown(Degeneracy::NoPixels, &selection));
            }
            accepted = selection;
        }
        previous = Some(model.clone());
    }

    let uncertainty = spectrum_uncertainty(projection, image, &model, &weights, &slit);

    Ok(SolveOutcome {
        spectrum,
        slit,
        model,
        uncertainty,
        accepted,
        iterations,
        residual_rms,
        model_change,
        status,
    })
}

/// Slit-function normal equations for a fixed spectrum.
///
/// The smoothing is scaled by the weighted signal power `Σ w·d²` of the pixels
/// in the fit, per `osample²`. Relative to the data term of a node that
/// carries a fraction `s` of a column's light this is about `smoothing·s`,
/// whatever the flux level or the oversampling.
fn solve_slit(
    projection: &Projection,
    image: &DMatrix<f64>,
    weights: &DMatrix<f64>,
    spectrum: &DVector<f64>,
    smoothing: f64,
) -> Result<DVector<f64>, SingularSystem> {
    let ny = projection.ny();
    let mut a = BandMatrix::zeros(ny, projection.slit_bandwidth());
    let mut b = DVector::zeros(ny);
    let mut design = Vec::new();
    let mut signal = 0.0;

    for c in 0..projection.ncols() {
        for r in 0..projection.nrows() {
            let w = weights[(r, c)];
            let fp = projection.footprints(r, c);
            if w == 0.0 || fp.is_empty() {
                continue;
            }
            let (kmin, kmax) = node_range(fp);
            design.clear();
            design.resize(kmax - kmin + 1, 0.0);
            for f in fp {
                design[f.node - kmin] += f.weight * spectrum[f.col];
            }
            let value = image[(r, c)];
            accumulate(&mut a, &mut b, kmin, &design, w, value);
            signal += w * value * value;
        }
    }

    let os = projection.osample() as f64;
    a.add_second_difference(smoothing * signal / (os * os));
    pin_empty_rows(&mut a, &mut b);
    a.solve(&b)
}

/// Spectrum normal equations for a fixed slit function. Columns without any
/// data come back as zero even when smoothing would fill them in.
fn solve_spectrum(
    projection: &Projection,
    image: &DMatrix<f64>,
    weights: &DMatrix<f64>,
    slit: &DVector<f64>,
    smoothing: f64,
) -> Result<DVector<f64>, SingularSystem> {
    let ncols = projection.ncols();
    let mut a = BandMatrix::zeros(ncols, projection.spectrum_bandwidth());
    let mut b = DVector::zeros(ncols);
    let mut design = Vec::new();

    for c in 0..ncols {
        for r in 0..projection.nrows() {
            let w = weights[(r, c)];
            let fp = projection.footprints(r, c);
            if w == 0.0 || fp.is_empty() {
                continue;
            }
            let (xmin, xmax) = col_range(fp);
            design.clear();
            design.resize(xmax - xmin + 1, 0.0);
            for f in fp {
                design[f.col - xmin] += f.weight * slit[f.node];
            }
            accumulate(&mut a, &mut b, xmin, &design, w, image[(r, c)]);
        }
    }

    let has_data: Vec<bool> = (0..ncols).map(|x| a.diag(x) > 0.0).collect();
    a.add_second_difference(smoothing * a.trace() / ncols as f64);
    pin_empty_rows(&mut a, &mut b);
    let mut spectrum = a.solve(&b)?;
    for (x, &data) in has_data.iter().enumerate() {
        if !data {
            spectrum[x] = 0.0;
        }
    }
    Ok(spectrum)
}

/// Add one weighted pixel equation `Σ design[i]·u[offset+i] = value`.
fn accumulate(
    a: &mut BandMatrix,
    b: &mut DVector<f64>,
    offset: usize,
    design: &[f64],
    weight: f64,
    value: f64,
) {
    for (i, &di) in design.iter().enumerate() {
        if di == 0.0 {
            continue;
        }
        b[offset + i] += weight * value * di;
        for (j, &dj) in design.iter().enumerate().take(i + 1) {
            if dj != 0.0 {
                a.add(offset + i, offset + j, weight * di * dj);
            }
        }
    }
}

/// Unknowns that neither the data nor the smoothing constrain are fixed at zero.
fn pin_empty_rows(a: &mut BandMatrix, b: &mut DVector<f64>) {
    for i in 0..a.size() {
        if a.diag(i) == 0.0 {
            a.set_diag(i, 1.0);
            b[i] = 0.0;
        }
    }
}

fn rms_residual(image: &DMatrix<f64>, model: &DMatrix<f64>, accepted: &DMatrix<bool>) -> f64 {
    let (sum, count) = image
        .iter()
        .zip(model.iter())
        .zip(accepted.iter())
        .filter(|(_, &good)| good)
        .fold((0.0, 0usize), |(s, n), ((&d, &m), _)| (s + (d - m) * (d - m), n + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

fn relative_change(model: &DMatrix<f64>, previous: &DMatrix<f64>) -> f64 {
    let scale = model.norm();
    let delta = (model - previous).norm();
    if scale > 0.0 {
        delta / scale
    } else if delta == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Formal error of each spectrum value from the residuals of the pixels used
/// in the last spectrum solve: `sqrt(Σ w²·C²·res²) / Σ w·C²`.
fn spectrum_uncertainty(
    projection: &Projection,
    image: &DMatrix<f64>,
    model: &DMatrix<f64>,
    weights: &DMatrix<f64>,
    slit: &DVector<f64>,
) -> DVector<f64> {
    let ncols = projection.ncols();
    let mut numerator = DVector::<f64>::zeros(ncols);
    let mut denominator = DVector::<f64>::zeros(ncols);
    let mut design = Vec::new();

    for c in 0..ncols {
        for r in 0..projection.nrows() {
            let w = weights[(r, c)];
            let fp = projection.footprints(r, c);
            if w == 0.0 || fp.is_empty() {
                continue;
            }
            let (xmin, xmax) = col_range(fp);
            design.clear();
            design.resize(xmax - xmin + 1, 0.0);
            for f in fp {
                design[f.col - xmin] += f.weight * slit[f.node];
            }
            let res = image[(r, c)] - model[(r, c)];
            for (i, &d) in design.iter().enumerate() {
                numerator[xmin + i] += (w * d * res).powi(2);
                denominator[xmin + i] += w * d * d;
            }
        }
    }

    numerator.zip_map(&denominator, |num, den| {
        if den > 0.0 {
            num.sqrt() / den
        } else {
            0.0
        }
    })
}
