//! Cheap, outlier-resistant starting point for the decomposition.
//!
//! The alternating solver needs a spectrum to start from. Column sums are a
//! good first guess, but a single cosmic-ray hit on a curved order can pull the
//! first slit solve far enough away that the fit never recovers, so the curved
//! path first compares the image against a crude separable model and throws
//! away pixels that sit more than `reject_sigma` standard deviations off.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::curvature::SlitGeometry;
use crate::Swath;

/// Width of the median filter applied to the first spectrum guess on curved orders.
pub(crate) const MEDIAN_WINDOW: usize = 5;

/// Working data handed to the solver.
#[derive(Debug, Clone)]
pub(crate) struct InitialEstimate {
    /// Flux with every unusable pixel set to zero.
    pub image: DMatrix<f64>,
    /// Pixels allowed into the fit.
    pub usable: DMatrix<bool>,
    /// Inverse-variance weight per pixel, zero where unusable.
    pub weights: DMatrix<f64>,
    /// First spectrum guess.
    pub spectrum: DVector<f64>,
    /// Pixels rejected by the sigma clip.
    pub clipped: usize,
}

/// Straight orders: column sums of the masked image.
pub(crate) fn initialize_straight(swath: &Swath) -> InitialEstimate {
    let usable = swath.usable();
    let image = masked_image(swath.image(), &usable);
    let spectrum = column_sums(&image);
    let weights = pixel_weights(swath, &image, &usable);
    InitialEstimate {
        image,
        usable,
        weights,
        spectrum,
        clipped: 0,
    }
}

/// Curved orders: median-filtered column sums and a row-median profile form a
/// trial model; pixels deviating by more than `reject_sigma`·σ are rejected
/// before the spectrum guess is recomputed.
pub(crate) fn initialize_curved(
    swath: &Swath,
    geom: &SlitGeometry,
    reject_sigma: f64,
) -> InitialEstimate {
    let mut usable = swath.usable();
    let mut image = masked_image(swath.image(), &usable);

    let spectrum = median_filter(column_sums(&image).as_slice(), MEDIAN_WINDOW);
    let profile = row_profile(&image, &usable);

    let nrows = image.nrows();
    let ncols = image.ncols();
    let trial = DMatrix::from_fn(nrows, ncols, |r, c| {
        let shift = geom.displacement(c, geom.row_offset(c, r));
        profile[r] * interpolate(&spectrum, c as f64 - shift)
    });

    let residuals: Vec<f64> = (0..ncols)
        .flat_map(|c| (0..nrows).map(move |r| (r, c)))
        .filter(|&rc| usable[rc])
        .map(|rc| trial[rc] - image[rc])
        .collect();
    let sigma = std_dev(&residuals);

    let mut clipped = 0;
    if sigma > 0.0 {
        let limit = reject_sigma * sigma;
        for c in 0..ncols {
            for r in 0..nrows {
                if usable[(r, c)] && (trial[(r, c)] - image[(r, c)]).abs() > limit {
                    usable[(r, c)] = false;
                    image[(r, c)] = 0.0;
                    clipped += 1;
                }
            }
        }
    }
    if clipped > 0 {
        debug!(
            "Initial clip rejected {} of {} pixels (sigma {:.3e})",
            clipped,
            nrows * ncols,
            sigma
        );
    }

    let spectrum = column_sums(&image);
    let weights = pixel_weights(swath, &image, &usable);
    InitialEstimate {
        image,
        usable,
        weights,
        spectrum,
        clipped,
    }
}

fn masked_image(image: &DMatrix<f64>, usable: &DMatrix<bool>) -> DMatrix<f64> {
    image.zip_map(usable, |v, good| if good { v } else { 0.0 })
}

fn column_sums(image: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(image.ncols(), image.column_iter().map(|c| c.sum()))
}

/// Median of the usable pixels of each row, normalized to unit sum.
fn row_profile(image: &DMatrix<f64>, usable: &DMatrix<bool>) -> Vec<f64> {
    let mut profile: Vec<f64> = (0..image.nrows())
        .map(|r| {
            let values: Vec<f64> = (0..image.ncols())
                .filter(|&c| usable[(r, c)])
                .map(|c| image[(r, c)])
                .collect();
            median(values)
        })
        .collect();
    let total: f64 = profile.iter().sum();
    if total > 0.0 {
        profile.iter_mut().for_each(|v| *v /= total);
    }
    profile
}

/// Inverse-variance weights. The variance comes from the swath's own
/// uncertainty when present, otherwise from photon statistics of the flux.
/// A floor of 1 % of the mean variance keeps empty background pixels from
/// dominating the fit.
fn pixel_weights(swath: &Swath, image: &DMatrix<f64>, usable: &DMatrix<bool>) -> DMatrix<f64> {
    let variance = match swath.uncertainty() {
        Some(unc) => unc.map(|u| u * u),
        None => image.map(|v| v.max(0.0)),
    };

    let (sum, count) = variance
        .iter()
        .zip(usable.iter())
        .filter(|(_, &good)| good)
        .fold((0.0, 0usize), |(s, n), (&v, _)| (s + v, n + 1));
    let mean = if count > 0 { sum / count as f64 } else { 0.0 };
    let floor = if mean > 0.0 { 0.01 * mean } else { 1.0 };

    variance.zip_map(usable, |v, good| if good { 1.0 / v.max(floor) } else { 0.0 })
}

/// Median filter with reflecting boundaries (`d c b a | a b c d | d c b a`).
pub(crate) fn median_filter(values: &[f64], window: usize) -> DVector<f64> {
    let n = values.len();
    if n == 0 || window <= 1 {
        return DVector::from_column_slice(values);
    }
    let half = (window / 2) as i64;
    let reflect = |i: i64| -> usize {
        let period = 2 * n as i64;
        let m = i.rem_euclid(period);
        if m < n as i64 {
            m as usize
        } else {
            (period - 1 - m) as usize
        }
    };
    DVector::from_iterator(
        n,
        (0..n as i64).map(|i| {
            let neighbours: Vec<f64> = (i - half..=i + half).map(|j| values[reflect(j)]).collect();
            median(neighbours)
        }),
    )
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    } else {
        values[n / 2]
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Linear interpolation on an integer grid, clamped at both ends.
fn interpolate(values: &DVector<f64>, x: f64) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if x <= 0.0 {
        return values[0];
    }
    if x >= (n - 1) as f64 {
        return values[n - 1];
    }
    let i = x.floor() as usize;
    let t = x - i as f64;
    values[i] * (1.0 - t) + values[i + 1] * t
}
