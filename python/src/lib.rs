//! Python bindings for slitdec via PyO3.
//!
//! Exposes the slit decomposition to Python as the `slitdecrs` module.

mod helpers;

use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;

use slitdec::{Curvature, DecomposeConfig, Decomposition};

use crate::helpers::{
    curvature_term, matrix_to_numpy, swath_from_numpy, to_py_err, vector_to_numpy,
};

type Arrays<'py> = (
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray2<bool>>,
);

fn arrays<'py>(py: Python<'py>, result: &Decomposition) -> Arrays<'py> {
    (
        vector_to_numpy(py, &result.spectrum),
        vector_to_numpy(py, &result.slit),
        matrix_to_numpy(py, &result.model),
        vector_to_numpy(py, &result.uncertainty),
        matrix_to_numpy(py, &result.mask),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// Straight orders
// ═══════════════════════════════════════════════════════════════════════════

/// Decompose a swath of a column-aligned order into spectrum and slit function.
///
/// Args:
///     img: 2D float array (rows × columns) covering one order.
///     ycen: Order centre per column, in row coordinates of `img`.
///     lambda_sp: Spectrum smoothing. Default 0.
///     lambda_sf: Slit-function smoothing. Default 0.1.
///     osample: Slit-function nodes per pixel. Default 1.
///     mask: Optional boolean array, True = good pixel.
///
/// Returns:
///     (spectrum, slit_function, model, uncertainty, mask) where the returned
///     mask marks the pixels used in the final fit (True = good).
#[pyfunction]
#[pyo3(signature = (img, ycen, lambda_sp = 0.0, lambda_sf = 0.1, osample = 1, mask = None))]
fn slitfunc<'py>(
    py: Python<'py>,
    img: PyReadonlyArray2<f64>,
    ycen: PyReadonlyArray1<f64>,
    lambda_sp: f64,
    lambda_sf: f64,
    osample: usize,
    mask: Option<PyReadonlyArray2<bool>>,
) -> PyResult<Arrays<'py>> {
    let swath = swath_from_numpy(&img, mask.as_ref())?;
    let trace = ycen.as_array().to_vec();
    let config = DecomposeConfig::new(lambda_sp, lambda_sf, osample);

    let result = slitdec::decompose(&swath, &trace, &config).map_err(to_py_err)?;
    Ok(arrays(py, &result))
}

// ═══════════════════════════════════════════════════════════════════════════
// Curved orders
// ═══════════════════════════════════════════════════════════════════════════

/// Decompose a swath of a tilted and/or sheared order.
///
/// Light `y` rows from the trace is displaced by `tilt·y + shear·y²` columns.
///
/// Args:
///     img: 2D float array (rows × columns) covering one order.
///     ycen: Order centre per column, in row coordinates of `img`.
///     tilt: Float or 1D array with one value per column.
///     shear: Float or 1D array with one value per column.
///     lambda_sp: Spectrum smoothing. Default 0.
///     lambda_sf: Slit-function smoothing. Default 0.1.
///     osample: Slit-function nodes per pixel. Default 1.
///     mask: Optional boolean array, True = good pixel.
///
/// Returns:
///     (spectrum, slit_function, model, uncertainty, mask, info) where `info`
///     is [iterations, residual_rms, model_change, status] and status is
///     0 = converged, 1 = iteration cap reached, 2 = degenerate.
#[pyfunction]
#[pyo3(signature = (
    img,
    ycen,
    tilt,
    shear,
    lambda_sp = 0.0,
    lambda_sf = 0.1,
    osample = 1,
    mask = None,
))]
#[allow(clippy::too_many_arguments)]
fn slitfunc_curved<'py>(
    py: Python<'py>,
    img: PyReadonlyArray2<f64>,
    ycen: PyReadonlyArray1<f64>,
    tilt: &Bound<'py, PyAny>,
    shear: &Bound<'py, PyAny>,
    lambda_sp: f64,
    lambda_sf: f64,
    osample: usize,
    mask: Option<PyReadonlyArray2<bool>>,
) -> PyResult<(
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray2<bool>>,
    Bound<'py, PyArray1<f64>>,
)> {
    let swath = swath_from_numpy(&img, mask.as_ref())?;
    let trace = ycen.as_array().to_vec();
    let curvature = Curvature::new(curvature_term(tilt, "tilt")?, curvature_term(shear, "shear")?);
    let config = DecomposeConfig::new(lambda_sp, lambda_sf, osample);

    let result =
        slitdec::decompose_curved(&swath, &trace, &curvature, &config).map_err(to_py_err)?;
    let (sp, sl, model, unc, mask) = arrays(py, &result);
    let info = PyArray1::from_vec(py, result.diagnostics.to_array().to_vec());
    Ok((sp, sl, model, unc, mask, info))
}

// ═══════════════════════════════════════════════════════════════════════════
// Module definition
// ═══════════════════════════════════════════════════════════════════════════

/// slitdecrs: optimal extraction of echelle spectra
///
/// Decomposes a swath around one echelle order into the spectrum and the
/// oversampled slit function.
#[pymodule]
fn slitdecrs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(slitfunc, m)?)?;
    m.add_function(wrap_pyfunction!(slitfunc_curved, m)?)?;
    Ok(())
}
