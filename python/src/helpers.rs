use nalgebra::{DMatrix, DVector, Scalar};
use numpy::ndarray;
use numpy::{Element, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;

use slitdec::{CurvatureTerm, DecomposeError, Swath};

/// Validation failures surface as `ValueError`.
pub(crate) fn to_py_err(err: DecomposeError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(err.to_string())
}

/// Build a swath from a 2D image and an optional boolean mask (`True` = good).
pub(crate) fn swath_from_numpy(
    img: &PyReadonlyArray2<f64>,
    mask: Option<&PyReadonlyArray2<bool>>,
) -> PyResult<Swath> {
    let a = img.as_array();
    let (nrows, ncols) = (a.shape()[0], a.shape()[1]);
    let image = DMatrix::from_fn(nrows, ncols, |r, c| a[[r, c]]);

    match mask {
        None => Ok(Swath::new(image)),
        Some(mask) => {
            let m = mask.as_array();
            if m.shape() != a.shape() {
                return Err(pyo3::exceptions::PyValueError::new_err(format!(
                    "mask shape {:?} does not match image shape {:?}",
                    m.shape(),
                    a.shape()
                )));
            }
            let mask = DMatrix::from_fn(nrows, ncols, |r, c| m[[r, c]]);
            Swath::with_mask(image, mask).map_err(to_py_err)
        }
    }
}

/// Accept a float (same for every column) or a 1D array (one per column).
pub(crate) fn curvature_term(value: &Bound<'_, PyAny>, name: &str) -> PyResult<CurvatureTerm> {
    if let Ok(v) = value.extract::<f64>() {
        Ok(CurvatureTerm::Constant(v))
    } else if let Ok(arr) = value.extract::<PyReadonlyArray1<f64>>() {
        Ok(CurvatureTerm::PerColumn(arr.as_array().to_vec()))
    } else {
        Err(pyo3::exceptions::PyTypeError::new_err(format!(
            "{} must be a float or a 1D float array",
            name
        )))
    }
}

pub(crate) fn vector_to_numpy<'py>(py: Python<'py>, v: &DVector<f64>) -> Bound<'py, PyArray1<f64>> {
    PyArray1::from_vec(py, v.as_slice().to_vec())
}

pub(crate) fn matrix_to_numpy<'py, T>(py: Python<'py>, m: &DMatrix<T>) -> Bound<'py, PyArray2<T>>
where
    T: Element + Scalar + Copy,
{
    let arr = ndarray::Array2::from_shape_fn((m.nrows(), m.ncols()), |(r, c)| m[(r, c)]);
    PyArray2::from_owned_array(py, arr)
}
