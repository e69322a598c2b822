//! A swath: the pixel patch covering one order segment.
//!
//! The flux, the accept-mask and the optional per-pixel uncertainty travel
//! together so that validity is never implied by sentinel values. The mask uses
//! one polarity everywhere in this crate: `true` means the pixel is good.

use nalgebra::DMatrix;

use crate::DecomposeError;

#[derive(Debug, Clone, PartialEq)]
pub struct Swath {
    /// Flux, rows (cross-dispersion) × columns (dispersion).
    image: DMatrix<f64>,
    /// `true` where the pixel may be used.
    mask: DMatrix<bool>,
    /// Optional 1-sigma uncertainty per pixel. When absent, the initializer
    /// derives a Poisson-like estimate from the flux.
    uncertainty: Option<DMatrix<f64>>,
}

impl Swath {
    /// Wrap an image with every pixel marked good.
    ///
    /// Non-finite pixels are still rejected during the decomposition.
    pub fn new(image: DMatrix<f64>) -> Self {
        let mask = DMatrix::from_element(image.nrows(), image.ncols(), true);
        Self {
            image,
            mask,
            uncertainty: None,
        }
    }

    /// Wrap an image together with an accept-mask of the same shape.
    pub fn with_mask(image: DMatrix<f64>, mask: DMatrix<bool>) -> Result<Self, DecomposeError> {
        if mask.shape() != image.shape() {
            return Err(DecomposeError::MaskShape {
                image: image.shape(),
                mask: mask.shape(),
            });
        }
        Ok(Self {
            image,
            mask,
            uncertainty: None,
        })
    }

    /// Build a swath from row-major pixel data, e.g. a slice cut out of a
    /// larger frame by the caller.
    pub fn from_row_major(pixels: &[f64], nrows: usize, ncols: usize) -> Result<Self, DecomposeError> {
        if nrows == 0 || ncols == 0 {
            return Err(DecomposeError::EmptySwath { nrows, ncols });
        }
        if pixels.len() != nrows * ncols {
            return Err(DecomposeError::PixelCount {
                nrows,
                ncols,
                got: pixels.len(),
            });
        }
        Ok(Self::new(DMatrix::from_row_slice(nrows, ncols, pixels)))
    }

    /// Attach a per-pixel uncertainty of the same shape as the image.
    pub fn with_uncertainty(mut self, uncertainty: DMatrix<f64>) -> Result<Self, DecomposeError> {
        if uncertainty.shape() != self.image.shape() {
            return Err(DecomposeError::UncertaintyShape {
                image: self.image.shape(),
                uncertainty: uncertainty.shape(),
            });
        }
        self.uncertainty = Some(uncertainty);
        Ok(self)
    }

    /// Mark a single pixel as bad.
    pub fn reject(&mut self, row: usize, col: usize) {
        self.mask[(row, col)] = false;
    }

    pub fn image(&self) -> &DMatrix<f64> {
        &self.image
    }

    pub fn mask(&self) -> &DMatrix<bool> {
        &self.mask
    }

    pub fn uncertainty(&self) -> Option<&DMatrix<f64>> {
        self.uncertainty.as_ref()
    }

    pub fn nrows(&self) -> usize {
        self.image.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.image.ncols()
    }

    /// Pixels that can enter the fit: good in the mask, finite flux, and, if an
    /// uncertainty is attached, a finite non-negative uncertainty.
    pub(crate) fn usable(&self) -> DMatrix<bool> {
        DMatrix::from_fn(self.nrows(), self.ncols(), |r, c| {
            let value_ok = self.image[(r, c)].is_finite();
            let unc_ok = self
                .uncertainty
                .as_ref()
                .map_or(true, |u| u[(r, c)].is_finite() && u[(r, c)] >= 0.0);
            self.mask[(r, c)] && value_ok && unc_ok
        })
    }

    pub(crate) fn check_not_empty(&self) -> Result<(), DecomposeError> {
        if self.nrows() == 0 || self.ncols() == 0 {
            return Err(DecomposeError::EmptySwath {
                nrows: self.nrows(),
                ncols: self.ncols(),
            });
        }
        Ok(())
    }
}
