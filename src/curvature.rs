//! Swath geometry: trace offsets, slit tilt/shear and the oversampled slit grid.
//!
//! The slit function lives on a grid of `ny = osample·(nrows+1)+1` nodes spaced
//! `1/osample` pixel apart. Grid coordinates `u` are measured in nodes; node `k`
//! owns the cell `[k, k+1]`. For source column `x` the centre of pixel row `t`
//! sits at
//!
//! ```text
//! u = (t + 1.5 − row_shift[x] − frac[x]) · osample + phase
//! ```
//!
//! so the trace of every column falls on the same grid position and any
//! fractional offset fits inside the `nrows+1` pixels the grid spans. `phase`
//! is the sub-node part of `frac[0]·osample`: the pixel edges of the first
//! column, and of every column sharing its fractional offset, fall on node
//! boundaries. Elsewhere the end nodes of a pixel are only partly covered.
//!
//! On curved orders the light of node `k` in column `x` does not land in column
//! `x` but at `x + tilt[x]·y + shear[x]·y²`, where `y` is the node's row
//! displacement from the trace.

use crate::DecomposeError;

/// One curvature coefficient, either shared by every column or given per column.
#[derive(Debug, Clone, PartialEq)]
pub enum CurvatureTerm {
    /// Same value for all columns.
    Constant(f64),
    /// One value per swath column.
    PerColumn(Vec<f64>),
}

impl Default for CurvatureTerm {
    fn default() -> Self {
        CurvatureTerm::Constant(0.0)
    }
}

impl From<f64> for CurvatureTerm {
    fn from(value: f64) -> Self {
        CurvatureTerm::Constant(value)
    }
}

impl From<Vec<f64>> for CurvatureTerm {
    fn from(values: Vec<f64>) -> Self {
        CurvatureTerm::PerColumn(values)
    }
}

impl From<&[f64]> for CurvatureTerm {
    fn from(values: &[f64]) -> Self {
        CurvatureTerm::PerColumn(values.to_vec())
    }
}

impl CurvatureTerm {
    /// Broadcast to `ncols` values, checking length and finiteness.
    pub fn resolve(&self, name: &'static str, ncols: usize) -> Result<Vec<f64>, DecomposeError> {
        let values = match self {
            CurvatureTerm::Constant(v) => vec![*v; ncols],
            CurvatureTerm::PerColumn(v) => {
                if v.len() != ncols {
                    return Err(DecomposeError::CurvatureLength {
                        name,
                        ncols,
                        got: v.len(),
                    });
                }
                v.clone()
            }
        };
        check_finite(name, &values)?;
        Ok(values)
    }
}

/// Slit tilt and shear of an order across a swath.
///
/// A pixel `y` rows away from the trace is displaced horizontally by
/// `tilt·y + shear·y²` columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curvature {
    pub tilt: CurvatureTerm,
    pub shear: CurvatureTerm,
}

impl Curvature {
    pub fn new(tilt: impl Into<CurvatureTerm>, shear: impl Into<CurvatureTerm>) -> Self {
        Self {
            tilt: tilt.into(),
            shear: shear.into(),
        }
    }
}

/// Geometry resolved for one swath, shared by the initializer and the solver.
#[derive(Debug, Clone)]
pub struct SlitGeometry {
    pub nrows: usize,
    pub ncols: usize,
    pub osample: usize,
    /// Fractional part of the trace per column, in `[0, 1)`.
    pub frac: Vec<f64>,
    /// Integer trace offset minus the smallest offset in the swath.
    pub row_shift: Vec<usize>,
    /// Smallest integer trace offset in the swath.
    pub y_lower_lim: i64,
    pub tilt: Vec<f64>,
    pub shear: Vec<f64>,
    /// Maximum horizontal displacement over the swath, rounded up.
    pub dx: usize,
    /// Sub-node offset of the grid, in `[0, 1)` nodes.
    pub phase: f64,
}

impl SlitGeometry {
    /// Geometry for column-aligned orders: only the sub-pixel part of the trace
    /// matters and nothing is displaced horizontally.
    pub fn straight(trace: &[f64], nrows: usize, osample: usize) -> Result<Self, DecomposeError> {
        let ncols = trace.len();
        check_finite("trace", trace)?;
        let frac: Vec<f64> = trace.iter().map(|&y| y - y.floor()).collect();
        Ok(Self {
            nrows,
            ncols,
            osample,
            phase: grid_phase(&frac, osample),
            frac,
            row_shift: vec![0; ncols],
            y_lower_lim: 0,
            tilt: vec![0.0; ncols],
            shear: vec![0.0; ncols],
            dx: 0,
        })
    }

    /// Geometry for tilted/sheared orders.
    pub fn curved(
        trace: &[f64],
        curvature: &Curvature,
        nrows: usize,
        osample: usize,
    ) -> Result<Self, DecomposeError> {
        let ncols = trace.len();
        check_finite("trace", trace)?;
        let tilt = curvature.tilt.resolve("tilt", ncols)?;
        let shear = curvature.shear.resolve("shear", ncols)?;

        let offset: Vec<i64> = trace.iter().map(|&y| y.floor() as i64).collect();
        let frac: Vec<f64> = trace
            .iter()
            .zip(&offset)
            .map(|(&y, &o)| y - o as f64)
            .collect();
        let y_lower_lim = offset.iter().copied().min().unwrap_or(0);
        let row_shift = offset.iter().map(|&o| (o - y_lower_lim) as usize).collect();

        // Integer row displacements from the trace covered by the patch.
        let lo = -y_lower_lim;
        let hi = nrows as i64 - y_lower_lim;
        let mut max_shift = 0.0_f64;
        for (&t, &s) in tilt.iter().zip(&shear) {
            for y in lo..=hi {
                let y = y as f64;
                max_shift = max_shift.max((t * y + s * y * y).abs());
            }
        }

        Ok(Self {
            nrows,
            ncols,
            osample,
            phase: grid_phase(&frac, osample),
            frac,
            row_shift,
            y_lower_lim,
            tilt,
            shear,
            dx: max_shift.ceil() as usize,
        })
    }

    /// Number of slit-grid nodes.
    pub fn ny(&self) -> usize {
        self.osample * (self.nrows + 1) + 1
    }

    /// Row displacement of the centre of node `k` from the trace, in pixels.
    pub fn node_offset(&self, k: usize) -> f64 {
        (k as f64 + 0.5 - self.phase) / self.osample as f64 - 1.5 - self.y_lower_lim as f64
    }

    /// Extent of node `k` on the slit grid.
    pub fn node_cell(&self, k: usize) -> (f64, f64) {
        (k as f64, k as f64 + 1.0)
    }

    /// Horizontal displacement (columns) of light `y` rows away from the trace
    /// of column `col`.
    pub fn displacement(&self, col: usize, y: f64) -> f64 {
        self.tilt[col] * y + self.shear[col] * y * y
    }

    /// Extent of pixel row `row` of source column `col` on the slit grid.
    pub fn pixel_span(&self, col: usize, row: usize) -> (f64, f64) {
        let os = self.osample as f64;
        let start = row as f64 + 1.0 - self.row_shift[col] as f64 - self.frac[col];
        let lo = start * os + self.phase;
        (lo, lo + os)
    }

    /// Row displacement of the centre of pixel `row` from the trace of `col`.
    pub fn row_offset(&self, col: usize, row: usize) -> f64 {
        row as f64 - self.y_lower_lim as f64 - self.row_shift[col] as f64 - self.frac[col]
    }
}

fn grid_phase(frac: &[f64], osample: usize) -> f64 {
    frac.first().map_or(0.0, |&f| {
        let u = f * osample as f64;
        u - u.floor()
    })
}

fn check_finite(name: &'static str, values: &[f64]) -> Result<(), DecomposeError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(column) => Err(DecomposeError::NonFinite { name, column }),
        None => Ok(()),
    }
}
