//! Sparse projection from (spectrum column, slit node) pairs to image pixels.
//!
//! Every pixel value of the forward model is a short sum
//! `Σ weight · spectrum[col] · slit[node]`. The footprints of each pixel are
//! built once per call from the swath geometry and reused by both linear
//! systems and by the model reconstruction.

use nalgebra::{DMatrix, DVector};

use crate::curvature::SlitGeometry;

/// Node/pixel overlaps below this many nodes are round-off on a shared edge.
const MIN_OVERLAP: f64 = 1e-9;

/// One (column, node) contribution to a pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Footprint {
    /// Spectrum column the light comes from.
    pub col: usize,
    /// Slit-grid node.
    pub node: usize,
    /// Fraction of the node's light falling in the pixel, in pixel units.
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Projection {
    nrows: usize,
    ncols: usize,
    ny: usize,
    osample: usize,
    /// Footprints per pixel, column-major to match `DMatrix` storage.
    pixels: Vec<Vec<Footprint>>,
    slit_bandwidth: usize,
    spectrum_bandwidth: usize,
}

impl Projection {
    pub fn build(geom: &SlitGeometry) -> Self {
        let nrows = geom.nrows;
        let ncols = geom.ncols;
        let ny = geom.ny();
        let os = geom.osample as f64;
        let mut pixels: Vec<Vec<Footprint>> = vec![Vec::new(); nrows * ncols];

        for x in 0..ncols {
            for k in 0..ny {
                let (cell_lo, cell_hi) = geom.node_cell(k);

                let target = x as f64 + geom.displacement(x, geom.node_offset(k));
                let c0 = target.floor();
                let g = target - c0;
                let spread = [(c0 as i64, 1.0 - g), (c0 as i64 + 1, g)];

                // Rows whose span [lo, lo + os) can intersect the cell.
                let (base, _) = geom.pixel_span(x, 0);
                let r_first = ((cell_lo - base) / os).floor().max(0.0) as usize;
                let r_last = ((cell_hi - base) / os).floor();
                if r_last < 0.0 {
                    continue;
                }
                let r_last = (r_last as usize).min(nrows.saturating_sub(1));

                for r in r_first..=r_last {
                    let (pix_lo, pix_hi) = geom.pixel_span(x, r);
                    let overlap = cell_hi.min(pix_hi) - cell_lo.max(pix_lo);
                    if overlap <= MIN_OVERLAP {
                        continue;
                    }
                    let weight = overlap / os;
                    for &(c, wc) in &spread {
                        if wc <= 0.0 || c < 0 || c >= ncols as i64 {
                            continue;
                        }
                        pixels[c as usize * nrows + r].push(Footprint {
                            col: x,
                            node: k,
                            weight: weight * wc,
                        });
                    }
                }
            }
        }

        let mut slit_bandwidth = 2;
        let mut spectrum_bandwidth = 2;
        for fp in pixels.iter().filter(|fp| !fp.is_empty()) {
            let (kmin, kmax) = node_range(fp);
            let (xmin, xmax) = col_range(fp);
            slit_bandwidth = slit_bandwidth.max(kmax - kmin);
            spectrum_bandwidth = spectrum_bandwidth.max(xmax - xmin);
        }

        Self {
            nrows,
            ncols,
            ny,
            osample: geom.osample,
            pixels,
            slit_bandwidth,
            spectrum_bandwidth,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn osample(&self) -> usize {
        self.osample
    }

    pub fn slit_bandwidth(&self) -> usize {
        self.slit_bandwidth
    }

    pub fn spectrum_bandwidth(&self) -> usize {
        self.spectrum_bandwidth
    }

    pub fn footprints(&self, row: usize, col: usize) -> &[Footprint] {
        &self.pixels[col * self.nrows + row]
    }

    /// Reconstruct the image from a spectrum and a slit function.
    pub fn render(&self, spectrum: &DVector<f64>, slit: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.nrows, self.ncols, |r, c| {
            self.footprints(r, c)
                .iter()
                .map(|f| f.weight * spectrum[f.col] * slit[f.node])
                .sum()
        })
    }
}

pub(crate) fn node_range(fp: &[Footprint]) -> (usize, usize) {
    fp.iter()
        .fold((usize::MAX, 0), |(lo, hi), f| (lo.min(f.node), hi.max(f.node)))
}

pub(crate) fn col_range(fp: &[Footprint]) -> (usize, usize) {
    fp.iter()
        .fold((usize::MAX, 0), |(lo, hi), f| (lo.min(f.col), hi.max(f.col)))
}
