//! Symmetric banded normal-equation systems.
//!
//! Both halves of the decomposition produce symmetric positive (semi-)definite
//! systems whose non-zeros sit within a few diagonals of the main one, so only
//! the lower band is stored and the system is solved by banded Cholesky in
//! `O(n·kd²)`.

use nalgebra::DVector;
use thiserror::Error;

/// Relative pivot size below which a system is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("banded system is singular at row {row} (pivot {pivot:.3e})")]
pub(crate) struct SingularSystem {
    pub row: usize,
    pub pivot: f64,
}

/// Lower band of a symmetric `n × n` matrix with half-bandwidth `kd`.
#[derive(Debug, Clone)]
pub(crate) struct BandMatrix {
    n: usize,
    kd: usize,
    /// Row-major: entry `(i, j)` with `i − kd ≤ j ≤ i` at `i·(kd+1) + (i − j)`.
    data: Vec<f64>,
}

impl BandMatrix {
    pub fn zeros(n: usize, kd: usize) -> Self {
        Self {
            n,
            kd,
            data: vec![0.0; n * (kd + 1)],
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if j > i { (j, i) } else { (i, j) };
        debug_assert!(i - j <= self.kd, "({i}, {j}) outside band {}", self.kd);
        i * (self.kd + 1) + (i - j)
    }

    #[cfg(test)]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (hi, lo) = if j > i { (j, i) } else { (i, j) };
        if hi - lo > self.kd {
            return 0.0;
        }
        self.data[self.index(i, j)]
    }

    /// Add `value` to the symmetric pair `(i, j)` / `(j, i)`.
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.index(i, j);
        self.data[idx] += value;
    }

    pub fn diag(&self, i: usize) -> f64 {
        self.data[i * (self.kd + 1)]
    }

    pub fn set_diag(&mut self, i: usize, value: f64) {
        self.data[i * (self.kd + 1)] = value;
    }

    /// Sum of the diagonal.
    pub fn trace(&self) -> f64 {
        (0..self.n).map(|i| self.diag(i)).sum()
    }

    /// Add `weight · DᵀD` where `D` is the second-difference operator, the
    /// Tikhonov term that keeps neighbouring unknowns from oscillating.
    ///
    /// With fewer than three unknowns the first difference is used instead.
    pub fn add_second_difference(&mut self, weight: f64) {
        if weight == 0.0 || self.n < 2 {
            return;
        }
        let stencil: &[f64] = if self.n >= 3 {
            &[1.0, -2.0, 1.0]
        } else {
            &[-1.0, 1.0]
        };
        let width = stencil.len();
        for row in 0..=(self.n - width) {
            for a in 0..width {
                for b in 0..=a {
                    self.add(row + a, row + b, weight * stencil[a] * stencil[b]);
                }
            }
        }
    }

    /// Solve `A·x = rhs` by banded Cholesky factorization.
    pub fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, SingularSystem> {
        let n = self.n;
        let kd = self.kd;
        let scale = (0..n).map(|i| self.diag(i).abs()).fold(0.0, f64::max);
        let tolerance = PIVOT_TOLERANCE * scale.max(f64::MIN_POSITIVE);

        // L stored in the same lower-band layout.
        let mut l = self.data.clone();
        let at = |i: usize, j: usize| i * (kd + 1) + (i - j);

        for j in 0..n {
            let start = j.saturating_sub(kd);
            let mut pivot = l[at(j, j)];
            for k in start..j {
                pivot -= l[at(j, k)] * l[at(j, k)];
            }
            if !(pivot > tolerance) {
                return Err(SingularSystem { row: j, pivot });
            }
            let pivot = pivot.sqrt();
            l[at(j, j)] = pivot;

            for i in (j + 1)..(j + kd + 1).min(n) {
                let start = i.saturating_sub(kd);
                let mut value = l[at(i, j)];
                for k in start..j {
                    value -= l[at(i, k)] * l[at(j, k)];
                }
                l[at(i, j)] = value / pivot;
            }
        }

        // Forward substitution: L·y = rhs
        let mut x = rhs.clone();
        for i in 0..n {
            let start = i.saturating_sub(kd);
            let mut value = x[i];
            for k in start..i {
                value -= l[at(i, k)] * x[k];
            }
            x[i] = value / l[at(i, i)];
        }
        // Back substitution: Lᵀ·x = y
        for i in (0..n).rev() {
            let end = (i + kd + 1).min(n);
            let mut value = x[i];
            for k in (i + 1)..end {
                value -= l[at(k, i)] * x[k];
            }
            x[i] = value / l[at(i, i)];
        }
        Ok(x)
    }
}
