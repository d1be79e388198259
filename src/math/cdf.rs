//! Tabulated cumulative distribution over a 1-D grid.
//!
//! The table is built once from the density sampled at every cell's two edges
//! and its center (the same points the integration grid evaluates). Per cell we
//! keep the forward difference `d1 = f_hi - f_lo` and the second difference
//! `d2 = f_lo - 2 f_mid + f_hi` of those samples. The quadratic through the
//! three samples gives the cell mass and the mass of its first half, and the
//! in-cell cumulative is then represented as
//!
//! ```text
//! G(t) = A t + B t²,   t = (x - x_i) / h ∈ [0, 1]
//! ```
//!
//! with `G(1/2)` and `G(1)` matching the two masses. `cdf` evaluates `G`
//! directly and `inverse_cdf` solves the same quadratic, so the two queries
//! agree to rounding.

use crate::error::{FitError, Result};

/// Per-cell coefficients of the tabulated cumulative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdfCell {
    /// Forward difference of the density across the cell.
    pub d1: f64,
    /// Second difference of the density (edge, center, edge).
    pub d2: f64,
    /// Linear coefficient of the normalized in-cell cumulative.
    pub a: f64,
    /// Quadratic coefficient of the normalized in-cell cumulative.
    pub b: f64,
}

#[derive(Debug, Clone)]
pub struct CdfTable {
    lo: f64,
    hi: f64,
    width: f64,
    /// Normalized cumulative at every cell's lower edge, plus 1.0 at the end.
    cum: Vec<f64>,
    cells: Vec<CdfCell>,
    /// Integral of the density before normalization.
    total: f64,
}

impl CdfTable {
    /// Build from density samples on `n` equal cells over `[lo, hi]`.
    ///
    /// `edges` holds `n + 1` samples at the cell edges, `centers` holds `n`
    /// samples at the cell centers. Negative samples are treated as zero.
    pub fn build(lo: f64, hi: f64, edges: &[f64], centers: &[f64]) -> Result<Self> {
        let n = centers.len();
        if n == 0 || edges.len() != n + 1 {
            return Err(FitError::InvalidDataset(format!(
                "CDF table needs n+1 edge samples for n cells (got {} and {})",
                edges.len(),
                n
            )));
        }
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(FitError::InvalidBound { lo, hi });
        }

        let width = (hi - lo) / n as f64;
        let clean = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };

        let mut masses = Vec::with_capacity(n);
        let mut cells = Vec::with_capacity(n);
        for i in 0..n {
            let f_lo = clean(edges[i]);
            let f_mid = clean(centers[i]);
            let f_hi = clean(edges[i + 1]);
            let d1 = f_hi - f_lo;
            let d2 = f_lo - 2.0 * f_mid + f_hi;

            // Quadratic p(t) = f_lo + (d1 - 2 d2) t + 2 d2 t² through the samples.
            let lin = d1 - 2.0 * d2;
            let quad = 2.0 * d2;
            let mass = (f_lo + lin / 2.0 + quad / 3.0).max(0.0);
            let half = (f_lo / 2.0 + lin / 8.0 + quad / 24.0).clamp(0.0, mass);

            let mut b = 2.0 * mass - 4.0 * half;
            let mut a = mass - b;
            if a < 0.0 || a + 2.0 * b < 0.0 {
                // The quadratic would not be monotone; fall back to linear.
                a = mass;
                b = 0.0;
            }
            masses.push(mass * width);
            cells.push(CdfCell {
                d1,
                d2,
                a: a * width,
                b: b * width,
            });
        }

        let total: f64 = masses.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(FitError::AllZeroDensity);
        }

        let mut cum = Vec::with_capacity(n + 1);
        let mut acc = 0.0;
        cum.push(0.0);
        for m in &masses {
            acc += m / total;
            cum.push(acc);
        }
        // Pin the end exactly; accumulated rounding must not leave a gap.
        cum[n] = 1.0;
        for cell in &mut cells {
            cell.a /= total;
            cell.b /= total;
        }

        Ok(Self {
            lo,
            hi,
            width,
            cum,
            cells,
            total,
        })
    }

    /// Sample `f` on `n` cells over `[lo, hi]` and build the table.
    pub fn from_fn(lo: f64, hi: f64, n: usize, f: impl Fn(f64) -> f64) -> Result<Self> {
        if n == 0 {
            return Err(FitError::InvalidDataset("CDF table needs at least one cell".to_string()));
        }
        let h = (hi - lo) / n as f64;
        let edges: Vec<f64> = (0..=n).map(|i| f(lo + h * i as f64)).collect();
        let centers: Vec<f64> = (0..n).map(|i| f(lo + h * (i as f64 + 0.5))).collect();
        Self::build(lo, hi, &edges, &centers)
    }

    pub fn range(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, i: usize) -> Option<&CdfCell> {
        self.cells.get(i)
    }

    /// Integral of the density over the range, before normalization.
    pub fn integral(&self) -> f64 {
        self.total
    }

    /// Cumulative probability at `x`.
    pub fn cdf(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        if x <= self.lo {
            return 0.0;
        }
        if x >= self.hi {
            return 1.0;
        }
        let n = self.cells.len();
        let pos = (x - self.lo) / self.width;
        let i = (pos.floor() as usize).min(n - 1);
        let t = (pos - i as f64).clamp(0.0, 1.0);
        let cell = &self.cells[i];
        let g = cell.a * t + cell.b * t * t;
        (self.cum[i] + g).clamp(self.cum[i], self.cum[i + 1])
    }

    /// Coordinate whose cumulative probability is `u`.
    ///
    /// `u` is clamped to `[0, 1]`; the result always lies in the table range.
    pub fn inverse_cdf(&self, u: f64) -> f64 {
        let u = if u.is_nan() { 0.0 } else { u.clamp(0.0, 1.0) };
        let n = self.cells.len();
        // First cell whose upper cumulative exceeds `u`; empty cells are skipped.
        let i = self.cum[1..].partition_point(|&c| c <= u).min(n - 1);
        let cell = &self.cells[i];
        let rr = (u - self.cum[i]).max(0.0);

        // Root of B t² + A t - rr = 0 in the cancellation-free form.
        let disc = (cell.a * cell.a + 4.0 * cell.b * rr).max(0.0);
        let denom = cell.a + disc.sqrt();
        let t = if denom > 0.0 { 2.0 * rr / denom } else { 0.0 };
        let x = self.lo + self.width * (i as f64 + t.clamp(0.0, 1.0));
        x.clamp(self.lo, self.hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gauss(x: f64) -> f64 {
        (-0.5 * x * x).exp()
    }

    #[test]
    fn uniform_density_is_linear() {
        let table = CdfTable::from_fn(0.0, 4.0, 8, |_| 2.0).unwrap();
        assert_abs_diff_eq!(table.cdf(1.0), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(table.cdf(3.3), 0.825, epsilon = 1e-12);
        assert_abs_diff_eq!(table.inverse_cdf(0.5), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.integral(), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn cdf_is_clamped_outside_range() {
        let table = CdfTable::from_fn(-1.0, 1.0, 4, |x| 1.0 + x * x).unwrap();
        assert_eq!(table.cdf(-5.0), 0.0);
        assert_eq!(table.cdf(5.0), 1.0);
        assert_eq!(table.inverse_cdf(0.0), -1.0);
        assert_abs_diff_eq!(table.inverse_cdf(1.0), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn inverse_roundtrips_on_positive_density() {
        let table = CdfTable::from_fn(-5.0, 5.0, 100, gauss).unwrap();
        let range = 10.0;
        for k in 0..1000 {
            let x = -5.0 + range * (k as f64 + 0.5) / 1000.0;
            let back = table.inverse_cdf(table.cdf(x));
            assert!(
                (back - x).abs() < 1e-6 * range,
                "x={x} back={back}"
            );
        }
    }

    #[test]
    fn cdf_is_monotone_and_smooth() {
        let table = CdfTable::from_fn(-5.0, 5.0, 20, gauss).unwrap();
        let mut prev = 0.0;
        for k in 0..=400 {
            let x = -5.0 + 10.0 * k as f64 / 400.0;
            let c = table.cdf(x);
            assert!(c >= prev - 1e-15);
            prev = c;
        }
        // Quadratic refinement tracks the exact normal CDF at 0 (symmetry).
        assert_abs_diff_eq!(table.cdf(0.0), 0.5, epsilon = 1e-9);
        // And is close to it off-center: Φ(1) ≈ 0.841345 on a truncated range.
        assert_abs_diff_eq!(table.cdf(1.0), 0.841345, epsilon = 2e-3);
    }

    #[test]
    fn differences_are_recorded_per_cell() {
        let table = CdfTable::from_fn(0.0, 2.0, 2, |x| x * x).unwrap();
        let c0 = table.cell(0).unwrap();
        // f(0)=0, f(0.5)=0.25, f(1)=1
        assert_abs_diff_eq!(c0.d1, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c0.d2, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_density_is_rejected() {
        let err = CdfTable::from_fn(0.0, 1.0, 10, |_| 0.0).unwrap_err();
        assert_eq!(err, FitError::AllZeroDensity);
    }

    #[test]
    fn empty_cells_are_skipped_by_inverse() {
        // Density only on the upper half.
        let table = CdfTable::from_fn(0.0, 2.0, 4, |x| if x >= 1.0 { 1.0 } else { 0.0 }).unwrap();
        let x = table.inverse_cdf(0.01);
        assert!(x >= 0.5, "x={x}");
    }
}
