//! Fixed-binning histograms with 1 to 3 axes.

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

/// One uniformly binned axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub nbins: usize,
    pub lo: f64,
    pub hi: f64,
}

impl Axis {
    pub fn new(nbins: usize, lo: f64, hi: f64) -> Self {
        Self { nbins, lo, hi }
    }

    pub fn width(&self) -> f64 {
        (self.hi - self.lo) / self.nbins as f64
    }

    /// Edge `i` for `i in 0..=nbins`.
    pub fn edge(&self, i: usize) -> f64 {
        if i == self.nbins {
            return self.hi;
        }
        self.lo + self.width() * i as f64
    }

    pub fn center(&self, i: usize) -> f64 {
        self.lo + self.width() * (i as f64 + 0.5)
    }

    fn validate(&self) -> Result<()> {
        if self.nbins == 0 {
            return Err(FitError::InvalidDataset("axis has zero bins".to_string()));
        }
        if !(self.lo.is_finite() && self.hi.is_finite() && self.hi > self.lo) {
            return Err(FitError::InvalidDataset(format!(
                "invalid axis range {}..{}",
                self.lo, self.hi
            )));
        }
        Ok(())
    }
}

/// Binned data: contents are stored with the x index running fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub axes: Vec<Axis>,
    pub contents: Vec<f64>,
    /// Per-bin errors. When absent, `sqrt(|content|)` is used.
    #[serde(default)]
    pub errors: Option<Vec<f64>>,
}

impl Histogram {
    pub fn new(axes: Vec<Axis>, contents: Vec<f64>, errors: Option<Vec<f64>>) -> Result<Self> {
        let h = Self {
            axes,
            contents,
            errors,
        };
        h.validate()?;
        Ok(h)
    }

    /// Convenience constructor for a 1-D histogram with Poisson errors.
    pub fn new_1d(nbins: usize, lo: f64, hi: f64, contents: Vec<f64>) -> Result<Self> {
        Self::new(vec![Axis::new(nbins, lo, hi)], contents, None)
    }

    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() || self.axes.len() > 3 {
            return Err(FitError::InvalidDataset(format!(
                "histograms must have 1 to 3 axes, got {}",
                self.axes.len()
            )));
        }
        for axis in &self.axes {
            axis.validate()?;
        }
        let n = self.n_bins();
        if self.contents.len() != n {
            return Err(FitError::InvalidDataset(format!(
                "expected {n} bin contents, got {}",
                self.contents.len()
            )));
        }
        if let Some(errors) = &self.errors {
            if errors.len() != n {
                return Err(FitError::InvalidDataset(format!(
                    "expected {n} bin errors, got {}",
                    errors.len()
                )));
            }
        }
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.axes.len()
    }

    pub fn n_bins(&self) -> usize {
        self.axes.iter().map(|a| a.nbins).product()
    }

    /// Number of bins along each axis, padded with 1 up to three axes.
    pub fn shape(&self) -> [usize; 3] {
        let mut shape = [1; 3];
        for (d, axis) in self.axes.iter().enumerate() {
            shape[d] = axis.nbins;
        }
        shape
    }

    /// Flat index of bin `(ix, iy, iz)`.
    pub fn bin_index(&self, idx: [usize; 3]) -> usize {
        let [nx, ny, _] = self.shape();
        idx[0] + nx * (idx[1] + ny * idx[2])
    }

    pub fn content(&self, bin: usize) -> f64 {
        self.contents[bin]
    }

    pub fn error(&self, bin: usize) -> f64 {
        match &self.errors {
            Some(errors) => errors[bin],
            None => self.contents[bin].abs().sqrt(),
        }
    }
}
