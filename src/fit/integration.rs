//! Integration cache: per-dataset evaluation points and the weights that turn
//! their model values into per-bin fitted values and normalization integrals.
//!
//! For a histogram every bin gets a stencil made of its center and its `2^d`
//! corners (shared with neighbouring bins). The fitted value of a bin is
//!
//! ```text
//! 1-D: (4 c + k0 + k1) / 6
//! 2-D: (8 c + Σ4 k) / 12
//! 3-D: (16 c + Σ8 k) / 24
//! ```
//!
//! so the weights always sum to one and a constant model is reproduced
//! exactly. Unbinned extended-likelihood datasets also get a normalization
//! grid over their declared region, combined the same way and scaled by the
//! cell volume.

use rayon::prelude::*;

use crate::data::{Axis, DataSource, Histogram};
use crate::domain::{DataPoint, DatasetLayout, DatasetSubset, Filter, NormRegion};
use crate::error::{FitError, FunctionError, PointError, Result};
use crate::fit::AccumulationMethod;

/// Relative inward offset (of the bin width) used when testing bin edges
/// against a filter.
pub const BIN_EDGE_EPSILON: f64 = 1e-5;

/// Grids with at least this many points are evaluated in parallel.
pub const PARALLEL_EVAL_THRESHOLD: usize = 512;

/// Grid points and weights needed for one fitted value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stencil {
    pub center: usize,
    corners: [usize; 8],
    n_corners: u8,
    center_weight: f64,
    corner_weight: f64,
}

impl Stencil {
    fn single(center: usize) -> Self {
        Self {
            center,
            corners: [0; 8],
            n_corners: 0,
            center_weight: 1.0,
            corner_weight: 0.0,
        }
    }

    fn simpson(center: usize, corners: &[usize]) -> Self {
        let mut c = [0; 8];
        c[..corners.len()].copy_from_slice(corners);
        let (center_weight, corner_weight) = simpson_weights(corners.len());
        Self {
            center,
            corners: c,
            n_corners: corners.len() as u8,
            center_weight,
            corner_weight,
        }
    }

    pub fn corners(&self) -> &[usize] {
        &self.corners[..self.n_corners as usize]
    }

    /// Grid point indices this stencil reads.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.center).chain(self.corners().iter().copied())
    }

    /// Combine grid values; `None` if any required point failed.
    pub fn combine(&self, values: &[f64], failed: &[bool]) -> Option<f64> {
        if self.indices().any(|i| failed[i]) {
            return None;
        }
        let corners: f64 = self.corners().iter().map(|&i| values[i]).sum();
        Some(self.center_weight * values[self.center] + self.corner_weight * corners)
    }
}

/// `(center, per-corner)` weights for a stencil with `n_corners` corners.
fn simpson_weights(n_corners: usize) -> (f64, f64) {
    match n_corners {
        2 => (4.0 / 6.0, 1.0 / 6.0),
        4 => (8.0 / 12.0, 1.0 / 12.0),
        8 => (16.0 / 24.0, 1.0 / 24.0),
        _ => (1.0, 0.0),
    }
}

/// Normalization cells of an unbinned dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct NormGrid {
    /// Every cell of the region in bin order; filtered ones are skipped.
    pub cells: Vec<Stencil>,
    pub usable: Vec<bool>,
    pub volume: f64,
    pub axes: Vec<Axis>,
}

/// Cached evaluation grid of one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationGrid {
    pub dims: usize,
    pub points: Vec<[f64; 3]>,
    /// Whether a usable stencil reads the point; others are never evaluated.
    pub needed: Vec<bool>,
    /// One stencil per data point (same order as the dataset's points).
    pub stencils: Vec<Stencil>,
    pub norm: Option<NormGrid>,
    /// Model values from the last evaluation.
    pub values: Vec<f64>,
    pub failed: Vec<bool>,
    /// Histogram axes, for 1-D CDF tabulation and replay.
    pub axes: Vec<Axis>,
}

impl IntegrationGrid {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Evaluate `f` at every needed point, recording failures instead of
    /// propagating them. Returns the number of failed points.
    pub fn evaluate<F>(&mut self, f: F) -> usize
    where
        F: Fn(&[f64]) -> std::result::Result<f64, FunctionError> + Sync,
    {
        let dims = self.dims;
        let eval = |(p, &needed): (&[f64; 3], &bool)| -> (f64, bool) {
            if !needed {
                return (0.0, false);
            }
            match f(&p[..dims]) {
                Ok(v) if v.is_finite() => (v, false),
                _ => (0.0, true),
            }
        };
        let results: Vec<(f64, bool)> = if self.points.len() >= PARALLEL_EVAL_THRESHOLD {
            self.points.par_iter().zip(self.needed.par_iter()).map(eval).collect()
        } else {
            self.points.iter().zip(self.needed.iter()).map(eval).collect()
        };
        let mut n_failed = 0;
        self.values.clear();
        self.failed.clear();
        for (v, bad) in results {
            n_failed += usize::from(bad);
            self.values.push(v);
            self.failed.push(bad);
        }
        n_failed
    }

    /// Fitted value for data point `i` from the last evaluation.
    pub fn fitted(&self, i: usize) -> Option<f64> {
        self.stencils[i].combine(&self.values, &self.failed)
    }

    /// Normalization integral from the last evaluation, with the number of
    /// cells skipped because a point failed.
    pub fn normalization(&self) -> Option<(f64, usize)> {
        let norm = self.norm.as_ref()?;
        let mut sum = 0.0;
        let mut skipped = 0;
        for (cell, _) in norm.cells.iter().zip(&norm.usable).filter(|(_, u)| **u) {
            match cell.combine(&self.values, &self.failed) {
                Some(v) => sum += v,
                None => skipped += 1,
            }
        }
        Some((sum * norm.volume, skipped))
    }
}

/// Points and grid of a loaded dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetCache {
    pub points: Vec<DataPoint>,
    pub grid: IntegrationGrid,
}

/// Load a dataset's points from `source` and build its integration grid.
pub fn build_cache(
    index: usize,
    dataset: &DatasetSubset,
    method: AccumulationMethod,
    source: &dyn DataSource,
) -> Result<DatasetCache> {
    let id = dataset.source();
    let filter = dataset.filter();
    let mut cache = match dataset.layout() {
        DatasetLayout::Histogram => {
            let h = source
                .histogram(id)
                .ok_or_else(|| FitError::UnknownDataSource(id.to_string()))?;
            histogram_cache(h, filter)?
        }
        DatasetLayout::Points {
            coords,
            value,
            error,
        } => {
            let table = source
                .table(id)
                .ok_or_else(|| FitError::UnknownDataSource(id.to_string()))?;
            let columns = lookup_columns(table, id, coords)?;
            let values = lookup_column(table, id, value)?;
            let errors = match error {
                Some(name) => Some(lookup_column(table, id, name)?),
                None => None,
            };
            let n = table.n_rows();
            let mut points = try_vec(n)?;
            for row in 0..n {
                let x: Vec<f64> = columns.iter().map(|c| c[row]).collect();
                let err = errors.map(|e| e[row]).unwrap_or(1.0);
                points.push(DataPoint::new(&x, values[row], err));
            }
            row_cache(points, columns.len(), filter)?
        }
        DatasetLayout::Events { coords } => {
            let table = source
                .table(id)
                .ok_or_else(|| FitError::UnknownDataSource(id.to_string()))?;
            let columns = lookup_columns(table, id, coords)?;
            let n = table.n_rows();
            let mut points = try_vec(n)?;
            for row in 0..n {
                let x: Vec<f64> = columns.iter().map(|c| c[row]).collect();
                points.push(DataPoint::new(&x, 1.0, 1.0));
            }
            row_cache(points, columns.len(), filter)?
        }
    };

    if !dataset.is_binned() && method == AccumulationMethod::ExtendedMaxLikelihood {
        let region = dataset.normalization();
        if region.is_empty() {
            return Err(FitError::NoNormalizationRegion { dataset: index });
        }
        add_norm_grid(&mut cache.grid, region, filter)?;
    }
    Ok(cache)
}

fn lookup_column<'a>(table: &'a crate::data::Table, id: &str, name: &str) -> Result<&'a [f64]> {
    table
        .column(name)
        .ok_or_else(|| FitError::InvalidDataset(format!("table '{id}' has no column '{name}'")))
}

fn lookup_columns<'a>(
    table: &'a crate::data::Table,
    id: &str,
    names: &[String],
) -> Result<Vec<&'a [f64]>> {
    if names.is_empty() || names.len() > 3 {
        return Err(FitError::InvalidDataset(format!(
            "datasets need 1 to 3 coordinate columns, got {}",
            names.len()
        )));
    }
    names.iter().map(|n| lookup_column(table, id, n)).collect()
}

fn try_vec<T>(n: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|e| FitError::ResourceExhausted(format!("cannot allocate {n} cache entries: {e}")))?;
    Ok(v)
}

/// One stencil per row, evaluated at the row itself.
fn row_cache(mut points: Vec<DataPoint>, dims: usize, filter: Option<&Filter>) -> Result<DatasetCache> {
    let n = points.len();
    let mut grid = IntegrationGrid {
        dims,
        points: try_vec(n)?,
        needed: try_vec(n)?,
        stencils: try_vec(n)?,
        ..IntegrationGrid::default()
    };
    for (i, p) in points.iter_mut().enumerate() {
        p.filtered = filter.is_some_and(|f| !f.accepts(&p.coords[..dims]));
        grid.points.push(p.coords);
        grid.needed.push(!p.filtered);
        grid.stencils.push(Stencil::single(i));
    }
    Ok(DatasetCache { points, grid })
}

fn histogram_cache(h: &Histogram, filter: Option<&Filter>) -> Result<DatasetCache> {
    let dims = h.dims();
    let mut grid = IntegrationGrid {
        dims,
        axes: h.axes.clone(),
        ..IntegrationGrid::default()
    };
    let stencils = append_cells(&mut grid, &h.axes, filter)?;

    let mut points = try_vec(h.n_bins())?;
    for (bin, (stencil, usable)) in stencils.into_iter().enumerate() {
        let c = grid.points[stencil.center];
        let mut p = DataPoint::new(&c[..dims], h.content(bin), h.error(bin));
        p.filtered = !usable;
        points.push(p);
        grid.stencils.push(stencil);
    }
    Ok(DatasetCache { points, grid })
}

fn add_norm_grid(grid: &mut IntegrationGrid, region: &NormRegion, filter: Option<&Filter>) -> Result<()> {
    if region.axes.len() != grid.dims {
        return Err(FitError::InvalidDataset(format!(
            "normalization region has {} axes, dataset has {}",
            region.axes.len(),
            grid.dims
        )));
    }
    let volume: f64 = region.axes.iter().map(Axis::width).product();
    let (cells, usable): (Vec<Stencil>, Vec<bool>) = append_cells(grid, &region.axes, filter)?.into_iter().unzip();
    grid.norm = Some(NormGrid {
        cells,
        usable,
        volume,
        axes: region.axes.clone(),
    });
    Ok(())
}

/// Append corner and center points for a regular cell grid over `axes` and
/// return each cell's stencil with its usability under `filter`, in bin order
/// (x fastest).
fn append_cells(
    grid: &mut IntegrationGrid,
    axes: &[Axis],
    filter: Option<&Filter>,
) -> Result<Vec<(Stencil, bool)>> {
    let dims = axes.len();
    let mut shape = [1usize; 3];
    let mut cshape = [1usize; 3];
    for (d, a) in axes.iter().enumerate() {
        shape[d] = a.nbins;
        cshape[d] = a.nbins + 1;
    }
    let overflow = || FitError::ResourceExhausted("integration grid size overflows".to_string());
    let n_cells = shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(overflow)?;
    let n_corners = cshape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(overflow)?;
    let extra = n_cells.checked_add(n_corners).ok_or_else(overflow)?;
    grid.points
        .try_reserve_exact(extra)
        .map_err(|e| FitError::ResourceExhausted(format!("cannot allocate {extra} grid points: {e}")))?;
    grid.needed
        .try_reserve_exact(extra)
        .map_err(|e| FitError::ResourceExhausted(format!("cannot allocate {extra} grid flags: {e}")))?;

    let base = grid.points.len();
    let coord = |d: usize, i: usize, center: bool| -> f64 {
        if d >= dims {
            0.0
        } else if center {
            axes[d].center(i)
        } else {
            axes[d].edge(i)
        }
    };

    for iz in 0..cshape[2] {
        for iy in 0..cshape[1] {
            for ix in 0..cshape[0] {
                grid.points.push([coord(0, ix, false), coord(1, iy, false), coord(2, iz, false)]);
                grid.needed.push(false);
            }
        }
    }
    let center_base = grid.points.len();
    for iz in 0..shape[2] {
        for iy in 0..shape[1] {
            for ix in 0..shape[0] {
                grid.points.push([coord(0, ix, true), coord(1, iy, true), coord(2, iz, true)]);
                grid.needed.push(false);
            }
        }
    }

    let corner_index = |c: [usize; 3]| base + c[0] + cshape[0] * (c[1] + cshape[1] * c[2]);
    let n_stencil_corners = 1usize << dims;
    let mut out = Vec::with_capacity(n_cells);
    let mut corner_ids = [0usize; 8];
    let mut probe = [0.0f64; 3];

    for iz in 0..shape[2] {
        for iy in 0..shape[1] {
            for ix in 0..shape[0] {
                let bin = [ix, iy, iz];
                let center = center_base + ix + shape[0] * (iy + shape[1] * iz);
                let mut usable = filter.is_none_or(|f| f.accepts(&grid.points[center][..dims]));

                for (k, id) in corner_ids.iter_mut().take(n_stencil_corners).enumerate() {
                    let mut c = bin;
                    for d in 0..dims {
                        let upper = (k >> d) & 1 == 1;
                        c[d] += usize::from(upper);
                        // Probe the filter slightly inside the bin.
                        let step = axes[d].width() * BIN_EDGE_EPSILON;
                        probe[d] = axes[d].edge(c[d]) + if upper { -step } else { step };
                    }
                    *id = corner_index(c);
                    if let Some(f) = filter {
                        usable &= f.accepts(&probe[..dims]);
                    }
                }

                let stencil = Stencil::simpson(center, &corner_ids[..n_stencil_corners]);
                if usable {
                    for i in stencil.indices() {
                        grid.needed[i] = true;
                    }
                }
                out.push((stencil, usable));
            }
        }
    }
    Ok(out)
}

/// Apply the last grid evaluation to the dataset's points: fitted values and
/// function-error flags. Returns the number of points with a function error.
pub fn apply_fitted(cache: &mut DatasetCache) -> usize {
    let mut n_errors = 0;
    for (i, p) in cache.points.iter_mut().enumerate() {
        p.error = None;
        if p.filtered {
            continue;
        }
        match cache.grid.fitted(i) {
            Some(v) => p.fit = v,
            None => {
                p.fit = 0.0;
                p.error = Some(PointError::Function);
                n_errors += 1;
            }
        }
    }
    n_errors
}
