//! Dataset subsets: one data source plus how it takes part in a fit.

use serde::Serialize;

use crate::domain::{DataPoint, DatasetLayout, DatasetSpec, Filter, NormRegion};
use crate::fit::{AccumulationMethod, DatasetCache, IntegrationGrid};
use crate::math::BasicStats;

/// Goodness-of-fit figures captured after a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Statistics of observed values over usable points.
    pub data: Option<BasicStats>,
    /// Statistics of fitted values over the same points.
    pub fit: Option<BasicStats>,
    /// `Σ((obs - fit)/err)²` or the method's analogue.
    pub chi2: f64,
    pub n_used: usize,
    /// This dataset's weighted share of the objective at the last evaluation.
    pub objective: f64,
    pub n_errors: usize,
}

#[derive(Debug, Clone)]
pub struct DatasetSubset {
    source: String,
    layout: DatasetLayout,
    dims: usize,
    pub(crate) filter: Option<Filter>,
    /// Keys of the terms summed to model this dataset.
    pub(crate) terms: Vec<String>,
    pub(crate) weight: f64,
    pub(crate) method: Option<AccumulationMethod>,
    pub(crate) enabled: bool,
    pub(crate) normalization: NormRegion,
    pub(crate) cache: Option<DatasetCache>,
    pub(crate) summary: DatasetSummary,
}

impl DatasetSubset {
    pub(crate) fn from_spec(spec: DatasetSpec, dims: usize) -> Self {
        Self {
            source: spec.source.trim().to_string(),
            layout: spec.layout,
            dims,
            filter: spec.filter,
            terms: Vec::new(),
            weight: spec.weight,
            method: spec.method,
            enabled: true,
            normalization: spec.normalization,
            cache: None,
            summary: DatasetSummary::default(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn is_binned(&self) -> bool {
        self.layout.is_binned()
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Per-dataset override of the fit's method.
    pub fn method(&self) -> Option<AccumulationMethod> {
        self.method
    }

    pub fn effective_method(&self, fit_method: AccumulationMethod) -> AccumulationMethod {
        self.method.unwrap_or(fit_method)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn normalization(&self) -> &NormRegion {
        &self.normalization
    }

    /// Loaded points, if the cache is populated.
    pub fn points(&self) -> Option<&[DataPoint]> {
        self.cache.as_ref().map(|c| c.points.as_slice())
    }

    pub fn grid(&self) -> Option<&IntegrationGrid> {
        self.cache.as_ref().map(|c| &c.grid)
    }

    pub fn summary(&self) -> &DatasetSummary {
        &self.summary
    }

    pub(crate) fn free_cache(&mut self) {
        self.cache = None;
    }
}
