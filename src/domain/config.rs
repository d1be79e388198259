//! `FitConfig`: one named fit and its mutation API.
//!
//! Every mutation either applies completely or returns an error and leaves
//! the fit untouched. Mutations that change what the minimizer has been told
//! clear the matching sync flag, and every mutation clears `complete`.
//! While the session's busy lock is held all mutations fail with
//! [`FitError::MinimizerBusy`].

use std::fmt;
use std::sync::Arc;

use crate::data::{DataSink, DataSource};
use crate::domain::{
    Covariance, DatasetLayout, DatasetSpec, DatasetSubset, Filter, FitEvent, FitStatus,
    FunctionTerm, MinimizerOptions, NormRegion, Parameter, SyncFlags, fold_name,
};
use crate::error::{FitError, Result};
use crate::fit::{AccumulationMethod, MappingKind, assign_offsets};
use crate::math::CdfTable;
use crate::models::FunctionRegistry;
use crate::session::BusyLock;

type Listener = Box<dyn FnMut(&FitEvent)>;

pub struct FitConfig {
    name: String,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) datasets: Vec<DatasetSubset>,
    pub(crate) terms: Vec<FunctionTerm>,
    pub(crate) method: AccumulationMethod,
    pub(crate) options: MinimizerOptions,
    pub(crate) flags: SyncFlags,
    pub(crate) status: FitStatus,
    pub(crate) covariance: Option<Covariance>,
    /// Free parameters the minimizer actually used in the last run.
    pub(crate) n_free_used: usize,
    pub(crate) busy: BusyLock,
    registry: Arc<FunctionRegistry>,
    listeners: Vec<Listener>,
}

impl FitConfig {
    /// A standalone fit with the built-in model functions.
    pub fn new(name: &str) -> Self {
        Self::with_registry(
            name,
            Arc::new(FunctionRegistry::with_builtins()),
            BusyLock::default(),
        )
    }

    pub(crate) fn with_registry(name: &str, registry: Arc<FunctionRegistry>, busy: BusyLock) -> Self {
        Self {
            name: name.trim().to_string(),
            parameters: Vec::new(),
            datasets: Vec::new(),
            terms: Vec::new(),
            method: AccumulationMethod::default(),
            options: MinimizerOptions::default(),
            flags: SyncFlags::default(),
            status: FitStatus::default(),
            covariance: None,
            n_free_used: 0,
            busy,
            registry,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        let key = fold_name(name).ok()?;
        self.parameters.iter().find(|p| p.key() == key)
    }

    /// Current parameter values in declaration order.
    pub fn parameter_values(&self) -> Vec<f64> {
        self.parameters.iter().map(Parameter::value).collect()
    }

    pub fn terms(&self) -> &[FunctionTerm] {
        &self.terms
    }

    pub fn term(&self, name: &str) -> Option<&FunctionTerm> {
        let key = fold_name(name).ok()?;
        self.terms.iter().find(|t| t.key() == key)
    }

    pub fn datasets(&self) -> &[DatasetSubset] {
        &self.datasets
    }

    pub fn dataset(&self, index: usize) -> Option<&DatasetSubset> {
        self.datasets.get(index)
    }

    pub fn method(&self) -> AccumulationMethod {
        self.method
    }

    pub fn options(&self) -> &MinimizerOptions {
        &self.options
    }

    pub fn flags(&self) -> SyncFlags {
        self.flags
    }

    /// Results are current and safe to read.
    pub fn is_complete(&self) -> bool {
        self.flags.complete
    }

    pub fn status(&self) -> &FitStatus {
        &self.status
    }

    pub fn covariance(&self) -> Option<&Covariance> {
        self.covariance.as_ref()
    }

    pub fn n_free_used(&self) -> usize {
        self.n_free_used
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Register an observer for completion and sync-loss events.
    pub fn subscribe(&mut self, listener: impl FnMut(&FitEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Tear the fit down, notifying observers.
    pub fn destroy(mut self) {
        self.invalidate();
        self.emit(FitEvent::Destroyed);
    }

    // ---- parameters -------------------------------------------------------

    /// Append a parameter; returns its index.
    pub fn add_parameter(&mut self, name: &str, value: f64, step: f64) -> Result<usize> {
        self.check_busy()?;
        let p = Parameter::new(name, value, step)?;
        if self.parameters.iter().any(|q| q.key() == p.key()) {
            return Err(FitError::DuplicateName {
                kind: "parameter",
                name: p.name().to_string(),
            });
        }
        self.parameters.push(p);
        self.params_changed();
        Ok(self.parameters.len() - 1)
    }

    pub fn remove_parameter(&mut self, name: &str) -> Result<()> {
        self.check_busy()?;
        let index = self.parameter_index(name)?;
        self.parameters.remove(index);
        self.params_changed();
        Ok(())
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        self.update_parameter(name, |p| p.set_value(value))
    }

    pub fn set_step(&mut self, name: &str, step: f64) -> Result<()> {
        self.update_parameter(name, |p| p.set_step(step))
    }

    pub fn fix(&mut self, name: &str) -> Result<()> {
        self.update_parameter(name, |p| {
            p.fixed = true;
            Ok(())
        })
    }

    pub fn release(&mut self, name: &str) -> Result<()> {
        self.update_parameter(name, |p| {
            p.fixed = false;
            Ok(())
        })
    }

    pub fn set_bounds(&mut self, name: &str, lo: f64, hi: f64) -> Result<()> {
        self.update_parameter(name, |p| p.set_bounds(lo, hi))
    }

    pub fn clear_bounds(&mut self, name: &str) -> Result<()> {
        self.update_parameter(name, |p| {
            p.bounds = None;
            Ok(())
        })
    }

    fn parameter_index(&self, name: &str) -> Result<usize> {
        let key = fold_name(name)?;
        self.parameters
            .iter()
            .position(|p| p.key() == key)
            .ok_or_else(|| FitError::UnknownName {
                kind: "parameter",
                name: name.to_string(),
            })
    }

    fn update_parameter(
        &mut self,
        name: &str,
        apply: impl FnOnce(&mut Parameter) -> Result<()>,
    ) -> Result<()> {
        self.check_busy()?;
        let index = self.parameter_index(name)?;
        apply(&mut self.parameters[index])?;
        self.params_changed();
        Ok(())
    }

    fn params_changed(&mut self) {
        self.flags.params_synced = false;
        self.covariance = None;
        self.invalidate();
    }

    // ---- options and method ----------------------------------------------

    pub fn set_options(&mut self, options: MinimizerOptions) -> Result<()> {
        self.check_busy()?;
        options.validate()?;
        if self.options.minimizer_visible_change(&options) {
            self.flags.options_synced = false;
        }
        self.options = options;
        self.invalidate();
        Ok(())
    }

    pub fn set_error_def(&mut self, error_def: f64) -> Result<()> {
        self.edit_options(|o| o.error_def = error_def)
    }

    pub fn set_verbosity(&mut self, verbosity: u8) -> Result<()> {
        self.edit_options(|o| o.verbosity = verbosity)
    }

    pub fn set_strategy(&mut self, strategy: u8) -> Result<()> {
        self.edit_options(|o| o.strategy = strategy)
    }

    pub fn set_precision(&mut self, precision: f64) -> Result<()> {
        self.edit_options(|o| o.precision = precision)
    }

    pub fn set_use_gradient(&mut self, use_gradient: bool) -> Result<()> {
        self.edit_options(|o| o.use_gradient = use_gradient)
    }

    pub fn set_timeout(&mut self, seconds: u64) -> Result<()> {
        self.edit_options(|o| o.timeout_secs = seconds)
    }

    pub fn set_max_calls(&mut self, max_calls: Option<usize>) -> Result<()> {
        self.edit_options(|o| o.max_calls = max_calls)
    }

    pub fn set_ignore_function_errors(&mut self, ignore: bool) -> Result<()> {
        self.edit_options(|o| o.ignore_function_errors = ignore)
    }

    fn edit_options(&mut self, edit: impl FnOnce(&mut MinimizerOptions)) -> Result<()> {
        let mut options = self.options.clone();
        edit(&mut options);
        self.set_options(options)
    }

    pub fn set_method(&mut self, method: AccumulationMethod) -> Result<()> {
        self.check_busy()?;
        self.method = method;
        self.free_caches();
        self.invalidate();
        Ok(())
    }

    // ---- function terms ---------------------------------------------------

    /// Add a term evaluating the registered function `function_tag`.
    pub fn add_term(&mut self, name: &str, function_tag: &str, mapping: MappingKind) -> Result<()> {
        self.check_busy()?;
        let function = self.registry.get(function_tag)?;
        mapping.check(function.n_params())?;
        let term = FunctionTerm::new(name, function_tag, function, mapping)?;
        if self.terms.iter().any(|t| t.key() == term.key()) {
            return Err(FitError::DuplicateName {
                kind: "term",
                name: term.name().to_string(),
            });
        }
        self.terms.push(term);
        self.terms_changed();
        Ok(())
    }

    pub fn set_mapping(&mut self, term: &str, mapping: MappingKind) -> Result<()> {
        self.check_busy()?;
        let index = self.term_index(term)?;
        mapping.check(self.terms[index].n_params())?;
        self.terms[index].mapping = mapping;
        self.terms_changed();
        Ok(())
    }

    fn term_index(&self, name: &str) -> Result<usize> {
        let key = fold_name(name)?;
        self.terms
            .iter()
            .position(|t| t.key() == key)
            .ok_or_else(|| FitError::UnknownName {
                kind: "term",
                name: name.to_string(),
            })
    }

    fn terms_changed(&mut self) {
        let offsets = assign_offsets(self.terms.iter().map(FunctionTerm::consumed));
        for (t, offset) in self.terms.iter_mut().zip(offsets) {
            t.offset = offset;
        }
        self.invalidate();
    }

    /// Flat-vector slots all terms need.
    pub fn required_parameters(&self) -> usize {
        let sequential: usize = self.terms.iter().map(FunctionTerm::consumed).sum();
        let identical = self
            .terms
            .iter()
            .filter(|t| t.mapping() == MappingKind::Identical)
            .map(FunctionTerm::n_params)
            .max()
            .unwrap_or(0);
        sequential.max(identical)
    }

    fn release_reference(&mut self, key: &str) {
        if let Some(index) = self.terms.iter().position(|t| t.key() == key) {
            let term = &mut self.terms[index];
            term.refs = term.refs.saturating_sub(1);
            if term.refs == 0 {
                tracing::debug!(term = term.name(), "deleting unreferenced term");
                self.terms.remove(index);
            }
        }
    }

    // ---- datasets ---------------------------------------------------------

    /// Add a dataset reading `spec.source` from `source`; returns its index.
    pub fn add_dataset(&mut self, source: &dyn DataSource, spec: DatasetSpec) -> Result<usize> {
        self.check_busy()?;
        check_weight(spec.weight)?;
        let dims = source_dims(source, &spec)?;
        spec.normalization.validate(dims)?;
        if let Some(filter) = &spec.filter {
            check_filter(filter, dims)?;
        }
        self.datasets.push(DatasetSubset::from_spec(spec, dims));
        self.invalidate();
        Ok(self.datasets.len() - 1)
    }

    /// Remove a dataset, releasing its term references.
    pub fn remove_dataset(&mut self, index: usize) -> Result<()> {
        self.check_busy()?;
        self.dataset_ref(index)?;
        let removed = self.datasets.remove(index);
        for key in removed.terms() {
            self.release_reference(key);
        }
        self.terms_changed();
        Ok(())
    }

    pub fn attach_term(&mut self, index: usize, term: &str) -> Result<()> {
        self.check_busy()?;
        self.dataset_ref(index)?;
        let t = self.term_index(term)?;
        let key = self.terms[t].key().to_string();
        if self.datasets[index].terms.contains(&key) {
            return Err(FitError::DuplicateName {
                kind: "term reference",
                name: term.to_string(),
            });
        }
        self.terms[t].refs += 1;
        let ds = &mut self.datasets[index];
        ds.terms.push(key);
        ds.free_cache();
        self.invalidate();
        Ok(())
    }

    /// Drop a dataset's reference to a term; the last reference deletes it.
    pub fn detach_term(&mut self, index: usize, term: &str) -> Result<()> {
        self.check_busy()?;
        self.dataset_ref(index)?;
        let key = fold_name(term)?;
        let ds = &mut self.datasets[index];
        let pos = ds
            .terms
            .iter()
            .position(|k| *k == key)
            .ok_or_else(|| FitError::UnknownName {
                kind: "term",
                name: term.to_string(),
            })?;
        ds.terms.remove(pos);
        ds.free_cache();
        self.release_reference(&key);
        self.terms_changed();
        Ok(())
    }

    pub fn set_weight(&mut self, index: usize, weight: f64) -> Result<()> {
        check_weight(weight)?;
        self.update_dataset(index, |d| {
            d.weight = weight;
            Ok(())
        })
    }

    pub fn set_dataset_method(&mut self, index: usize, method: Option<AccumulationMethod>) -> Result<()> {
        self.update_dataset(index, |d| {
            d.method = method;
            Ok(())
        })
    }

    pub fn set_filter(&mut self, index: usize, filter: Option<Filter>) -> Result<()> {
        self.update_dataset(index, |d| {
            if let Some(f) = &filter {
                check_filter(f, d.dims())?;
            }
            d.filter = filter;
            Ok(())
        })
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        self.update_dataset(index, |d| {
            d.enabled = enabled;
            Ok(())
        })
    }

    pub fn set_normalization(&mut self, index: usize, region: NormRegion) -> Result<()> {
        self.update_dataset(index, |d| {
            region.validate(d.dims())?;
            d.normalization = region;
            Ok(())
        })
    }

    fn dataset_ref(&self, index: usize) -> Result<&DatasetSubset> {
        self.datasets.get(index).ok_or_else(|| FitError::UnknownName {
            kind: "dataset",
            name: index.to_string(),
        })
    }

    fn update_dataset(
        &mut self,
        index: usize,
        apply: impl FnOnce(&mut DatasetSubset) -> Result<()>,
    ) -> Result<()> {
        self.check_busy()?;
        self.dataset_ref(index)?;
        let ds = &mut self.datasets[index];
        apply(ds)?;
        ds.free_cache();
        self.invalidate();
        Ok(())
    }

    pub(crate) fn free_caches(&mut self) {
        for ds in &mut self.datasets {
            ds.free_cache();
        }
    }

    // ---- results ----------------------------------------------------------

    /// Tabulate the fitted density of a 1-D dataset from its last grid
    /// evaluation (the normalization grid for unbinned datasets).
    pub fn tabulate_cdf(&self, index: usize) -> Result<CdfTable> {
        let ds = self.dataset_ref(index)?;
        if ds.dims() != 1 {
            return Err(FitError::InvalidDataset(format!(
                "CDF tabulation needs a 1-D dataset, dataset {index} has {} dimensions",
                ds.dims()
            )));
        }
        let grid = ds
            .grid()
            .filter(|g| !g.values.is_empty())
            .ok_or_else(|| FitError::InvalidDataset(format!("dataset {index} has not been evaluated")))?;
        let (cells, axis) = match &grid.norm {
            Some(norm) => (&norm.cells, norm.axes.first()),
            None => (&grid.stencils, grid.axes.first()),
        };
        let axis = axis.ok_or_else(|| {
            FitError::InvalidDataset(format!("dataset {index} has no binned region to tabulate"))
        })?;

        let mut edges = Vec::with_capacity(cells.len() + 1);
        let mut centers = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            let corners = cell.corners();
            if corners.len() != 2 {
                return Err(FitError::InvalidDataset(format!(
                    "dataset {index} has no binned region to tabulate"
                )));
            }
            if i == 0 {
                edges.push(grid.values[corners[0]]);
            }
            edges.push(grid.values[corners[1]]);
            centers.push(grid.values[cell.center]);
        }
        CdfTable::build(axis.lo, axis.hi, &edges, &centers)
    }

    /// Write a dataset's fitted values into `sink` under `target`.
    pub fn replay_fitted(&self, index: usize, sink: &mut dyn DataSink, target: &str) -> Result<()> {
        let ds = self.dataset_ref(index)?;
        let points = ds
            .points()
            .ok_or_else(|| FitError::InvalidDataset(format!("dataset {index} has not been evaluated")))?;
        let values: Vec<f64> = points.iter().map(|p| p.fit).collect();
        match (ds.layout(), ds.grid()) {
            (DatasetLayout::Histogram, Some(grid)) => {
                sink.write_histogram(target, grid.axes.clone(), values)
            }
            _ => sink.write_column(target, "fit", values),
        }
    }

    // ---- sync state -------------------------------------------------------

    pub(crate) fn check_busy(&self) -> Result<()> {
        if self.busy.is_held() {
            Err(FitError::MinimizerBusy)
        } else {
            Ok(())
        }
    }

    /// Clear `complete`, telling observers if results were current.
    pub(crate) fn invalidate(&mut self) {
        if self.flags.complete {
            self.flags.complete = false;
            self.emit(FitEvent::LostSync);
        }
    }

    pub(crate) fn mark_complete(&mut self) {
        if self.flags.params_synced && self.flags.options_synced {
            self.flags.complete = true;
            self.emit(FitEvent::Completed);
        }
    }

    /// Forget everything the minimizer was told (binding changes).
    pub(crate) fn reset_sync(&mut self) {
        self.invalidate();
        self.flags.params_synced = false;
        self.flags.options_synced = false;
        self.free_caches();
    }

    fn emit(&mut self, event: FitEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

impl fmt::Debug for FitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitConfig")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("terms", &self.terms)
            .field("datasets", &self.datasets.len())
            .field("method", &self.method)
            .field("flags", &self.flags)
            .finish()
    }
}

fn check_weight(weight: f64) -> Result<()> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(FitError::NegativeWeight(weight))
    }
}

fn check_filter(filter: &Filter, dims: usize) -> Result<()> {
    match filter {
        Filter::Ranges(r) if r.len() != dims => Err(FitError::InvalidDataset(format!(
            "filter has {} ranges, dataset has {dims} dimensions",
            r.len()
        ))),
        _ => Ok(()),
    }
}

/// Dimension of the data `spec` reads, checking the source matches its layout.
fn source_dims(source: &dyn DataSource, spec: &DatasetSpec) -> Result<usize> {
    let id = spec.source.trim();
    let missing = || FitError::UnknownDataSource(id.to_string());
    match &spec.layout {
        DatasetLayout::Histogram => Ok(source.histogram(id).ok_or_else(missing)?.dims()),
        DatasetLayout::Points { coords, value, error } => {
            let table = source.table(id).ok_or_else(missing)?;
            let mut needed: Vec<&String> = coords.iter().chain(std::iter::once(value)).collect();
            needed.extend(error);
            check_columns(table, id, coords.len(), needed)
        }
        DatasetLayout::Events { coords } => {
            let table = source.table(id).ok_or_else(missing)?;
            check_columns(table, id, coords.len(), coords.iter().collect())
        }
    }
}

fn check_columns(table: &crate::data::Table, id: &str, dims: usize, needed: Vec<&String>) -> Result<usize> {
    if !(1..=3).contains(&dims) {
        return Err(FitError::InvalidDataset(format!(
            "datasets need 1 to 3 coordinate columns, got {dims}"
        )));
    }
    if let Some(name) = needed.into_iter().find(|n| table.column(n).is_none()) {
        return Err(FitError::InvalidDataset(format!("table '{id}' has no column '{name}'")));
    }
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::data::{DataStore, Histogram, Table};

    fn store() -> DataStore {
        let mut s = DataStore::new();
        s.insert_histogram("h", Histogram::new_1d(4, 0.0, 4.0, vec![1.0; 4]).unwrap())
            .unwrap();
        s.insert_table("t", Table::from_columns([("x", vec![0.5, 1.5]), ("y", vec![2.0, 3.0])]).unwrap())
            .unwrap();
        s
    }

    fn synced(fit: &mut FitConfig) {
        fit.flags = SyncFlags {
            params_synced: true,
            options_synced: true,
            complete: true,
        };
    }

    #[test]
    fn parameter_names_fold() {
        let mut fit = FitConfig::new("f");
        fit.add_parameter("Sig Mean", 1.0, 0.1).unwrap();
        let err = fit.add_parameter(" sigmean", 2.0, 0.1).unwrap_err();
        assert!(matches!(err, FitError::DuplicateName { kind: "parameter", .. }));
        assert_eq!(fit.parameters().len(), 1);
        assert_eq!(fit.parameter("SIGMEAN").unwrap().name(), "Sig Mean");
    }

    #[test]
    fn parameter_mutations_clear_sync() {
        let mut fit = FitConfig::new("f");
        fit.add_parameter("a", 1.0, 0.1).unwrap();
        synced(&mut fit);
        fit.set_bounds("a", 0.0, 2.0).unwrap();
        assert!(!fit.flags().params_synced);
        assert!(!fit.is_complete());
        assert!(fit.flags().options_synced);
    }

    #[test]
    fn failed_mutation_leaves_state() {
        let mut fit = FitConfig::new("f");
        fit.add_parameter("a", 1.0, 0.1).unwrap();
        synced(&mut fit);
        assert!(fit.set_bounds("a", 3.0, 1.0).is_err());
        assert!(fit.set_value("b", 1.0).is_err());
        assert!(fit.is_complete());
        assert_eq!(fit.parameter("a").unwrap().bounds(), None);
    }

    #[test]
    fn invisible_options_keep_options_synced() {
        let mut fit = FitConfig::new("f");
        synced(&mut fit);
        fit.set_timeout(5).unwrap();
        assert!(fit.flags().options_synced);
        assert!(!fit.is_complete());
        fit.set_strategy(2).unwrap();
        assert!(!fit.flags().options_synced);
        assert!(fit.set_strategy(7).is_err());
        assert_eq!(fit.options().strategy, 2);
    }

    #[test]
    fn offsets_follow_term_order() {
        let s = store();
        let mut fit = FitConfig::new("f");
        fit.add_term("bkg", "line", MappingKind::Sequential).unwrap();
        fit.add_term("one", "unit", MappingKind::Null).unwrap();
        fit.add_term("sig", "gauss", MappingKind::Sequential).unwrap();
        fit.add_term("peak2", "gauss", MappingKind::Sequential).unwrap();
        let offsets: Vec<usize> = fit.terms().iter().map(FunctionTerm::offset).collect();
        assert_eq!(offsets, vec![0, 2, 2, 5]);

        let ds = fit.add_dataset(&s, DatasetSpec::histogram("h")).unwrap();
        for t in ["bkg", "sig", "peak2"] {
            fit.attach_term(ds, t).unwrap();
        }
        fit.detach_term(ds, "sig").unwrap();
        assert!(fit.term("sig").is_none());
        let offsets: Vec<usize> = fit.terms().iter().map(FunctionTerm::offset).collect();
        assert_eq!(offsets, vec![0, 2, 2]);
        for (i, t) in fit.terms().iter().enumerate() {
            let before: usize = fit.terms()[..i].iter().map(FunctionTerm::consumed).sum();
            assert_eq!(t.offset(), before);
        }
        assert_eq!(fit.required_parameters(), 5);
    }

    #[test]
    fn mapping_change_shifts_offsets() {
        let mut fit = FitConfig::new("f");
        fit.add_term("a", "gauss", MappingKind::Sequential).unwrap();
        fit.add_term("b", "line", MappingKind::Sequential).unwrap();
        synced(&mut fit);
        fit.set_mapping("a", MappingKind::Identical).unwrap();
        assert_eq!(fit.term("b").unwrap().offset(), 0);
        assert!(!fit.is_complete());
        assert!(matches!(fit.set_mapping("zz", MappingKind::Null), Err(FitError::UnknownName { .. })));
    }

    #[test]
    fn null_mapping_rejects_parameterised_functions() {
        let mut fit = FitConfig::new("f");
        assert!(matches!(
            fit.add_term("c", "const", MappingKind::Null),
            Err(FitError::InvalidOption(_))
        ));
        assert!(fit.terms().is_empty());

        fit.add_term("c", "const", MappingKind::Sequential).unwrap();
        synced(&mut fit);
        assert!(matches!(
            fit.set_mapping("c", MappingKind::Null),
            Err(FitError::InvalidOption(_))
        ));
        assert_eq!(fit.term("c").unwrap().mapping(), MappingKind::Sequential);
        assert_eq!(fit.required_parameters(), 1);
        assert!(fit.flags().params_synced);

        fit.add_term("one", "unit", MappingKind::Null).unwrap();
    }

    #[test]
    fn unknown_function_tag() {
        let mut fit = FitConfig::new("f");
        assert!(matches!(
            fit.add_term("x", "nope", MappingKind::Sequential),
            Err(FitError::UnknownFunction(_))
        ));
        assert!(fit.terms().is_empty());
    }

    #[test]
    fn dataset_validation() {
        let s = store();
        let mut fit = FitConfig::new("f");
        assert!(matches!(
            fit.add_dataset(&s, DatasetSpec::histogram("missing")),
            Err(FitError::UnknownDataSource(_))
        ));
        assert!(matches!(
            fit.add_dataset(&s, DatasetSpec::events("t", &["z"])),
            Err(FitError::InvalidDataset(_))
        ));
        let mut spec = DatasetSpec::events("t", &["x", "y"]);
        spec.weight = -1.0;
        assert!(matches!(fit.add_dataset(&s, spec), Err(FitError::NegativeWeight(_))));
        let i = fit.add_dataset(&s, DatasetSpec::events("t", &["x", "y"])).unwrap();
        assert_eq!(fit.dataset(i).unwrap().dims(), 2);
        assert!(fit.set_weight(i, -0.5).is_err());
        assert!(fit.set_filter(i, Some(Filter::Ranges(vec![(0.0, 1.0)]))).is_err());
        fit.set_filter(i, Some(Filter::Ranges(vec![(0.0, 1.0), (0.0, 9.0)]))).unwrap();
    }

    #[test]
    fn removing_dataset_releases_terms() {
        let s = store();
        let mut fit = FitConfig::new("f");
        fit.add_term("c", "const", MappingKind::Sequential).unwrap();
        let a = fit.add_dataset(&s, DatasetSpec::histogram("h")).unwrap();
        let b = fit.add_dataset(&s, DatasetSpec::histogram("h")).unwrap();
        fit.attach_term(a, "c").unwrap();
        fit.attach_term(b, "c").unwrap();
        assert_eq!(fit.term("c").unwrap().ref_count(), 2);
        assert!(fit.attach_term(a, "C").is_err());
        fit.remove_dataset(a).unwrap();
        assert_eq!(fit.term("c").unwrap().ref_count(), 1);
        fit.remove_dataset(0).unwrap();
        assert!(fit.term("c").is_none());
    }

    #[test]
    fn observers_see_lost_sync_and_destroy() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut fit = FitConfig::new("f");
        let log = Rc::clone(&seen);
        fit.subscribe(move |e| log.borrow_mut().push(*e));
        synced(&mut fit);
        fit.set_method(AccumulationMethod::Pearson).unwrap();
        fit.set_method(AccumulationMethod::LeastSquares).unwrap();
        synced(&mut fit);
        fit.destroy();
        assert_eq!(
            *seen.borrow(),
            vec![FitEvent::LostSync, FitEvent::LostSync, FitEvent::Destroyed]
        );
    }

    #[test]
    fn busy_lock_blocks_mutation() {
        let mut fit = FitConfig::new("f");
        let _guard = fit.busy.try_acquire().unwrap();
        assert_eq!(fit.add_parameter("a", 1.0, 0.1), Err(FitError::MinimizerBusy));
        assert!(fit.parameters().is_empty());
        assert_eq!(fit.set_method(AccumulationMethod::Pearson), Err(FitError::MinimizerBusy));
    }
}
