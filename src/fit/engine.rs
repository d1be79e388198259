//! The accumulation engine: the callback the minimizer drives.
//!
//! `Init` validates the fit and builds every dataset's integration cache,
//! `Evaluate` maps the flat parameters onto the terms, evaluates the model on
//! each cache and sums the method's statistic into the objective, `Finalize`
//! captures results and marks the fit complete when nothing went wrong.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use crate::data::DataSource;
use crate::domain::{DatasetLayout, FitConfig, FunctionTerm};
use crate::error::{FitError, PointError, Result};
use crate::fit::{
    AccumulationMethod, TimeoutClock, apply_fitted, build_cache, capture_results,
};
use crate::minimizer::{CallMode, CallReply, CallRequest, FitCallback, MinimizerQuery};

pub struct AccumulationEngine<'a> {
    fit: &'a mut FitConfig,
    source: &'a dyn DataSource,
    idle: Option<&'a mut dyn FnMut()>,
    clock: Option<TimeoutClock>,
    /// Init failed; evaluations return 0 until the run ends.
    inert: bool,
    in_run: bool,
    /// Problem kinds already reported this run.
    reported: BTreeSet<(usize, PointError)>,
    /// Unignored evaluation problems at the last evaluation.
    pending_errors: usize,
    gradient_warned: bool,
    started: Instant,
    n_calls: usize,
}

impl<'a> AccumulationEngine<'a> {
    pub fn new(fit: &'a mut FitConfig, source: &'a dyn DataSource) -> Self {
        Self {
            fit,
            source,
            idle: None,
            clock: None,
            inert: false,
            in_run: false,
            reported: BTreeSet::new(),
            pending_errors: 0,
            gradient_warned: false,
            started: Instant::now(),
            n_calls: 0,
        }
    }

    /// Hook run between in-run evaluations for cooperative event processing.
    pub fn with_idle_hook(mut self, hook: &'a mut dyn FnMut()) -> Self {
        self.idle = Some(hook);
        self
    }

    /// Objective at `params` outside a minimizer run. Caches are built on
    /// demand and the mapped parameters are committed to the terms.
    pub fn evaluate_once(&mut self, params: &[f64]) -> Result<f64> {
        self.validate(false)?;
        self.ensure_caches()?;
        self.reported.clear();
        Ok(self.evaluate(params, false))
    }

    fn init(&mut self) {
        self.in_run = true;
        self.inert = false;
        self.reported.clear();
        self.pending_errors = 0;
        self.gradient_warned = false;
        self.started = Instant::now();
        self.n_calls = 0;
        self.fit.status = Default::default();
        self.fit.covariance = None;
        self.fit.invalidate();
        self.clock = self.fit.options.timeout().map(TimeoutClock::new);

        self.fit.free_caches();
        let ready = self.validate(true).and_then(|()| self.ensure_caches());
        if let Err(e) = ready {
            tracing::error!(fit = self.fit.name(), error = %e, "fit cannot be evaluated");
            self.fit.status.error = Some(e);
            self.inert = true;
        } else {
            tracing::debug!(
                fit = self.fit.name(),
                datasets = self.fit.datasets.len(),
                parameters = self.fit.parameters.len(),
                "run initialised"
            );
        }
    }

    /// Check the fit can be evaluated at all.
    fn validate(&self, require_sync: bool) -> Result<()> {
        let fit = &*self.fit;
        if require_sync {
            if !fit.flags.params_synced {
                return Err(FitError::ParamsNotSynced);
            }
            if !fit.flags.options_synced {
                return Err(FitError::OptionsNotSynced);
            }
        }
        if !fit.datasets.iter().any(|d| d.is_enabled()) {
            return Err(FitError::NoDatasets);
        }
        for t in &fit.terms {
            t.mapping().check(t.n_params())?;
        }
        let needed = fit.required_parameters();
        if needed > fit.parameters.len() {
            return Err(FitError::ParameterCountMismatch {
                needed,
                declared: fit.parameters.len(),
            });
        }
        for (i, ds) in fit.datasets.iter().enumerate().filter(|(_, d)| d.is_enabled()) {
            let method = ds.effective_method(fit.method);
            if method.requires_binned() && !ds.is_binned() {
                return Err(FitError::IncompatibleMethod {
                    dataset: i,
                    method: method.tag(),
                    reason: "needs binned data",
                });
            }
            let has_errors = !matches!(ds.layout(), DatasetLayout::Points { error: None, .. });
            if method.requires_errors() && !has_errors {
                return Err(FitError::IncompatibleMethod {
                    dataset: i,
                    method: method.tag(),
                    reason: "needs point errors",
                });
            }
        }
        Ok(())
    }

    fn ensure_caches(&mut self) -> Result<()> {
        let method = self.fit.method;
        for (i, ds) in self.fit.datasets.iter_mut().enumerate() {
            if !ds.is_enabled() || ds.cache.is_some() {
                continue;
            }
            let cache = build_cache(i, ds, ds.effective_method(method), self.source)?;
            tracing::debug!(dataset = i, points = cache.points.len(), grid = cache.grid.len(), "cache built");
            ds.cache = Some(cache);
        }
        Ok(())
    }

    fn evaluate(&mut self, params: &[f64], in_loop: bool) -> f64 {
        if self.inert {
            return 0.0;
        }
        let ignore = self.fit.options.ignore_function_errors;
        let fit_method = self.fit.method;
        let terms = &mut self.fit.terms;
        let index: HashMap<&str, usize> = terms.iter().enumerate().map(|(i, t)| (t.key(), i)).collect();

        let mut total = 0.0;
        let mut pending = 0;
        for (d, ds) in self.fit.datasets.iter_mut().enumerate() {
            if !ds.is_enabled() {
                continue;
            }
            let method = ds.effective_method(fit_method);
            let binned = ds.is_binned();
            let members: Vec<(&FunctionTerm, &[f64])> = ds
                .terms
                .iter()
                .filter_map(|k| index.get(k.as_str()))
                .map(|&i| (&terms[i], terms[i].view(params)))
                .collect();
            let Some(cache) = ds.cache.as_mut() else {
                continue;
            };

            cache.grid.evaluate(|x| {
                members
                    .iter()
                    .try_fold(0.0, |acc, (term, view)| Ok(acc + term.eval(x, view)?))
            });
            apply_fitted(cache);

            let mut problems: BTreeMap<PointError, usize> = BTreeMap::new();
            let mut sum = 0.0;
            let mut used = 0;
            for p in cache.points.iter_mut().filter(|p| !p.filtered) {
                if let Some(e) = p.error {
                    *problems.entry(e).or_default() += 1;
                    continue;
                }
                let c = method.contribution(p.fit, p, binned);
                match c.error {
                    Some(e) => {
                        p.error = Some(e);
                        *problems.entry(e).or_default() += 1;
                        if ignore {
                            sum += c.value;
                        }
                    }
                    None => {
                        sum += c.value;
                        used += 1;
                    }
                }
            }
            if method == AccumulationMethod::ExtendedMaxLikelihood && !binned {
                if let Some((integral, skipped)) = cache.grid.normalization() {
                    sum += 2.0 * integral;
                    if skipped > 0 {
                        *problems.entry(PointError::Function).or_default() += skipped;
                    }
                }
            }

            let n_errors: usize = problems.values().sum();
            let objective = ds.weight * sum;
            ds.summary.objective = objective;
            ds.summary.n_used = used;
            ds.summary.n_errors = n_errors;
            total += objective;
            if !ignore {
                pending += n_errors;
                report_once(&mut self.reported, d, &problems);
            }
        }

        self.pending_errors = pending;
        if !in_loop {
            for t in terms.iter_mut() {
                t.best_params = t.view(params).to_vec();
            }
        }
        total
    }

    fn finalize(&mut self, query: Option<&dyn MinimizerQuery>) {
        self.in_run = false;
        if let Some(q) = query {
            self.fit.n_free_used = q.current_status().n_free;
            capture_results(self.fit, q);
        }
        let status = &mut self.fit.status;
        status.n_calls = self.n_calls;
        status.elapsed = self.started.elapsed();
        status.point_errors = self.pending_errors;
        if status.error.is_none() && self.pending_errors > 0 {
            status.error = Some(FitError::EvaluationErrors {
                count: self.pending_errors,
            });
        }

        match self.fit.status.error.clone() {
            None => {
                self.fit.mark_complete();
                tracing::info!(
                    fit = self.fit.name(),
                    fmin = self.fit.status.fmin,
                    calls = self.n_calls,
                    "fit complete"
                );
            }
            Some(e) => {
                tracing::error!(fit = self.fit.name(), error = %e, "fit left incomplete");
            }
        }
    }

    fn tick(&mut self) -> Option<usize> {
        let clock = self.clock.as_mut()?;
        if !clock.tick() {
            return None;
        }
        let seconds = clock.limit().as_secs();
        tracing::error!(seconds, "fit timed out");
        if self.fit.status.error.is_none() {
            self.fit.status.error = Some(FitError::Timeout { seconds });
        }
        Some(1)
    }
}

/// Warn about each problem kind of a dataset once per run.
fn report_once(
    reported: &mut BTreeSet<(usize, PointError)>,
    dataset: usize,
    problems: &BTreeMap<PointError, usize>,
) {
    for (&kind, &count) in problems {
        if reported.insert((dataset, kind)) {
            tracing::warn!(dataset, problem = %kind, points = count, "evaluation problem");
        }
    }
}

impl FitCallback for AccumulationEngine<'_> {
    fn call(&mut self, request: CallRequest<'_>) -> CallReply {
        match request.mode {
            CallMode::Init => {
                self.init();
                CallReply::default()
            }
            CallMode::Evaluate => {
                if let Some(g) = request.gradient {
                    if !self.gradient_warned {
                        tracing::warn!("gradients are not supported; returning zero");
                        self.gradient_warned = true;
                    }
                    g.fill(0.0);
                }
                let mut stop_after = None;
                if self.in_run && request.in_loop {
                    if let Some(hook) = self.idle.as_mut() {
                        hook();
                    }
                    stop_after = self.tick();
                }
                self.n_calls += 1;
                let value = self.evaluate(request.params, request.in_loop);
                CallReply { value, stop_after }
            }
            CallMode::Finalize => {
                self.finalize(request.query);
                CallReply::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataStore, Histogram};
    use crate::domain::{DatasetSpec, SyncFlags};
    use crate::fit::{LOG_DENSITY_FLOOR, MappingKind};
    use approx::assert_relative_eq;

    fn request(mode: CallMode, params: &[f64], in_loop: bool) -> CallRequest<'_> {
        CallRequest {
            params,
            mode,
            gradient: None,
            in_loop,
            query: None,
        }
    }

    fn mark_synced(fit: &mut FitConfig) {
        fit.flags = SyncFlags {
            params_synced: true,
            options_synced: true,
            complete: false,
        };
    }

    /// Two bins of 4 counts under `line`; at `[-1.5, 2.0]` the bin averages
    /// are -0.5 and 1.5.
    fn sloped_fit(store: &mut DataStore) -> FitConfig {
        store
            .insert_histogram("h", Histogram::new_1d(2, 0.0, 2.0, vec![4.0, 4.0]).unwrap())
            .unwrap();
        let mut fit = FitConfig::new("sloped");
        fit.add_parameter("a", -1.5, 0.1).unwrap();
        fit.add_parameter("b", 2.0, 0.1).unwrap();
        fit.add_term("l", "line", MappingKind::Sequential).unwrap();
        let ds = fit.add_dataset(store, DatasetSpec::histogram("h")).unwrap();
        fit.attach_term(ds, "l").unwrap();
        fit.set_method(AccumulationMethod::MaxLikelihood).unwrap();
        fit
    }

    fn run_once(fit: &mut FitConfig, store: &DataStore, params: &[f64]) {
        mark_synced(fit);
        let mut engine = AccumulationEngine::new(fit, store);
        engine.call(request(CallMode::Init, params, false));
        engine.call(request(CallMode::Evaluate, params, true));
        engine.call(request(CallMode::Evaluate, params, false));
        engine.call(request(CallMode::Finalize, params, false));
    }

    fn flat_fit(store: &mut DataStore) -> FitConfig {
        store
            .insert_histogram("h", Histogram::new_1d(10, 0.0, 10.0, vec![1.0; 10]).unwrap())
            .unwrap();
        let mut fit = FitConfig::new("flat");
        fit.add_term("one", "unit", MappingKind::Null).unwrap();
        let ds = fit.add_dataset(store, DatasetSpec::histogram("h")).unwrap();
        fit.attach_term(ds, "one").unwrap();
        fit.set_method(AccumulationMethod::LeastSquaresUnweighted).unwrap();
        fit
    }

    #[test]
    fn constant_model_matches_flat_histogram() {
        let mut store = DataStore::new();
        let mut fit = flat_fit(&mut store);
        let value = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[]).unwrap();
        assert_eq!(value, 0.0);
        let points = fit.dataset(0).unwrap().points().unwrap();
        assert!(points.iter().all(|p| p.fit == 1.0));
        assert_eq!(fit.dataset(0).unwrap().summary().n_used, 10);
    }

    #[test]
    fn init_failure_makes_evaluations_inert() {
        let mut store = DataStore::new();
        let mut fit = flat_fit(&mut store);
        let mut engine = AccumulationEngine::new(&mut fit, &store);
        engine.call(CallRequest {
            params: &[],
            mode: CallMode::Init,
            gradient: None,
            in_loop: false,
            query: None,
        });
        let reply = engine.call(CallRequest {
            params: &[],
            mode: CallMode::Evaluate,
            gradient: None,
            in_loop: true,
            query: None,
        });
        assert_eq!(reply.value, 0.0);
        assert_eq!(fit.status().error, Some(FitError::ParamsNotSynced));
    }

    #[test]
    fn parameter_shortfall_is_rejected() {
        let mut store = DataStore::new();
        let mut fit = flat_fit(&mut store);
        fit.add_term("line", "line", MappingKind::Sequential).unwrap();
        fit.attach_term(0, "line").unwrap();
        fit.add_parameter("a", 0.0, 0.1).unwrap();
        let err = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[0.0]).unwrap_err();
        assert_eq!(err, FitError::ParameterCountMismatch { needed: 2, declared: 1 });
    }

    #[test]
    fn unbinned_data_rejects_binned_methods() {
        let mut store = DataStore::new();
        store
            .insert_table("ev", crate::data::Table::from_columns([("x", vec![0.5])]).unwrap())
            .unwrap();
        let mut fit = FitConfig::new("f");
        fit.add_dataset(&store, DatasetSpec::events("ev", &["x"])).unwrap();
        let err = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[]).unwrap_err();
        assert!(matches!(err, FitError::IncompatibleMethod { dataset: 0, method: "lsq", .. }));
    }

    #[test]
    fn errored_points_contribute_nothing() {
        let mut store = DataStore::new();
        store
            .insert_histogram("h", Histogram::new(vec![crate::data::Axis::new(2, 0.0, 2.0)], vec![4.0, 4.0], Some(vec![0.0, 2.0])).unwrap())
            .unwrap();
        let mut fit = FitConfig::new("f");
        fit.add_parameter("c", 2.0, 0.1).unwrap();
        fit.add_term("c", "const", MappingKind::Sequential).unwrap();
        let ds = fit.add_dataset(&store, DatasetSpec::histogram("h")).unwrap();
        fit.attach_term(ds, "c").unwrap();

        let v = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[2.0]).unwrap();
        // Bin 0 has a zero error; only bin 1 counts: ((2-4)/2)² = 1.
        assert_relative_eq!(v, 1.0);
        let summary = fit.dataset(0).unwrap().summary();
        assert_eq!(summary.n_used, 1);
        assert_eq!(summary.n_errors, 1);
        assert_eq!(fit.term("c").unwrap().best_params(), &[2.0]);

        fit.set_ignore_function_errors(true).unwrap();
        let v = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[2.0]).unwrap();
        // The least-squares penalty for a zero error is 0.
        assert_relative_eq!(v, 1.0);
        assert_eq!(fit.dataset(0).unwrap().summary().n_used, 1);
    }

    #[test]
    fn weights_scale_dataset_objectives() {
        let mut store = DataStore::new();
        store
            .insert_histogram("h", Histogram::new_1d(2, 0.0, 2.0, vec![3.0, 3.0]).unwrap())
            .unwrap();
        let mut fit = FitConfig::new("f");
        fit.add_term("one", "unit", MappingKind::Null).unwrap();
        for w in [1.0, 0.5] {
            let ds = fit.add_dataset(&store, DatasetSpec::histogram("h")).unwrap();
            fit.attach_term(ds, "one").unwrap();
            fit.set_weight(ds, w).unwrap();
        }
        fit.set_method(AccumulationMethod::LeastSquaresUnweighted).unwrap();
        let v = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[]).unwrap();
        assert_relative_eq!(v, 8.0 + 4.0);
        fit.set_enabled(1, false).unwrap();
        let v = AccumulationEngine::new(&mut fit, &store).evaluate_once(&[]).unwrap();
        assert_relative_eq!(v, 8.0);
    }

    #[test]
    fn gradient_requests_get_zeros() {
        let mut store = DataStore::new();
        let mut fit = flat_fit(&mut store);
        fit.flags = SyncFlags {
            params_synced: true,
            options_synced: true,
            complete: false,
        };
        let mut engine = AccumulationEngine::new(&mut fit, &store);
        engine.call(CallRequest {
            params: &[],
            mode: CallMode::Init,
            gradient: None,
            in_loop: false,
            query: None,
        });
        let mut g = [7.0, 7.0];
        let reply = engine.call(CallRequest {
            params: &[],
            mode: CallMode::Evaluate,
            gradient: Some(&mut g),
            in_loop: true,
            query: None,
        });
        assert_eq!(reply.value, 0.0);
        assert_eq!(g, [0.0, 0.0]);
    }

    #[test]
    fn negative_density_is_charged_only_when_ignored() {
        let mut store = DataStore::new();
        let mut fit = sloped_fit(&mut store);
        let params = [-1.5, 2.0];
        let good_bin = -2.0 * 4.0 * 1.5f64.ln();

        let v = AccumulationEngine::new(&mut fit, &store).evaluate_once(&params).unwrap();
        assert_relative_eq!(v, good_bin, epsilon = 1e-9);
        let summary = fit.dataset(0).unwrap().summary();
        assert_eq!((summary.n_used, summary.n_errors), (1, 1));

        run_once(&mut fit, &store, &params);
        assert!(!fit.is_complete());
        assert_eq!(fit.status().error, Some(FitError::EvaluationErrors { count: 1 }));
        assert_eq!(fit.status().point_errors, 1);

        fit.set_ignore_function_errors(true).unwrap();
        let v = AccumulationEngine::new(&mut fit, &store).evaluate_once(&params).unwrap();
        let penalty = -2.0 * 4.0 * LOG_DENSITY_FLOOR;
        assert_relative_eq!(v, good_bin + penalty, epsilon = 1e-9);
        let summary = fit.dataset(0).unwrap().summary();
        assert_eq!((summary.n_used, summary.n_errors), (1, 1));

        run_once(&mut fit, &store, &params);
        assert!(fit.is_complete());
        assert_eq!(fit.status().error, None);
        assert_eq!(fit.status().point_errors, 0);
    }

    #[test]
    fn only_evaluations_outside_the_loop_commit_best_params() {
        let mut store = DataStore::new();
        let mut fit = sloped_fit(&mut store);
        AccumulationEngine::new(&mut fit, &store)
            .evaluate_once(&[1.0, 0.5])
            .unwrap();
        assert_eq!(fit.term("l").unwrap().best_params(), &[1.0, 0.5]);

        mark_synced(&mut fit);
        let mut engine = AccumulationEngine::new(&mut fit, &store);
        engine.call(request(CallMode::Init, &[1.0, 0.5], false));
        engine.call(request(CallMode::Evaluate, &[5.0, 0.0], true));
        assert_eq!(engine.fit.term("l").unwrap().best_params(), &[1.0, 0.5]);

        engine.call(request(CallMode::Evaluate, &[3.0, 0.25], false));
        assert_eq!(engine.fit.term("l").unwrap().best_params(), &[3.0, 0.25]);
    }

    #[test]
    fn null_mapped_parameterised_term_fails_validation() {
        let mut store = DataStore::new();
        let mut fit = sloped_fit(&mut store);
        fit.terms[0].mapping = MappingKind::Null;
        let err = AccumulationEngine::new(&mut fit, &store)
            .evaluate_once(&[1.0, 0.5])
            .unwrap_err();
        assert!(matches!(err, FitError::InvalidOption(_)));
    }

    #[test]
    fn all_disabled_datasets_count_as_none() {
        let mut store = DataStore::new();
        let mut fit = sloped_fit(&mut store);
        fit.set_enabled(0, false).unwrap();
        let err = AccumulationEngine::new(&mut fit, &store)
            .evaluate_once(&[1.0, 0.5])
            .unwrap_err();
        assert_eq!(err, FitError::NoDatasets);

        run_once(&mut fit, &store, &[1.0, 0.5]);
        assert_eq!(fit.status().error, Some(FitError::NoDatasets));
        assert!(!fit.is_complete());
    }
}
