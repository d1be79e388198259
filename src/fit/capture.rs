//! Result capture: copy the minimizer's results back into the fit.

use crate::domain::{Covariance, DataPoint, DatasetSubset, FitConfig, ParameterResult};
use crate::fit::AccumulationMethod;
use crate::math::basic_stats;
use crate::minimizer::MinimizerQuery;

/// Pull parameter values, errors and covariance from `query` and recompute
/// every dataset's summary. Leaves the fit's parameters in sync.
pub fn capture_results(fit: &mut FitConfig, query: &dyn MinimizerQuery) {
    let status = query.current_status();
    fit.status.fmin = status.fmin;
    fit.status.edm = status.edm;
    fit.status.error_def = status.error_def;
    fit.status.n_free = status.n_free;
    fit.status.n_declared = status.n_declared;
    fit.status.cov_quality = status.cov_quality;

    let mut free: Vec<(usize, usize)> = Vec::new();
    for (i, p) in fit.parameters.iter_mut().enumerate() {
        let Some(info) = query.parameter_info(i) else {
            p.result = None;
            continue;
        };
        p.value = info.value;
        if info.bounds != p.bounds {
            tracing::warn!(
                parameter = p.name(),
                declared = ?p.bounds,
                applied = ?info.bounds,
                "minimizer bounds differ from the fit's"
            );
        }
        p.result = Some(match info.internal_index {
            // The minimizer decides what was fixed.
            None => ParameterResult {
                bounds: info.bounds,
                ..ParameterResult::default()
            },
            Some(internal) => {
                free.push((internal, i));
                let asym = query.asymmetric_errors(i).unwrap_or_default();
                ParameterResult {
                    internal_index: Some(internal),
                    error: info.error,
                    minus_error: asym.minus,
                    plus_error: asym.plus,
                    global_cc: asym.global_cc,
                    bounds: info.bounds,
                }
            }
        });
    }

    free.sort_unstable();
    let indices: Vec<usize> = free.into_iter().map(|(_, i)| i).collect();
    fit.covariance = if indices.is_empty() {
        None
    } else {
        query.covariance(indices.len()).map(|matrix| Covariance { indices, matrix })
    };

    let method = fit.method;
    for ds in &mut fit.datasets {
        let m = ds.effective_method(method);
        summarize(ds, m);
    }
    fit.flags.params_synced = true;
}

/// Recompute data/fit statistics and χ² over a dataset's usable points.
pub fn summarize(ds: &mut DatasetSubset, method: AccumulationMethod) {
    let dims = ds.dims();
    let binned = ds.is_binned();
    let Some(points) = ds.points() else {
        return;
    };
    let usable: Vec<&DataPoint> = points.iter().filter(|p| p.is_usable()).collect();
    let data = basic_stats(dims, usable.iter().map(|p| (&p.coords[..], p.obs)));
    let fit = basic_stats(dims, usable.iter().map(|p| (&p.coords[..], p.fit)));
    let chi2 = usable.iter().map(|p| chi2_term(method, p, binned)).sum();
    let n_used = usable.len();

    let summary = &mut ds.summary;
    summary.data = data;
    summary.fit = fit;
    summary.chi2 = chi2;
    summary.n_used = n_used;
}

/// Goodness-of-fit contribution of one point.
fn chi2_term(method: AccumulationMethod, p: &DataPoint, binned: bool) -> f64 {
    let (obs, fit) = (p.obs, p.fit);
    match method {
        AccumulationMethod::LeastSquares => {
            if p.err > 0.0 {
                ((obs - fit) / p.err).powi(2)
            } else {
                0.0
            }
        }
        AccumulationMethod::LeastSquaresUnweighted => (obs - fit).powi(2),
        AccumulationMethod::Pearson => {
            if fit > 0.0 {
                (obs - fit).powi(2) / fit
            } else {
                0.0
            }
        }
        AccumulationMethod::MaxLikelihood | AccumulationMethod::ExtendedMaxLikelihood => {
            if !binned {
                return if fit > 0.0 { -2.0 * fit.ln() } else { 0.0 };
            }
            // Poisson deviance.
            let log_term = if obs > 0.0 && fit > 0.0 { obs * (obs / fit).ln() } else { 0.0 };
            2.0 * (fit - obs + log_term)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataStore, Histogram};
    use crate::domain::DatasetSpec;
    use crate::fit::{MappingKind, build_cache};
    use crate::minimizer::{AsymmetricErrors, MinimizerStatus, ParameterInfo};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    /// Two free parameters whose internal order is the reverse of declaration.
    struct Reversed;

    impl MinimizerQuery for Reversed {
        fn current_status(&self) -> MinimizerStatus {
            MinimizerStatus {
                fmin: 3.0,
                n_free: 2,
                n_declared: 3,
                cov_quality: 3,
                ..MinimizerStatus::default()
            }
        }

        fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
            let internal = match index {
                0 => Some(2),
                1 => None,
                2 => Some(1),
                _ => return None,
            };
            Some(ParameterInfo {
                name: format!("p{index}"),
                value: 10.0 + index as f64,
                error: 0.5,
                bounds: (index == 2).then_some((0.0, 20.0)),
                internal_index: internal,
            })
        }

        fn asymmetric_errors(&self, _index: usize) -> Option<AsymmetricErrors> {
            Some(AsymmetricErrors {
                plus: 0.6,
                minus: -0.4,
                parabolic: 0.5,
                global_cc: 0.1,
            })
        }

        fn covariance(&self, dim: usize) -> Option<DMatrix<f64>> {
            Some(DMatrix::from_fn(dim, dim, |i, j| (i * 10 + j) as f64))
        }
    }

    #[test]
    fn minimizer_decides_fixed_and_order() {
        let mut fit = FitConfig::new("f");
        for name in ["a", "b", "c"] {
            fit.add_parameter(name, 0.0, 1.0).unwrap();
        }
        fit.set_bounds("c", 0.0, 20.0).unwrap();
        capture_results(&mut fit, &Reversed);

        let a = fit.parameter("a").unwrap();
        assert_eq!(a.value(), 10.0);
        assert_eq!(a.result().unwrap().internal_index, Some(2));
        assert_eq!(a.result().unwrap().plus_error, 0.6);
        // Not fixed in the model, but the minimizer says so.
        let b = fit.parameter("b").unwrap();
        assert!(!b.is_fixed());
        assert_eq!(b.result().unwrap().internal_index, None);
        assert_eq!(b.error(), 0.0);
        assert_eq!(b.result().unwrap().bounds, None);
        let c = fit.parameter("c").unwrap();
        assert_eq!(c.result().unwrap().bounds, Some((0.0, 20.0)));
        assert_eq!(c.bounds(), Some((0.0, 20.0)));

        let cov = fit.covariance().unwrap();
        assert_eq!(cov.indices, vec![2, 0]);
        assert_eq!(cov.get(0, 2), Some(10.0));
        assert_eq!(fit.status().fmin, 3.0);
        assert!(fit.flags().params_synced);
    }

    #[test]
    fn dataset_summary_over_usable_points() {
        let mut store = DataStore::new();
        store
            .insert_histogram("h", Histogram::new_1d(2, 0.0, 2.0, vec![4.0, 1.0]).unwrap())
            .unwrap();
        let mut fit = FitConfig::new("f");
        fit.add_term("one", "unit", MappingKind::Null).unwrap();
        let i = fit.add_dataset(&store, DatasetSpec::histogram("h")).unwrap();
        fit.attach_term(i, "one").unwrap();

        let ds = &mut fit.datasets[0];
        let mut cache = build_cache(0, ds, AccumulationMethod::LeastSquares, &store).unwrap();
        for p in &mut cache.points {
            p.fit = 2.0;
        }
        ds.cache = Some(cache);
        summarize(ds, AccumulationMethod::LeastSquares);

        let s = ds.summary();
        assert_eq!(s.n_used, 2);
        // ((4-2)/2)² + ((1-2)/1)²
        assert_relative_eq!(s.chi2, 2.0);
        assert_relative_eq!(s.data.unwrap().mean[0], (0.5 * 4.0 + 1.5 * 1.0) / 5.0);
        assert_relative_eq!(s.fit.unwrap().mean[0], 1.0);
    }

    #[test]
    fn poisson_deviance_vanishes_at_data() {
        let p = DataPoint {
            fit: 3.0,
            ..DataPoint::new(&[0.0], 3.0, 1.0)
        };
        assert_relative_eq!(chi2_term(AccumulationMethod::MaxLikelihood, &p, true), 0.0);
    }
}
