use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_abs_diff_eq;
use histfit::MinimizerSession;
use histfit::data::{Axis, DataSource, DataStore, Histogram, Table, sample_events};
use histfit::domain::{DatasetSpec, FitEvent, NormRegion};
use histfit::fit::{AccumulationMethod, MappingKind};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn flat_store() -> DataStore {
    let mut store = DataStore::new();
    store
        .insert_histogram("flat", Histogram::new_1d(10, 0.0, 10.0, vec![1.0; 10]).unwrap())
        .unwrap();
    store
}

/// Bin averages of `amp * exp(-((x - mean) / sigma)² / 2)` over 20 bins on [-5, 5].
fn peak_store(amp: f64, mean: f64, sigma: f64) -> DataStore {
    let axis = Axis::new(20, -5.0, 5.0);
    let contents: Vec<f64> = (0..20)
        .map(|i| {
            let (lo, w) = (axis.edge(i), axis.width());
            let n = 200;
            (0..n)
                .map(|k| {
                    let x = lo + w * (k as f64 + 0.5) / n as f64;
                    amp * (-0.5 * ((x - mean) / sigma).powi(2)).exp()
                })
                .sum::<f64>()
                / n as f64
        })
        .collect();
    let mut store = DataStore::new();
    store
        .insert_histogram("peak", Histogram::new(vec![axis], contents, None).unwrap())
        .unwrap();
    store
}

fn peak_session(store: &DataStore) -> MinimizerSession {
    let mut session = MinimizerSession::default();
    let mut fit = session.new_config("peak");
    fit.add_parameter("amp", 80.0, 5.0).unwrap();
    fit.add_parameter("mean", 0.0, 0.2).unwrap();
    fit.add_parameter("sigma", 1.0, 0.1).unwrap();
    fit.set_bounds("sigma", 0.1, 5.0).unwrap();
    fit.add_term("g", "gauss", MappingKind::Sequential).unwrap();
    let ds = fit.add_dataset(store, DatasetSpec::histogram("peak")).unwrap();
    fit.attach_term(ds, "g").unwrap();
    fit.set_method(AccumulationMethod::LeastSquares).unwrap();
    fit.set_strategy(2).unwrap();
    session.bind(fit).unwrap();
    session
}

#[test]
fn unit_model_on_flat_histogram_fits_exactly() {
    let store = flat_store();
    let mut session = MinimizerSession::default();
    let mut fit = session.new_config("flat");
    fit.add_term("one", "unit", MappingKind::Null).unwrap();
    let ds = fit.add_dataset(&store, DatasetSpec::histogram("flat")).unwrap();
    fit.attach_term(ds, "one").unwrap();
    fit.set_method(AccumulationMethod::LeastSquaresUnweighted).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&events);
    fit.subscribe(move |e| seen.borrow_mut().push(*e));
    session.bind(fit).unwrap();

    let status = session.sync_and_run(&store).unwrap();
    assert!(status.error.is_none());
    assert!(session.is_complete());
    assert_abs_diff_eq!(status.fmin, 0.0, epsilon = 1e-12);

    let fit = session.current().unwrap();
    let points = fit.dataset(0).unwrap().points().unwrap();
    assert_eq!(points.len(), 10);
    for p in points {
        assert_abs_diff_eq!(p.fit, 1.0, epsilon = 1e-12);
    }
    assert_eq!(fit.dataset(0).unwrap().summary().n_used, 10);
    assert_eq!(*events.borrow(), vec![FitEvent::Completed]);
}

#[test]
fn gaussian_peak_is_recovered() {
    let store = peak_store(100.0, 0.5, 1.2);
    let mut session = peak_session(&store);
    let status = session.sync_and_run(&store).unwrap();
    assert!(status.error.is_none(), "{:?}", status.error);
    assert!(session.is_complete());

    let fit = session.current().unwrap();
    let value = |name: &str| fit.parameter(name).unwrap().value();
    assert!((value("amp") - 100.0).abs() < 1.0, "amp = {}", value("amp"));
    assert!((value("mean") - 0.5).abs() < 0.02, "mean = {}", value("mean"));
    assert!((value("sigma") - 1.2).abs() < 0.02, "sigma = {}", value("sigma"));

    // Errors and covariance are captured for all three free parameters.
    assert!(fit.parameter("mean").unwrap().error() > 0.0);
    let cov = fit.covariance().unwrap();
    assert_eq!(cov.indices.len(), 3);
    assert!(cov.get(1, 1).unwrap() > 0.0);
    assert!(status.cov_quality >= 1);
    assert_eq!(status.n_free, 3);
}

#[test]
fn fitted_shape_tabulates_to_a_consistent_cdf() {
    let store = peak_store(100.0, 0.5, 1.2);
    let mut session = peak_session(&store);
    session.sync_and_run(&store).unwrap();
    let table = session.current().unwrap().tabulate_cdf(0).unwrap();

    let (lo, hi) = table.range();
    let range = hi - lo;
    assert_eq!((lo, hi), (-5.0, 5.0));
    for k in 0..1000 {
        let x = lo + range * (k as f64 + 0.5) / 1000.0;
        let back = table.inverse_cdf(table.cdf(x));
        assert!((back - x).abs() < 1e-6 * range, "x={x} back={back}");
    }

    // Samples from the fitted shape center on the fitted mean.
    let mut rng = StdRng::seed_from_u64(11);
    let xs = sample_events(&table, 20_000, &mut rng);
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    assert!((mean - 0.5).abs() < 0.05, "mean = {mean}");
}

#[test]
fn fitted_values_replay_into_the_store() {
    let mut store = peak_store(100.0, 0.5, 1.2);
    let mut session = peak_session(&store);
    session.sync_and_run(&store).unwrap();

    let fit = session.current().unwrap();
    fit.replay_fitted(0, &mut store, "peak_fit").unwrap();
    let replayed = store.histogram("peak_fit").unwrap();
    let data = store.histogram("peak").unwrap();
    assert_eq!(replayed.axes, data.axes);
    for (f, d) in replayed.contents.iter().zip(&data.contents) {
        assert!((f - d).abs() < 0.5, "fit {f} data {d}");
    }
}

#[test]
fn extended_unbinned_fit_recovers_the_yield() {
    // 40 events spread over [0, 4]; a flat density `n / 4` integrates to `n`.
    let xs: Vec<f64> = (0..40).map(|i| 0.05 + 0.1 * i as f64).collect();
    let mut store = DataStore::new();
    store.insert_table("ev", Table::from_columns([("x", xs)]).unwrap()).unwrap();

    let mut session = MinimizerSession::default();
    let mut fit = session.new_config("yield");
    fit.add_parameter("density", 5.0, 1.0).unwrap();
    fit.set_bounds("density", 0.1, 100.0).unwrap();
    fit.add_term("flat", "const", MappingKind::Sequential).unwrap();
    let mut spec = DatasetSpec::events("ev", &["x"]);
    spec.method = Some(AccumulationMethod::ExtendedMaxLikelihood);
    spec.normalization = NormRegion::new(vec![Axis::new(8, 0.0, 4.0)]);
    let ds = fit.add_dataset(&store, spec).unwrap();
    fit.attach_term(ds, "flat").unwrap();
    session.bind(fit).unwrap();

    let status = session.sync_and_run(&store).unwrap();
    assert!(status.error.is_none(), "{:?}", status.error);
    let density = session.current().unwrap().parameter("density").unwrap().value();
    // -2 Σ ln d + 2 · 4 d is smallest at d = 40 / 4.
    assert!((density - 10.0).abs() < 0.1, "density = {density}");
}

#[test]
fn extended_unbinned_fit_without_region_is_not_addressable() {
    let mut store = DataStore::new();
    store
        .insert_table("ev", Table::from_columns([("x", vec![0.5, 1.5])]).unwrap())
        .unwrap();
    assert!(store.table("ev").is_some());

    let mut session = MinimizerSession::default();
    let mut fit = session.new_config("no-region");
    fit.add_parameter("density", 1.0, 0.1).unwrap();
    fit.add_term("flat", "const", MappingKind::Sequential).unwrap();
    let ds = fit.add_dataset(&store, DatasetSpec::events("ev", &["x"])).unwrap();
    fit.attach_term(ds, "flat").unwrap();
    fit.set_method(AccumulationMethod::ExtendedMaxLikelihood).unwrap();
    session.bind(fit).unwrap();

    let status = session.sync_and_run(&store).unwrap();
    assert_eq!(
        status.error,
        Some(histfit::FitError::NoNormalizationRegion { dataset: 0 })
    );
    assert!(!session.is_complete());
}
