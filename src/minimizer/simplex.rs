//! Bundled minimizer: bounded Nelder–Mead over the free parameters, followed
//! by a numerical Hessian for errors and covariance.

use nalgebra::DMatrix;

use crate::domain::PRECISION_FLOOR;
use crate::error::{FitError, Result};
use crate::minimizer::{
    AsymmetricErrors, CallMode, CallReply, CallRequest, FitCallback, Minimizer, MinimizerOption,
    MinimizerQuery, MinimizerStatus, ParameterDecl, ParameterInfo,
};

/// Convergence tolerance; the run stops when `edm < 0.002 * TOLERANCE * error_def`.
pub const TOLERANCE: f64 = 0.1;

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Results of the last run.
#[derive(Debug, Clone, Default)]
pub struct SimplexState {
    status: MinimizerStatus,
    decls: Vec<ParameterDecl>,
    values: Vec<f64>,
    errors: Vec<f64>,
    /// Declaration indices of free parameters in internal order.
    free: Vec<usize>,
    covariance: Option<DMatrix<f64>>,
    global_cc: Vec<f64>,
}

impl MinimizerQuery for SimplexState {
    fn current_status(&self) -> MinimizerStatus {
        self.status
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
        let decl = self.decls.get(index)?;
        let internal = self.free.iter().position(|&k| k == index);
        Some(ParameterInfo {
            name: decl.name.clone(),
            value: self.values.get(index).copied().unwrap_or(decl.value),
            error: self.errors.get(index).copied().unwrap_or(0.0),
            bounds: decl.bounds,
            internal_index: internal.map(|i| i + 1),
        })
    }

    fn asymmetric_errors(&self, index: usize) -> Option<AsymmetricErrors> {
        let internal = self.free.iter().position(|&k| k == index)?;
        let e = self.errors.get(index).copied().unwrap_or(0.0);
        Some(AsymmetricErrors {
            plus: e,
            minus: -e,
            parabolic: e,
            global_cc: self.global_cc.get(internal).copied().unwrap_or(0.0),
        })
    }

    fn covariance(&self, dim: usize) -> Option<DMatrix<f64>> {
        let cov = self.covariance.as_ref()?;
        if dim > cov.nrows() {
            return None;
        }
        Some(cov.view((0, 0), (dim, dim)).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct SimplexMinimizer {
    decls: Vec<ParameterDecl>,
    error_def: f64,
    verbosity: u8,
    strategy: u8,
    precision: f64,
    use_gradient: bool,
    max_calls: Option<usize>,
    state: SimplexState,
}

impl Default for SimplexMinimizer {
    fn default() -> Self {
        Self {
            decls: Vec::new(),
            error_def: 1.0,
            verbosity: 0,
            strategy: 1,
            precision: PRECISION_FLOOR,
            use_gradient: false,
            max_calls: None,
            state: SimplexState::default(),
        }
    }
}

impl SimplexMinimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declared(&self) -> &[ParameterDecl] {
        &self.decls
    }

    /// Default call budget for `n` free parameters.
    pub fn default_max_calls(n: usize) -> usize {
        200 + 100 * n + 5 * n * n
    }
}

impl MinimizerQuery for SimplexMinimizer {
    fn current_status(&self) -> MinimizerStatus {
        self.state.current_status()
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
        self.state.parameter_info(index)
    }

    fn asymmetric_errors(&self, index: usize) -> Option<AsymmetricErrors> {
        self.state.asymmetric_errors(index)
    }

    fn covariance(&self, dim: usize) -> Option<DMatrix<f64>> {
        self.state.covariance(dim)
    }
}

impl Minimizer for SimplexMinimizer {
    fn reset(&mut self) {
        self.decls.clear();
        self.state = SimplexState::default();
    }

    fn push_parameter(&mut self, decl: ParameterDecl) -> Result<()> {
        if !(decl.step.is_finite() && decl.step >= 0.0) {
            return Err(FitError::InvalidStep(decl.step));
        }
        if let Some((lo, hi)) = decl.bounds {
            if !(lo < hi) {
                return Err(FitError::InvalidBound { lo, hi });
            }
        }
        match decl.index {
            i if i < self.decls.len() => self.decls[i] = decl,
            i if i == self.decls.len() => self.decls.push(decl),
            i => {
                return Err(FitError::Minimizer(format!(
                    "parameter index {i} skips past {} declared parameters",
                    self.decls.len()
                )));
            }
        }
        Ok(())
    }

    fn push_option(&mut self, option: MinimizerOption) -> Result<()> {
        match option {
            MinimizerOption::ErrorDef(v) if v > 0.0 => self.error_def = v,
            MinimizerOption::Verbosity(v) => self.verbosity = v,
            MinimizerOption::Strategy(s) if s <= 2 => self.strategy = s,
            MinimizerOption::Precision(p) if p >= PRECISION_FLOOR && p < 1.0 => self.precision = p,
            MinimizerOption::UseGradient(g) => self.use_gradient = g,
            other => return Err(FitError::InvalidOption(format!("{other:?}"))),
        }
        Ok(())
    }

    fn set_max_calls(&mut self, max_calls: Option<usize>) {
        self.max_calls = max_calls;
    }

    fn run(&mut self, callback: &mut dyn FitCallback) -> Result<()> {
        let free: Vec<usize> = (0..self.decls.len())
            .filter(|&i| self.decls[i].step > 0.0)
            .collect();
        let n = free.len();
        let start: Vec<f64> = self
            .decls
            .iter()
            .map(|d| clamp(d.value, d.bounds))
            .collect();
        let max_calls = self.max_calls.unwrap_or(Self::default_max_calls(n));

        let mut runner = Runner {
            callback,
            decls: &self.decls,
            free: &free,
            full: start.clone(),
            n_calls: 0,
            stop_budget: None,
            gradient: self.use_gradient.then(|| vec![0.0; start.len()]),
        };
        runner.call(&start, CallMode::Init, false, None);

        let x0: Vec<f64> = free.iter().map(|&i| start[i]).collect();
        let steps: Vec<f64> = free.iter().map(|&i| self.decls[i].step).collect();
        let threshold = 0.002 * TOLERANCE * self.error_def;

        let mut outcome = nelder_mead(&mut runner, &x0, &steps, threshold, max_calls, self.verbosity);
        for _ in 0..self.strategy {
            if outcome.stopped || outcome.exhausted || n == 0 {
                break;
            }
            let shrunk: Vec<f64> = steps.iter().map(|s| s * 0.1).collect();
            let again = nelder_mead(&mut runner, &outcome.x, &shrunk, threshold, max_calls, self.verbosity);
            if again.f <= outcome.f {
                outcome = NelderMeadOutcome {
                    edm: again.edm.max(outcome.f - again.f),
                    ..again
                };
            } else {
                outcome.stopped = again.stopped;
                outcome.exhausted = again.exhausted;
            }
        }
        if outcome.exhausted {
            tracing::warn!(calls = runner.n_calls, "simplex stopped at the call limit");
        }

        let mut state = SimplexState {
            decls: self.decls.clone(),
            free: free.clone(),
            ..SimplexState::default()
        };
        let best = runner.expand(&outcome.x);
        let mut cov_quality = 0;

        if !outcome.stopped && n > 0 {
            let hessian = numerical_hessian(&mut runner, &outcome.x, outcome.f, &steps, self.precision);
            if let Some((h_cov, quality)) = invert_hessian(&hessian) {
                let cov = h_cov * (2.0 * self.error_def);
                state.global_cc = global_correlations(&cov);
                state.errors = vec![0.0; self.decls.len()];
                for (k, &i) in free.iter().enumerate() {
                    state.errors[i] = cov[(k, k)].max(0.0).sqrt();
                }
                state.covariance = Some(cov);
                cov_quality = quality;
            } else {
                tracing::warn!("Hessian could not be inverted; no covariance");
            }
        }
        // Leave the callback's view at the minimum, stopped or not.
        let fmin = runner.call(&best, CallMode::Evaluate, false, None);

        state.values = best.clone();
        state.status = MinimizerStatus {
            fmin,
            edm: outcome.edm,
            error_def: self.error_def,
            n_free: n,
            n_declared: self.decls.len(),
            cov_quality,
            n_calls: runner.n_calls,
        };
        if self.verbosity >= 1 {
            tracing::info!(
                fmin,
                edm = outcome.edm,
                calls = runner.n_calls,
                cov_quality,
                "simplex finished"
            );
        }

        runner.call(&best, CallMode::Finalize, false, Some(&state));
        self.state = state;
        Ok(())
    }
}

fn clamp(v: f64, bounds: Option<(f64, f64)>) -> f64 {
    match bounds {
        Some((lo, hi)) => v.clamp(lo, hi),
        None => v,
    }
}

struct Runner<'a> {
    callback: &'a mut dyn FitCallback,
    decls: &'a [ParameterDecl],
    free: &'a [usize],
    full: Vec<f64>,
    n_calls: usize,
    /// Iterations still allowed after the callback asked to stop.
    stop_budget: Option<usize>,
    gradient: Option<Vec<f64>>,
}

impl Runner<'_> {
    /// Full parameter vector with the free entries taken from `x`.
    fn expand(&self, x: &[f64]) -> Vec<f64> {
        let mut full = self.full.clone();
        for (&i, &v) in self.free.iter().zip(x) {
            full[i] = clamp(v, self.decls[i].bounds);
        }
        full
    }

    fn call(
        &mut self,
        params: &[f64],
        mode: CallMode,
        in_loop: bool,
        query: Option<&dyn MinimizerQuery>,
    ) -> f64 {
        let gradient = match (&mut self.gradient, mode) {
            (Some(g), CallMode::Evaluate) => Some(g.as_mut_slice()),
            _ => None,
        };
        let CallReply { value, stop_after } = self.callback.call(CallRequest {
            params,
            mode,
            gradient,
            in_loop,
            query,
        });
        if mode == CallMode::Evaluate {
            self.n_calls += 1;
        }
        if let Some(k) = stop_after {
            self.stop_budget = Some(self.stop_budget.map_or(k, |b| b.min(k)));
        }
        if value.is_finite() { value } else { f64::MAX }
    }

    fn eval(&mut self, x: &[f64]) -> f64 {
        let full = self.expand(x);
        self.call(&full, CallMode::Evaluate, true, None)
    }

    fn stop_requested(&self) -> bool {
        self.stop_budget == Some(0)
    }
}

struct NelderMeadOutcome {
    x: Vec<f64>,
    f: f64,
    edm: f64,
    stopped: bool,
    exhausted: bool,
}

fn nelder_mead(
    runner: &mut Runner<'_>,
    x0: &[f64],
    steps: &[f64],
    threshold: f64,
    max_calls: usize,
    verbosity: u8,
) -> NelderMeadOutcome {
    let n = x0.len();
    let bounds: Vec<Option<(f64, f64)>> = runner.free.iter().map(|&i| runner.decls[i].bounds).collect();
    let project = |x: &mut [f64]| {
        for (v, b) in x.iter_mut().zip(&bounds) {
            *v = clamp(*v, *b);
        }
    };

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    let mut first = x0.to_vec();
    project(&mut first);
    simplex.push(first);
    for k in 0..n {
        let mut v = simplex[0].clone();
        v[k] += steps[k];
        if let Some((_, hi)) = bounds[k] {
            if v[k] > hi {
                v[k] = simplex[0][k] - steps[k];
            }
        }
        project(&mut v);
        simplex.push(v);
    }
    let mut f: Vec<f64> = Vec::with_capacity(n + 1);
    for v in &simplex {
        f.push(runner.eval(v));
    }

    let mut stopped = false;
    let mut exhausted = false;
    let mut iteration = 0usize;
    loop {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| f[a].total_cmp(&f[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        f = order.iter().map(|&i| f[i]).collect();

        let edm = f[n] - f[0];
        if verbosity >= 2 {
            tracing::debug!(iteration, fmin = f[0], edm, calls = runner.n_calls, "simplex step");
        }
        if n == 0 || edm < threshold {
            break;
        }
        if runner.stop_requested() {
            stopped = true;
            break;
        }
        if runner.n_calls >= max_calls {
            exhausted = true;
            break;
        }
        if let Some(b) = runner.stop_budget.as_mut() {
            *b -= 1;
        }
        iteration += 1;

        let mut centroid = vec![0.0; n];
        for v in &simplex[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let toward = |coef: f64| -> Vec<f64> {
            let mut p: Vec<f64> = centroid
                .iter()
                .zip(&simplex[n])
                .map(|(c, w)| c + coef * (c - w))
                .collect();
            project(&mut p);
            p
        };

        let xr = toward(REFLECT);
        let fr = runner.eval(&xr);
        if fr < f[0] {
            let xe = toward(EXPAND);
            let fe = runner.eval(&xe);
            if fe < fr {
                simplex[n] = xe;
                f[n] = fe;
            } else {
                simplex[n] = xr;
                f[n] = fr;
            }
        } else if fr < f[n - 1] {
            simplex[n] = xr;
            f[n] = fr;
        } else {
            let (xc, fc) = if fr < f[n] {
                let xc = toward(CONTRACT * REFLECT);
                let fc = runner.eval(&xc);
                (xc, fc)
            } else {
                let xc = toward(-CONTRACT);
                let fc = runner.eval(&xc);
                (xc, fc)
            };
            if fc < f[n].min(fr) {
                simplex[n] = xc;
                f[n] = fc;
            } else {
                let best = simplex[0].clone();
                for k in 1..=n {
                    let mut v: Vec<f64> = best
                        .iter()
                        .zip(&simplex[k])
                        .map(|(b, x)| b + SHRINK * (x - b))
                        .collect();
                    project(&mut v);
                    f[k] = runner.eval(&v);
                    simplex[k] = v;
                }
            }
        }
    }

    NelderMeadOutcome {
        edm: f[n] - f[0],
        x: simplex.swap_remove(0),
        f: f[0],
        stopped,
        exhausted,
    }
}

/// Central-difference Hessian of the objective over the free parameters.
fn numerical_hessian(
    runner: &mut Runner<'_>,
    x: &[f64],
    fx: f64,
    steps: &[f64],
    precision: f64,
) -> DMatrix<f64> {
    let n = x.len();
    let scale = precision.powf(0.25);
    let h: Vec<f64> = x
        .iter()
        .zip(steps)
        .map(|(v, s)| (scale * v.abs().max(*s)).max(1e-10))
        .collect();
    let mut at = |d: &[(usize, f64)]| {
        let mut p = x.to_vec();
        for &(k, s) in d {
            p[k] += s;
        }
        runner.eval(&p)
    };

    let mut hess = DMatrix::zeros(n, n);
    for i in 0..n {
        let fp = at(&[(i, h[i])]);
        let fm = at(&[(i, -h[i])]);
        hess[(i, i)] = (fp - 2.0 * fx + fm) / (h[i] * h[i]);
        for j in 0..i {
            let fpp = at(&[(i, h[i]), (j, h[j])]);
            let fpm = at(&[(i, h[i]), (j, -h[j])]);
            let fmp = at(&[(i, -h[i]), (j, h[j])]);
            let fmm = at(&[(i, -h[i]), (j, -h[j])]);
            let v = (fpp - fpm - fmp + fmm) / (4.0 * h[i] * h[j]);
            hess[(i, j)] = v;
            hess[(j, i)] = v;
        }
    }
    hess
}

/// Invert via Cholesky, adding diagonal damping when the Hessian is not
/// positive definite. Returns the inverse and the covariance quality.
fn invert_hessian(hessian: &DMatrix<f64>) -> Option<(DMatrix<f64>, u8)> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n)
        .map(|i| hessian[(i, i)].abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    for attempt in 0..10 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            let quality = if attempt == 0 { 3 } else { 2 };
            return Some((chol.solve(&identity), quality));
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }

    // Diagonal approximation.
    let mut diag = DMatrix::zeros(n, n);
    for i in 0..n {
        let h = hessian[(i, i)];
        if !(h.is_finite() && h > 0.0) {
            return None;
        }
        diag[(i, i)] = 1.0 / h;
    }
    Some((diag, 1))
}

/// `ρ_k = sqrt(1 - 1/(V_kk · (V⁻¹)_kk))`.
fn global_correlations(cov: &DMatrix<f64>) -> Vec<f64> {
    let n = cov.nrows();
    let Some(inv) = cov.clone().try_inverse() else {
        return vec![0.0; n];
    };
    (0..n)
        .map(|k| {
            let d = cov[(k, k)] * inv[(k, k)];
            if d > 0.0 { (1.0 - 1.0 / d).max(0.0).sqrt() } else { 0.0 }
        })
        .collect()
}
