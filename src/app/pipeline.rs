//! Shared "job pipeline" logic used by every `hfit` subcommand.
//!
//! job file -> data store + fit -> bind -> sync -> run -> (report / export / sample)

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::data::{DataStore, poisson_toy, sample_events};
use crate::domain::FitStatus;
use crate::error::AppError;
use crate::io::JobFile;
use crate::session::MinimizerSession;

/// A session with the job's fit bound to it, plus the job's data.
#[derive(Debug)]
pub struct Prepared {
    pub session: MinimizerSession,
    pub store: DataStore,
}

/// All computed outputs of a single `hfit fit` run.
#[derive(Debug)]
pub struct RunOutput {
    pub session: MinimizerSession,
    pub store: DataStore,
    pub status: FitStatus,
}

/// Load the job's data, configure its fit and bind it to a fresh session.
pub fn prepare(job: &JobFile) -> Result<Prepared, AppError> {
    let store = job.build_store()?;
    let mut session = MinimizerSession::default();
    let mut fit = session.new_config(&job.name);
    job.apply(&mut fit, &store)?;
    session.bind(fit)?;
    Ok(Prepared { session, store })
}

/// Execute the full job and return the computed outputs.
pub fn run_job(job: &JobFile) -> Result<RunOutput, AppError> {
    let Prepared { mut session, store } = prepare(job)?;
    let status = session.sync_and_run(&store)?;
    if session.is_complete() {
        tracing::info!(fit = %job.name, fmin = status.fmin, calls = status.n_calls, "fit complete");
    } else if let Some(err) = &status.error {
        tracing::error!(fit = %job.name, error = %err, "fit did not complete");
    }
    Ok(RunOutput {
        session,
        store,
        status,
    })
}

/// Objective at the job's starting values.
pub fn evaluate_job(job: &JobFile) -> Result<f64, AppError> {
    let Prepared { mut session, store } = prepare(job)?;
    Ok(session.evaluate(&store)?)
}

/// Fit the job, then draw `count` values from dataset `dataset`'s fitted shape.
pub fn sample_job(job: &JobFile, dataset: usize, count: usize, seed: u64) -> Result<Vec<f64>, AppError> {
    let run = completed_run(job)?;
    let fit = run
        .session
        .current()
        .ok_or_else(|| AppError::new(4, "No fit is bound after the run."))?;
    let table = fit.tabulate_cdf(dataset)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(sample_events(&table, count, &mut rng))
}

/// Fit, then Poisson-fluctuate one binned dataset's fitted contents.
/// Filtered bins stay empty.
pub fn toy_job(job: &JobFile, dataset: usize, seed: u64) -> Result<Vec<f64>, AppError> {
    let run = completed_run(job)?;
    let fit = run
        .session
        .current()
        .ok_or_else(|| AppError::new(4, "No fit is bound after the run."))?;
    let ds = fit
        .dataset(dataset)
        .ok_or_else(|| AppError::new(2, format!("Dataset {dataset} does not exist.")))?;
    if !ds.is_binned() {
        return Err(AppError::new(2, format!("Dataset {dataset} is unbinned; toys need bins.")));
    }
    let expected: Vec<f64> = ds
        .points()
        .unwrap_or_default()
        .iter()
        .map(|p| if p.filtered { 0.0 } else { p.fit.max(0.0) })
        .collect();
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(poisson_toy(&expected, &mut rng)?)
}

fn completed_run(job: &JobFile) -> Result<RunOutput, AppError> {
    let run = run_job(job)?;
    match run.status.error {
        Some(err) => Err(err.into()),
        None => Ok(run),
    }
}
