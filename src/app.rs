//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - loads the job file
//! - runs, evaluates or samples the fit
//! - prints reports and writes optional exports

use clap::Parser;

use crate::cli::{Command, EvalArgs, FitArgs, SampleArgs};
use crate::error::AppError;
use crate::io::read_job;

pub mod pipeline;

/// Entry point for the `hfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(cli.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Eval(args) => handle_eval(args),
        Command::Sample(args) => handle_sample(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let job = read_job(&args.job)?;
    let run = pipeline::run_job(&job)?;
    let fit = run
        .session
        .current()
        .ok_or_else(|| AppError::new(4, "No fit is bound after the run."))?;

    println!("{}", crate::report::format_run_summary(fit));
    if args.top > 0 {
        for index in 0..fit.datasets().len() {
            println!("{}", crate::report::format_pulls(fit, index, args.top));
        }
    }

    // The export records incomplete runs too.
    if let Some(path) = &args.export {
        crate::io::write_results_json(path, fit)?;
    }

    match run.status.error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn handle_eval(args: EvalArgs) -> Result<(), AppError> {
    let job = read_job(&args.job)?;
    let value = pipeline::evaluate_job(&job)?;
    println!("{value:.10}");
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let job = read_job(&args.job)?;
    let values = if args.toy {
        pipeline::toy_job(&job, args.dataset, args.seed)?
    } else {
        pipeline::sample_job(&job, args.dataset, args.count, args.seed)?
    };
    for v in values {
        println!("{v:.10}");
    }
    Ok(())
}
