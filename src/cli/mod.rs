//! Command-line parsing for the histogram fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting code.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "hfit", version, about = "Histogram and event-sample fitter")]
pub struct Cli {
    /// Log level for diagnostics written to stderr.
    #[arg(long, value_enum, global = true, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the fit described by a job file, print the report, and optionally export.
    Fit(FitArgs),
    /// Print the objective at the job's starting values without minimizing.
    Eval(EvalArgs),
    /// Fit, then draw values from one dataset's fitted shape or fluctuate its bins.
    Sample(SampleArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Job file (JSON).
    pub job: PathBuf,

    /// Write results JSON to this path.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Show this many largest pulls per dataset (0 disables).
    #[arg(long, default_value_t = 0)]
    pub top: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct EvalArgs {
    /// Job file (JSON).
    pub job: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct SampleArgs {
    /// Job file (JSON).
    pub job: PathBuf,

    /// Index of the (1-D) dataset whose fitted shape is sampled.
    #[arg(long, default_value_t = 0)]
    pub dataset: usize,

    /// Number of values to generate.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub count: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Print a Poisson toy of the fitted bin contents instead of drawing values.
    #[arg(long)]
    pub toy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sample_command() {
        let cli = Cli::parse_from([
            "hfit", "--log-level", "debug", "sample", "job.json", "--dataset", "1", "-n", "5",
        ]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        let Command::Sample(args) = cli.command else {
            panic!("expected sample");
        };
        assert_eq!(args.dataset, 1);
        assert_eq!(args.count, 5);
        assert_eq!(args.seed, 42);
        assert!(!args.toy);
    }

    #[test]
    fn fit_export_is_optional() {
        let cli = Cli::parse_from(["hfit", "fit", "job.json"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert!(args.export.is_none());
        assert_eq!(cli.log_level, LogLevel::Warn);
    }
}
