//! Export fit results to JSON.
//!
//! The export is a flat, self-describing record of one run: status, parameter
//! estimates, the free-parameter covariance and per-dataset goodness of fit.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::FitConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct ResultsFile {
    pub tool: &'static str,
    pub generated_at: DateTime<Utc>,
    pub fit: String,
    pub complete: bool,
    pub status: StatusRecord,
    pub parameters: Vec<ParameterRecord>,
    pub covariance: Option<CovarianceRecord>,
    pub datasets: Vec<DatasetRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    pub fmin: f64,
    pub edm: f64,
    pub n_free: usize,
    pub n_calls: usize,
    pub cov_quality: u8,
    pub elapsed_secs: f64,
    pub point_errors: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterRecord {
    pub name: String,
    pub value: f64,
    pub error: f64,
    pub minus_error: f64,
    pub plus_error: f64,
    pub global_cc: f64,
    pub fixed: bool,
    pub bounds: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CovarianceRecord {
    /// Parameter names in matrix order.
    pub parameters: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetRecord {
    pub source: String,
    pub method: &'static str,
    pub enabled: bool,
    pub chi2: f64,
    pub n_used: usize,
    pub objective: f64,
    pub n_errors: usize,
}

impl ResultsFile {
    pub fn from_fit(fit: &FitConfig, generated_at: DateTime<Utc>) -> Self {
        let status = fit.status();
        let parameters = fit
            .parameters()
            .iter()
            .map(|p| {
                let r = p.result().copied().unwrap_or_default();
                ParameterRecord {
                    name: p.name().to_string(),
                    value: p.value(),
                    error: r.error,
                    minus_error: r.minus_error,
                    plus_error: r.plus_error,
                    global_cc: r.global_cc,
                    fixed: p.result().map_or(p.is_fixed(), |r| r.internal_index.is_none()),
                    bounds: p.result().map_or(p.bounds(), |r| r.bounds),
                }
            })
            .collect();

        let covariance = fit.covariance().map(|c| CovarianceRecord {
            parameters: c
                .indices
                .iter()
                .filter_map(|&i| fit.parameters().get(i).map(|p| p.name().to_string()))
                .collect(),
            matrix: c
                .matrix
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
        });

        let datasets = fit
            .datasets()
            .iter()
            .map(|ds| {
                let s = ds.summary();
                DatasetRecord {
                    source: ds.source().to_string(),
                    method: ds.effective_method(fit.method()).tag(),
                    enabled: ds.is_enabled(),
                    chi2: s.chi2,
                    n_used: s.n_used,
                    objective: s.objective,
                    n_errors: s.n_errors,
                }
            })
            .collect();

        Self {
            tool: "hfit",
            generated_at,
            fit: fit.name().to_string(),
            complete: fit.is_complete(),
            status: StatusRecord {
                fmin: status.fmin,
                edm: status.edm,
                n_free: status.n_free,
                n_calls: status.n_calls,
                cov_quality: status.cov_quality,
                elapsed_secs: status.elapsed.as_secs_f64(),
                point_errors: status.point_errors,
                error: status.error.as_ref().map(ToString::to_string),
            },
            parameters,
            covariance,
            datasets,
        }
    }
}

/// Write the results of `fit` to a JSON file, stamped with the current time.
pub fn write_results_json(path: &Path, fit: &FitConfig) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create results JSON '{}': {e}", path.display())))?;
    let results = ResultsFile::from_fit(fit, Utc::now());
    serde_json::to_writer_pretty(file, &results)
        .map_err(|e| AppError::new(2, format!("Failed to write results JSON: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unfitted_parameters_export_their_declared_state() {
        let mut fit = FitConfig::new("demo");
        fit.add_parameter("a", 1.5, 0.1).unwrap();
        fit.add_parameter("b", 2.0, 0.1).unwrap();
        fit.fix("b").unwrap();

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let results = ResultsFile::from_fit(&fit, at);
        assert_eq!(results.fit, "demo");
        assert!(!results.complete);
        assert!(results.covariance.is_none());
        assert_eq!(results.parameters.len(), 2);
        assert!(!results.parameters[0].fixed);
        assert!(results.parameters[1].fixed);
        assert_eq!(results.parameters[0].error, 0.0);

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["generated_at"], "2025-03-01T12:00:00Z");
        assert_eq!(json["parameters"][0]["value"], 1.5);
    }
}
