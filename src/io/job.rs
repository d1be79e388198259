//! Job files: a whole fit (data, parameters, terms, datasets, options) as JSON.
//!
//! A job is applied through the `FitConfig` mutation API, so a job file is
//! subject to exactly the same validation as programmatic configuration.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::{DataObject, DataStore};
use crate::domain::{DatasetLayout, DatasetSpec, Filter, FitConfig, MinimizerOptions, NormRegion};
use crate::error::{AppError, Result};
use crate::fit::{AccumulationMethod, MappingKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    #[serde(default = "default_name")]
    pub name: String,
    /// Data objects by id.
    #[serde(default)]
    pub data: BTreeMap<String, DataObject>,
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
    #[serde(default)]
    pub terms: Vec<TermEntry>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
    /// Fit-wide accumulation method tag (`lsq`, `pearson`, `ml`, ...).
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub options: MinimizerOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub value: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub bounds: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    pub name: String,
    pub function: String,
    #[serde(default = "default_mapping")]
    pub mapping: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub source: String,
    #[serde(default = "default_layout")]
    pub layout: DatasetLayout,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Overrides the fit-wide method for this dataset.
    #[serde(default)]
    pub method: Option<String>,
    /// Per-axis `[lo, hi)` windows.
    #[serde(default)]
    pub filter: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub normalization: NormRegion,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub terms: Vec<String>,
}

fn default_name() -> String {
    "fit".to_string()
}

fn default_step() -> f64 {
    0.1
}

fn default_mapping() -> String {
    MappingKind::Sequential.tag().to_string()
}

fn default_layout() -> DatasetLayout {
    DatasetLayout::Histogram
}

fn default_weight() -> f64 {
    1.0
}

/// Read a job file.
pub fn read_job(path: &Path) -> std::result::Result<JobFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open job file '{}': {e}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid job file '{}': {e}", path.display())))
}

impl JobFile {
    pub fn from_json(text: &str) -> std::result::Result<Self, AppError> {
        serde_json::from_str(text).map_err(|e| AppError::new(2, format!("Invalid job JSON: {e}")))
    }

    /// Validate and load the job's data objects into a store.
    pub fn build_store(&self) -> Result<DataStore> {
        let mut store = DataStore::new();
        for (id, object) in &self.data {
            match object {
                DataObject::Histogram(h) => store.insert_histogram(id.clone(), h.clone())?,
                DataObject::Table(t) => store.insert_table(id.clone(), t.clone())?,
            }
        }
        Ok(store)
    }

    /// Configure `fit` from the job. Stops at the first rejected entry.
    pub fn apply(&self, fit: &mut FitConfig, store: &DataStore) -> Result<()> {
        for p in &self.parameters {
            fit.add_parameter(&p.name, p.value, p.step)?;
            if let Some((lo, hi)) = p.bounds {
                fit.set_bounds(&p.name, lo, hi)?;
            }
            if p.fixed {
                fit.fix(&p.name)?;
            }
        }

        for t in &self.terms {
            let mapping: MappingKind = t.mapping.parse()?;
            fit.add_term(&t.name, &t.function, mapping)?;
        }

        if let Some(tag) = &self.method {
            let method: AccumulationMethod = tag.parse()?;
            fit.set_method(method)?;
        }
        fit.set_options(self.options.clone())?;

        for d in &self.datasets {
            let mut spec = DatasetSpec::new(d.source.clone(), d.layout.clone());
            spec.weight = d.weight;
            spec.method = d
                .method
                .as_deref()
                .map(str::parse::<AccumulationMethod>)
                .transpose()?;
            spec.filter = d.filter.clone().map(Filter::Ranges);
            spec.normalization = d.normalization.clone();
            let index = fit.add_dataset(store, spec)?;
            for term in &d.terms {
                fit.attach_term(index, term)?;
            }
            if let Some(enabled) = d.enabled {
                fit.set_enabled(index, enabled)?;
            }
        }

        tracing::debug!(
            fit = fit.name(),
            parameters = fit.parameters().len(),
            terms = fit.terms().len(),
            datasets = fit.datasets().len(),
            "job applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FitError;

    const JOB: &str = r#"{
        "name": "peak",
        "data": {
            "h": {
                "kind": "histogram",
                "axes": [{ "nbins": 4, "lo": 0.0, "hi": 4.0 }],
                "contents": [1.0, 5.0, 5.0, 1.0]
            },
            "ev": {
                "kind": "table",
                "columns": [{ "name": "x", "values": [0.5, 1.5] }]
            }
        },
        "parameters": [
            { "name": "norm", "value": 5.0, "step": 0.5 },
            { "name": "mean", "value": 2.0, "bounds": [0.0, 4.0] },
            { "name": "sigma", "value": 1.0, "fixed": true }
        ],
        "terms": [{ "name": "peak", "function": "gauss" }],
        "datasets": [
            { "source": "h", "terms": ["peak"], "filter": [[0.0, 3.0]] },
            {
                "source": "ev",
                "layout": { "kind": "events", "coords": ["x"] },
                "method": "ml",
                "weight": 0.5,
                "enabled": false,
                "terms": ["peak"]
            }
        ],
        "method": "pearson",
        "options": { "strategy": 2, "timeout_secs": 30 }
    }"#;

    #[test]
    fn applies_every_section() {
        let job = JobFile::from_json(JOB).unwrap();
        let store = job.build_store().unwrap();
        assert_eq!(store.len(), 2);

        let mut fit = FitConfig::new(&job.name);
        job.apply(&mut fit, &store).unwrap();

        assert_eq!(fit.parameters().len(), 3);
        assert_eq!(fit.parameter("mean").unwrap().bounds(), Some((0.0, 4.0)));
        assert!(fit.parameter("sigma").unwrap().is_fixed());
        assert_eq!(fit.parameter("mean").unwrap().step(), 0.1);
        assert_eq!(fit.term("peak").unwrap().ref_count(), 2);
        assert_eq!(fit.method(), AccumulationMethod::Pearson);
        assert_eq!(fit.options().strategy, 2);
        assert_eq!(fit.options().timeout_secs, 30);

        let events = fit.dataset(1).unwrap();
        assert_eq!(events.method(), Some(AccumulationMethod::MaxLikelihood));
        assert_eq!(events.weight(), 0.5);
        assert!(!events.is_enabled());
        assert!(fit.dataset(0).unwrap().filter().is_some());
    }

    #[test]
    fn bad_tags_are_configuration_errors() {
        let mut job = JobFile::from_json(JOB).unwrap();
        job.method = Some("least-effort".to_string());
        let store = job.build_store().unwrap();
        let mut fit = FitConfig::new("f");
        assert_eq!(
            job.apply(&mut fit, &store).unwrap_err(),
            FitError::UnknownMethod("least-effort".to_string())
        );

        let mut job = JobFile::from_json(JOB).unwrap();
        job.terms[0].mapping = "diagonal".to_string();
        let mut fit = FitConfig::new("f");
        assert!(matches!(
            job.apply(&mut fit, &store),
            Err(FitError::UnknownMapping(_))
        ));
    }

    #[test]
    fn demo_job_applies() {
        let job = JobFile::from_json(include_str!("../../demos/peak.json")).unwrap();
        let store = job.build_store().unwrap();
        let mut fit = FitConfig::new(&job.name);
        job.apply(&mut fit, &store).unwrap();
        assert_eq!(fit.required_parameters(), 4);
        assert_eq!(fit.term("peak").unwrap().offset(), 1);
        assert_eq!(fit.datasets().len(), 2);
        assert_eq!(fit.method(), AccumulationMethod::MaxLikelihood);
    }

    #[test]
    fn malformed_data_is_rejected_when_loading() {
        let mut job = JobFile::from_json(JOB).unwrap();
        if let Some(DataObject::Histogram(h)) = job.data.get_mut("h") {
            h.contents.pop();
        }
        assert!(job.build_store().is_err());
        assert!(JobFile::from_json("{ not json").is_err());
    }
}
