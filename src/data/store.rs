//! The data-source collaborator: read access to histograms and tables, plus
//! write-back of computed arrays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::{Axis, Histogram, Table};
use crate::error::{FitError, Result};

/// Read access to stored data objects by id.
pub trait DataSource {
    fn histogram(&self, id: &str) -> Option<&Histogram>;
    fn table(&self, id: &str) -> Option<&Table>;
}

/// Write access for replaying computed arrays.
pub trait DataSink {
    /// Store `values` as a histogram shaped like `axes` under `id`,
    /// replacing any existing object with that id.
    fn write_histogram(&mut self, id: &str, axes: Vec<Axis>, values: Vec<f64>) -> Result<()>;

    /// Store `values` as a single-column table under `id`.
    fn write_column(&mut self, id: &str, column: &str, values: Vec<f64>) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataObject {
    Histogram(Histogram),
    Table(Table),
}

/// In-memory data store keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStore {
    objects: BTreeMap<String, DataObject>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_histogram(&mut self, id: impl Into<String>, h: Histogram) -> Result<()> {
        h.validate()?;
        self.objects.insert(id.into(), DataObject::Histogram(h));
        Ok(())
    }

    pub fn insert_table(&mut self, id: impl Into<String>, t: Table) -> Result<()> {
        t.validate()?;
        self.objects.insert(id.into(), DataObject::Table(t));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DataObject> {
        self.objects.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl DataSource for DataStore {
    fn histogram(&self, id: &str) -> Option<&Histogram> {
        match self.objects.get(id) {
            Some(DataObject::Histogram(h)) => Some(h),
            _ => None,
        }
    }

    fn table(&self, id: &str) -> Option<&Table> {
        match self.objects.get(id) {
            Some(DataObject::Table(t)) => Some(t),
            _ => None,
        }
    }
}

impl DataSink for DataStore {
    fn write_histogram(&mut self, id: &str, axes: Vec<Axis>, values: Vec<f64>) -> Result<()> {
        let h = Histogram::new(axes, values, None)?;
        self.objects.insert(id.to_string(), DataObject::Histogram(h));
        Ok(())
    }

    fn write_column(&mut self, id: &str, column: &str, values: Vec<f64>) -> Result<()> {
        if id.trim().is_empty() {
            return Err(FitError::InvalidName(id.to_string()));
        }
        let t = Table::from_columns([(column, values)])?;
        self.objects.insert(id.to_string(), DataObject::Table(t));
        Ok(())
    }
}
