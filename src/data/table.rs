//! Column-oriented row tables (unbinned events or point data).

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let t = Self { columns };
        t.validate()?;
        Ok(t)
    }

    /// Build a table from `(name, values)` pairs.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        Self::new(
            columns
                .into_iter()
                .map(|(name, values)| Column {
                    name: name.into(),
                    values,
                })
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.columns.first() else {
            return Ok(());
        };
        let n = first.values.len();
        for c in &self.columns {
            if c.values.len() != n {
                return Err(FitError::InvalidDataset(format!(
                    "column '{}' has {} rows, expected {n}",
                    c.name,
                    c.values.len()
                )));
            }
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_columns_by_name() {
        let t = Table::from_columns([("x", vec![1.0, 2.0]), ("y", vec![3.0, 4.0])]).unwrap();
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.column("y"), Some(&[3.0, 4.0][..]));
        assert!(t.column("z").is_none());
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Table::from_columns([("x", vec![1.0, 2.0]), ("y", vec![3.0])]).unwrap_err();
        assert!(matches!(err, FitError::InvalidDataset(_)));
    }
}
