//! Parameter mapping: which slice of the minimizer's flat parameter vector a
//! function term sees.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    /// `flat[offset .. offset + n]`.
    #[default]
    Sequential,
    /// The whole flat vector; the function indexes into it itself.
    Identical,
    /// An empty view, for zero-parameter terms.
    Null,
}

impl MappingKind {
    pub fn tag(self) -> &'static str {
        match self {
            MappingKind::Sequential => "sequential",
            MappingKind::Identical => "identical",
            MappingKind::Null => "null",
        }
    }

    /// Number of flat-vector slots a term with an `n`-parameter function
    /// consumes (and so shifts later offsets by).
    pub fn consumed(self, n: usize) -> usize {
        match self {
            MappingKind::Sequential => n,
            MappingKind::Identical | MappingKind::Null => 0,
        }
    }

    /// Reject a mapping that would hide parameters an `n`-parameter function reads.
    pub fn check(self, n: usize) -> Result<(), FitError> {
        if self == MappingKind::Null && n > 0 {
            return Err(FitError::InvalidOption(format!(
                "null mapping needs a zero-parameter function, this one takes {n}"
            )));
        }
        Ok(())
    }

    /// The parameter view for a term at `offset` whose function reads `n`
    /// values. Out-of-range sequential requests yield the available tail.
    pub fn map<'a>(self, flat: &'a [f64], offset: usize, n: usize) -> &'a [f64] {
        match self {
            MappingKind::Sequential => {
                let start = offset.min(flat.len());
                let end = offset.saturating_add(n).min(flat.len());
                &flat[start..end]
            }
            MappingKind::Identical => flat,
            MappingKind::Null => &[],
        }
    }
}

impl FromStr for MappingKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(MappingKind::Sequential),
            "identical" | "ident" | "all" => Ok(MappingKind::Identical),
            "null" | "none" => Ok(MappingKind::Null),
            _ => Err(FitError::UnknownMapping(s.to_string())),
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Offsets for terms in declaration order: prefix sums of consumed slots.
pub fn assign_offsets(consumed: impl IntoIterator<Item = usize>) -> Vec<usize> {
    let mut acc = 0;
    consumed
        .into_iter()
        .map(|n| {
            let offset = acc;
            acc += n;
            offset
        })
        .collect()
}
