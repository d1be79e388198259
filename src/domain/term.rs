//! Function terms: a registered model function bound into one fit.

use std::fmt;
use std::sync::Arc;

use crate::domain::fold_name;
use crate::error::{FunctionError, Result};
use crate::fit::MappingKind;
use crate::models::ModelFunction;

#[derive(Clone)]
pub struct FunctionTerm {
    name: String,
    key: String,
    function_tag: String,
    function: Arc<dyn ModelFunction>,
    pub(crate) mapping: MappingKind,
    pub(crate) offset: usize,
    /// Mapped parameters from the last evaluation outside a minimizer loop.
    pub(crate) best_params: Vec<f64>,
    /// Datasets referencing this term.
    pub(crate) refs: usize,
}

impl FunctionTerm {
    pub(crate) fn new(
        name: &str,
        function_tag: &str,
        function: Arc<dyn ModelFunction>,
        mapping: MappingKind,
    ) -> Result<Self> {
        Ok(Self {
            key: fold_name(name)?,
            name: name.trim().to_string(),
            function_tag: function_tag.to_string(),
            function,
            mapping,
            offset: 0,
            best_params: Vec::new(),
            refs: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub fn function_tag(&self) -> &str {
        &self.function_tag
    }

    pub fn mapping(&self) -> MappingKind {
        self.mapping
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn best_params(&self) -> &[f64] {
        &self.best_params
    }

    pub fn ref_count(&self) -> usize {
        self.refs
    }

    /// Parameters the function itself reads.
    pub fn n_params(&self) -> usize {
        self.function.n_params()
    }

    /// Flat-vector slots this term occupies.
    pub fn consumed(&self) -> usize {
        self.mapping.consumed(self.n_params())
    }

    /// This term's view of the flat parameter vector.
    pub fn view<'a>(&self, flat: &'a [f64]) -> &'a [f64] {
        self.mapping.map(flat, self.offset, self.n_params())
    }

    pub fn eval(&self, x: &[f64], params: &[f64]) -> std::result::Result<f64, FunctionError> {
        self.function.eval(x, params)
    }
}

impl fmt::Debug for FunctionTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTerm")
            .field("name", &self.name)
            .field("function", &self.function_tag)
            .field("mapping", &self.mapping)
            .field("offset", &self.offset)
            .field("refs", &self.refs)
            .finish()
    }
}
