//! Registry of named model functions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::fold_name;
use crate::error::{FitError, Result};
use crate::models::{BuiltinModel, ModelFunction};

/// Named model functions available to function terms.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn ModelFunction>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every [`BuiltinModel`].
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        for b in BuiltinModel::ALL {
            reg.functions.insert(b.tag().to_string(), Arc::new(b));
        }
        reg
    }

    /// Register `f` under `name`. Names are folded like parameter names.
    pub fn register(&mut self, name: &str, f: impl ModelFunction + 'static) -> Result<()> {
        let key = fold_name(name)?;
        if self.functions.contains_key(&key) {
            return Err(FitError::DuplicateName {
                kind: "function",
                name: name.trim().to_string(),
            });
        }
        self.functions.insert(key, Arc::new(f));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ModelFunction>> {
        let key = fold_name(name).map_err(|_| FitError::UnknownFunction(name.to_string()))?;
        self.functions
            .get(&key)
            .cloned()
            .ok_or_else(|| FitError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FnModel;

    #[test]
    fn builtins_are_registered() {
        let reg = FunctionRegistry::with_builtins();
        assert!(reg.contains("gauss"));
        assert!(reg.contains(" Gauss "));
        assert_eq!(reg.get("line").unwrap().n_params(), 2);
    }

    #[test]
    fn duplicate_and_unknown_names() {
        let mut reg = FunctionRegistry::with_builtins();
        let err = reg.register("GAUSS", FnModel::new(0, |_, _| Ok(1.0))).unwrap_err();
        assert!(matches!(err, FitError::DuplicateName { kind: "function", .. }));
        assert!(matches!(reg.get("nope"), Err(FitError::UnknownFunction(_))));
    }
}
