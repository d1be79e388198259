//! `MinimizerSession`: owns the minimizer and the one fit bound to it.
//!
//! Lifecycle: `bind(config)`, then `synchronize()` / `run_fit()` / mutations
//! through `current_mut()`, then `unbind()` or `destroy_current()`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::data::DataSource;
use crate::domain::{FitConfig, FitStatus};
use crate::error::{FitError, Result};
use crate::fit::AccumulationEngine;
use crate::minimizer::{Minimizer, MinimizerOption, ParameterDecl, SimplexMinimizer};
use crate::models::FunctionRegistry;

/// Flag held for the duration of a minimizer run. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct BusyLock(Arc<AtomicBool>);

impl BusyLock {
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Take the lock, failing fast if it is already held.
    pub fn try_acquire(&self) -> Result<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FitError::MinimizerBusy)?;
        Ok(BusyGuard(Arc::clone(&self.0)))
    }
}

/// Releases the busy lock on drop.
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MinimizerSession {
    minimizer: Box<dyn Minimizer>,
    registry: Arc<FunctionRegistry>,
    current: Option<FitConfig>,
    busy: BusyLock,
    idle_hook: Option<Box<dyn FnMut()>>,
}

impl Default for MinimizerSession {
    fn default() -> Self {
        Self::new(
            Box::new(SimplexMinimizer::new()),
            FunctionRegistry::with_builtins(),
        )
    }
}

impl MinimizerSession {
    pub fn new(minimizer: Box<dyn Minimizer>, registry: FunctionRegistry) -> Self {
        Self {
            minimizer,
            registry: Arc::new(registry),
            current: None,
            busy: BusyLock::default(),
            idle_hook: None,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn minimizer(&self) -> &dyn Minimizer {
        self.minimizer.as_ref()
    }

    /// A new empty fit using this session's functions and busy lock.
    pub fn new_config(&self, name: &str) -> FitConfig {
        FitConfig::with_registry(name, Arc::clone(&self.registry), self.busy.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_held()
    }

    /// Run between minimizer callbacks during a fit.
    pub fn set_idle_hook(&mut self, hook: impl FnMut() + 'static) {
        self.idle_hook = Some(Box::new(hook));
    }

    pub fn clear_idle_hook(&mut self) {
        self.idle_hook = None;
    }

    /// Make `config` the current fit; returns the previously bound one.
    /// Both lose their sync state.
    pub fn bind(&mut self, mut config: FitConfig) -> Result<Option<FitConfig>> {
        if self.is_busy() {
            return Err(FitError::MinimizerBusy);
        }
        let previous = self.unbind()?;
        config.busy = self.busy.clone();
        config.reset_sync();
        self.minimizer.reset();
        tracing::debug!(fit = config.name(), "fit bound");
        self.current = Some(config);
        Ok(previous)
    }

    /// Release the current fit.
    pub fn unbind(&mut self) -> Result<Option<FitConfig>> {
        if self.is_busy() {
            return Err(FitError::MinimizerBusy);
        }
        let Some(mut config) = self.current.take() else {
            return Ok(None);
        };
        config.reset_sync();
        self.minimizer.reset();
        Ok(Some(config))
    }

    /// Unbind and destroy the current fit, notifying its observers.
    pub fn destroy_current(&mut self) -> Result<()> {
        if let Some(config) = self.unbind()? {
            config.destroy();
        }
        Ok(())
    }

    pub fn current(&self) -> Option<&FitConfig> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut FitConfig> {
        self.current.as_mut()
    }

    pub fn is_complete(&self) -> bool {
        self.current.as_ref().is_some_and(FitConfig::is_complete)
    }

    pub fn last_status(&self) -> Option<&FitStatus> {
        self.current.as_ref().map(FitConfig::status)
    }

    /// Push the current fit's parameters, then its options, to the minimizer.
    pub fn synchronize(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(FitError::MinimizerBusy);
        }
        let fit = self.current.as_mut().ok_or(FitError::NoCurrentFit)?;

        self.minimizer.reset();
        for (index, p) in fit.parameters.iter().enumerate() {
            self.minimizer.push_parameter(ParameterDecl {
                index,
                name: p.name().to_string(),
                value: p.value(),
                step: p.declared_step(),
                bounds: p.bounds(),
            })?;
        }
        fit.flags.params_synced = true;

        let o = &fit.options;
        for option in [
            MinimizerOption::ErrorDef(o.error_def),
            MinimizerOption::Verbosity(o.verbosity),
            MinimizerOption::Strategy(o.strategy),
            MinimizerOption::Precision(o.precision),
            MinimizerOption::UseGradient(o.use_gradient),
        ] {
            self.minimizer.push_option(option)?;
        }
        self.minimizer.set_max_calls(o.max_calls);
        fit.flags.options_synced = true;
        tracing::debug!(fit = fit.name(), parameters = fit.parameters.len(), "synchronized");
        Ok(())
    }

    /// Minimize the current fit. Blocks until the minimizer returns.
    pub fn run_fit(&mut self, source: &dyn DataSource) -> Result<FitStatus> {
        let fit = self.current.as_mut().ok_or(FitError::NoCurrentFit)?;
        if !fit.flags.params_synced {
            return Err(FitError::ParamsNotSynced);
        }
        if !fit.flags.options_synced {
            return Err(FitError::OptionsNotSynced);
        }
        let _guard = self.busy.try_acquire()?;

        tracing::debug!(fit = fit.name(), "run started");
        let mut engine = AccumulationEngine::new(fit, source);
        if let Some(hook) = self.idle_hook.as_mut() {
            engine = engine.with_idle_hook(hook.as_mut());
        }
        self.minimizer.run(&mut engine)?;
        Ok(fit.status().clone())
    }

    /// `synchronize` then `run_fit`.
    pub fn sync_and_run(&mut self, source: &dyn DataSource) -> Result<FitStatus> {
        self.synchronize()?;
        self.run_fit(source)
    }

    /// Objective of the current fit at its current parameter values.
    pub fn evaluate(&mut self, source: &dyn DataSource) -> Result<f64> {
        if self.is_busy() {
            return Err(FitError::MinimizerBusy);
        }
        let fit = self.current.as_mut().ok_or(FitError::NoCurrentFit)?;
        let params = fit.parameter_values();
        AccumulationEngine::new(fit, source).evaluate_once(&params)
    }
}

impl fmt::Debug for MinimizerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinimizerSession")
            .field("current", &self.current.as_ref().map(FitConfig::name))
            .field("busy", &self.is_busy())
            .finish()
    }
}
