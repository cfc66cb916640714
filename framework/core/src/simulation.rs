use std::collections::HashMap;
use std::sync::Arc;

use crate::step::Step;

pub type HookResult = anyhow::Result<()>;

/// A user-authored simulation.
///
/// `scenarios` builds the step trees to execute. It is called on a fresh
/// instance for every iteration so that no state leaks between iterations;
/// anything that must survive an iteration belongs in the session or in the
/// closures' own shared state.
///
/// The lifecycle hooks are best effort. A hook returning an error is logged
/// and the run continues.
pub trait Simulation: Send {
    /// The scenario root groups, in execution order.
    fn scenarios(&mut self) -> Vec<Step>;

    fn before_simulation(&mut self) -> HookResult {
        Ok(())
    }

    fn after_simulation(&mut self) -> HookResult {
        Ok(())
    }

    fn before_scenario(&mut self, _scenario: &str) -> HookResult {
        Ok(())
    }

    fn after_scenario(&mut self, _scenario: &str) -> HookResult {
        Ok(())
    }

    fn before_iteration(&mut self, _scenario: &str, _iteration: u64) -> HookResult {
        Ok(())
    }

    fn after_iteration(&mut self, _scenario: &str, _iteration: u64) -> HookResult {
        Ok(())
    }
}

pub type SimulationFactory = Arc<dyn Fn() -> Box<dyn Simulation> + Send + Sync>;

/// Maps the provider identifiers used in configuration files to simulation
/// factories. Simulations are registered at build time by the host binary.
#[derive(Default)]
pub struct SimulationRegistry {
    factories: HashMap<String, SimulationFactory>,
}

impl SimulationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S, F>(&mut self, name: &str, factory: F)
    where
        S: Simulation + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let previous = self
            .factories
            .insert(name.to_string(), Arc::new(move || Box::new(factory())));

        if previous.is_some() {
            panic!("Simulation [{}] is already registered", name);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<SimulationFactory> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|k| k.as_str())
    }
}
