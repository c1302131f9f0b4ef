//! Process-wide connector registry.
//!
//! Connectors are discovered by string name. The global registry is
//! populated once at first use with the built-ins and treated as
//! read-only thereafter; programs embedding the engine build their own
//! [`ConnectorRegistry`] when they need additional connectors.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::builtin;
use crate::connector::{Input, Output};
use streamforge_types::TransportError;

/// Factory producing an input from its JSON config value.
pub type InputFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Input>, TransportError> + Send + Sync>;

/// Factory producing an output from its JSON config value.
pub type OutputFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Output>, TransportError> + Send + Sync>;

/// A `{name → factory}` mapping for inputs and outputs.
#[derive(Default)]
pub struct ConnectorRegistry {
    inputs: HashMap<&'static str, InputFactory>,
    outputs: HashMap<&'static str, OutputFactory>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input factory under `name`.
    pub fn register_input(&mut self, name: &'static str, factory: InputFactory) {
        self.inputs.insert(name, factory);
    }

    /// Register an output factory under `name`.
    pub fn register_output(&mut self, name: &'static str, factory: OutputFactory) {
        self.outputs.insert(name, factory);
    }

    /// Construct the input registered under `name`.
    pub fn new_input(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Input>, TransportError> {
        let factory = self
            .inputs
            .get(name)
            .ok_or_else(|| TransportError::connector(format!("unknown input type '{name}'")))?;
        factory(config)
    }

    /// Construct the output registered under `name`.
    pub fn new_output(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Output>, TransportError> {
        let factory = self
            .outputs
            .get(name)
            .ok_or_else(|| TransportError::connector(format!("unknown output type '{name}'")))?;
        factory(config)
    }

    /// Registered input names, sorted.
    #[must_use]
    pub fn input_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.inputs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Registered output names, sorted.
    #[must_use]
    pub fn output_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.outputs.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

static GLOBAL: Lazy<ConnectorRegistry> = Lazy::new(|| {
    let mut registry = ConnectorRegistry::new();
    builtin::register(&mut registry);
    registry
});

/// The process-wide registry, populated with the built-in connectors.
#[must_use]
pub fn global() -> &'static ConnectorRegistry {
    &GLOBAL
}
