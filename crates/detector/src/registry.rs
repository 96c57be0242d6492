use std::collections::HashMap;

use tracing::info;

use crate::{DetectorDriver, DriverError, SimDriver};

type DriverFactory = Box<dyn Fn() -> Box<dyn DetectorDriver> + Send + Sync>;

/// Startup-time mapping from plugin identifiers to driver constructors.
/// Resolution from operator input goes through here and nowhere else.
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the drivers compiled into this build.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register("sim", || Box::new(SimDriver::new()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn DetectorDriver> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn DetectorDriver>, DriverError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DriverError::UnknownPlugin(name.to_string()))?;
        info!(plugin = name, "resolved detector driver");
        Ok(factory())
    }

    pub fn known_plugins(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}
