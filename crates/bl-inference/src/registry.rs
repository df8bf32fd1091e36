//! Explicit name → factory registry.
//!
//! Hosts discover backends by name and construct them from a [`ModelSpec`].

use crate::backend::{BackendInfo, PoissonBackend, StatisticalModel};
use bl_core::{Error, Result};
use bl_model::ModelSpec;
use std::collections::BTreeMap;

/// Constructor of a backend from a model description.
pub type BackendFactory = fn(&ModelSpec) -> Result<Box<dyn StatisticalModel>>;

#[derive(Clone, Copy)]
struct Entry {
    info: BackendInfo,
    factory: BackendFactory,
}

/// Backends keyed by name, iterated in name order.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<&'static str, Entry>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

fn build_poisson(spec: &ModelSpec) -> Result<Box<dyn StatisticalModel>> {
    Ok(Box::new(PoissonBackend::from_spec(spec)?))
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in backends.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register(PoissonBackend::INFO, build_poisson);
        r
    }

    /// Register (or replace) the backend named `info.name`.
    pub fn register(&mut self, info: BackendInfo, factory: BackendFactory) {
        if self.entries.insert(info.name, Entry { info, factory }).is_some() {
            log::debug!("registry: replaced backend {}", info.name);
        }
    }

    /// Factory registered under `name`.
    pub fn get(&self, name: &str) -> Option<BackendFactory> {
        self.entries.get(name).map(|e| e.factory)
    }

    /// Description of the backend registered under `name`.
    pub fn info(&self, name: &str) -> Option<BackendInfo> {
        self.entries.get(name).map(|e| e.info)
    }

    /// Construct the backend `name` from `spec`.
    pub fn build(&self, name: &str, spec: &ModelSpec) -> Result<Box<dyn StatisticalModel>> {
        let factory = self.get(name).ok_or_else(|| {
            Error::InvalidInput(format!(
                "unknown backend '{name}' (available: {})",
                self.names().join(", ")
            ))
        })?;
        factory(spec)
    }

    /// Registered names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Registered backend descriptions in name order.
    pub fn infos(&self) -> Vec<BackendInfo> {
        self.entries.values().map(|e| e.info).collect()
    }
}
