//! Per-VM native module registry

use raya_sdk::NativeModule;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// Registration failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A module with the same name is already registered
    #[error("Native module '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Native modules available to `native:<name>` imports of one VM
#[derive(Debug, Default, Clone)]
pub struct NativeModuleRegistry {
    modules: FxHashMap<String, Arc<NativeModule>>,
    order: Vec<String>,
}

impl NativeModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its own name
    pub fn register(&mut self, module: Arc<NativeModule>) -> Result<(), RegistryError> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.order.push(name.clone());
        self.modules.insert(name, module);
        Ok(())
    }

    /// Look up a module by exact (case-sensitive) name
    pub fn get(&self, name: &str) -> Option<&Arc<NativeModule>> {
        self.modules.get(name)
    }

    /// Whether a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
