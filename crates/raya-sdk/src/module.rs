//! Native module descriptors
//!
//! A `ModuleBuilder` collects functions and is consumed by `finish`, which
//! yields an immutable `NativeModule`. Re-adding a name replaces the earlier
//! entry in place (last write wins, first-insertion order kept).

use crate::abi::RayaNativeFn;
use crate::error::{AbiResult, NativeError};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One exported native function
#[derive(Clone, Copy)]
pub struct NativeFunction {
    /// Function pointer
    pub func: RayaNativeFn,
    /// Declared arity; informational only, never enforced by the engine
    pub arity: usize,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("func", &(self.func as usize as *const ()))
            .field("arity", &self.arity)
            .finish()
    }
}

/// Builder for a [`NativeModule`]
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    version: String,
    functions: Vec<(String, NativeFunction)>,
}

impl ModuleBuilder {
    /// Start a module with a name and a `MAJOR.MINOR.PATCH` version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> AbiResult<Self> {
        let name = name.into();
        let version = version.into();
        if name.is_empty() {
            return Err(NativeError::ModuleError("module name must not be empty".to_string()));
        }
        if !is_semver(&version) {
            return Err(NativeError::ModuleError(format!(
                "module '{}' has invalid version '{}' (expected MAJOR.MINOR.PATCH)",
                name, version
            )));
        }
        Ok(Self {
            name,
            version,
            functions: Vec::new(),
        })
    }

    /// Add a function; an existing entry with the same name is replaced
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        func: RayaNativeFn,
        arity: usize,
    ) -> AbiResult<&mut Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(NativeError::ModuleError(format!(
                "module '{}': function name must not be empty",
                self.name
            )));
        }
        let entry = NativeFunction { func, arity };
        match self.functions.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = entry,
            None => self.functions.push((name, entry)),
        }
        Ok(self)
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finish the module; the builder is consumed
    pub fn finish(self) -> NativeModule {
        let index = self
            .functions
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        NativeModule {
            name: self.name,
            version: self.version,
            functions: self.functions,
            index,
            keepalive: None,
        }
    }
}

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Immutable native module
pub struct NativeModule {
    name: String,
    version: String,
    functions: Vec<(String, NativeFunction)>,
    index: HashMap<String, usize>,
    // Keeps the defining shared library mapped while the module is reachable
    keepalive: Option<Arc<dyn Any + Send + Sync>>,
}

impl NativeModule {
    /// Attach an owner that must outlive every function pointer of this module
    pub fn with_keepalive(mut self, owner: Arc<dyn Any + Send + Sync>) -> Self {
        self.keepalive = Some(owner);
        self
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a function by name (case-sensitive)
    pub fn get_function(&self, name: &str) -> Option<NativeFunction> {
        self.index.get(name).map(|&i| self.functions[i].1)
    }

    /// Function names in first-insertion order
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|(name, _)| name.as_str())
    }

    /// Number of exported functions
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("functions", &self.functions)
            .field("has_keepalive", &self.keepalive.is_some())
            .finish()
    }
}
