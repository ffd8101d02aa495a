//! Module linking and symbol resolution
//!
//! Binds the flattened `native:` import slots of a bytecode module to
//! functions of registered native modules.

use super::registry::NativeModuleRegistry;
use raya_bytecode::Module;
use raya_sdk::{NativeModule, RayaNativeFn};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during module linking
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No native module with that name is registered on the VM
    #[error("Unresolved import 'native:{0}': native module not registered")]
    ModuleNotFound(String),

    /// The native module does not export the symbol
    #[error("Symbol '{symbol}' not found in native module '{module}'")]
    SymbolNotFound {
        /// Native module name
        module: String,
        /// Missing function name
        symbol: String,
    },
}

/// A `CALL_NATIVE` slot bound to its function
#[derive(Clone)]
pub struct ResolvedNative {
    /// Defining module; holds the library mapped while linked
    pub module: Arc<NativeModule>,
    /// Function name
    pub symbol: String,
    /// Entry point
    pub func: RayaNativeFn,
}

impl fmt::Debug for ResolvedNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module.name(), self.symbol)
    }
}

/// A verified module with its native imports bound
#[derive(Debug, Clone)]
pub struct LinkedModule {
    /// Bytecode
    pub module: Arc<Module>,
    /// Bound native slots, indexed by `CALL_NATIVE` operand
    pub natives: Vec<ResolvedNative>,
}

impl LinkedModule {
    /// Module name
    pub fn name(&self) -> &str {
        self.module.name()
    }
}

/// Module linker
///
/// Resolves native imports against one VM's registry.
pub struct ModuleLinker<'a> {
    registry: &'a NativeModuleRegistry,
}

impl<'a> ModuleLinker<'a> {
    /// Create a linker over a registry
    pub fn new(registry: &'a NativeModuleRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every native import slot of `module`
    pub fn link(&self, module: Arc<Module>) -> Result<LinkedModule, LinkError> {
        let mut natives = Vec::with_capacity(module.native_slot_count());
        for slot in module.native_slots() {
            let native = self
                .registry
                .get(&slot.module)
                .ok_or_else(|| LinkError::ModuleNotFound(slot.module.clone()))?;
            let function = native
                .get_function(&slot.symbol)
                .ok_or_else(|| LinkError::SymbolNotFound {
                    module: slot.module.clone(),
                    symbol: slot.symbol.clone(),
                })?;
            natives.push(ResolvedNative {
                module: Arc::clone(native),
                symbol: slot.symbol,
                func: function.func,
            });
        }
        Ok(LinkedModule { module, natives })
    }

    /// Check that every native module `module` needs is registered
    pub fn check_available(&self, module: &Module) -> Result<(), LinkError> {
        match module
            .required_native_modules()
            .into_iter()
            .find(|name| !self.registry.contains(name))
        {
            Some(missing) => Err(LinkError::ModuleNotFound(missing.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raya_sdk::{ModuleBuilder, RayaContext, RayaValue};

    unsafe extern "C" fn noop(_: *mut RayaContext, _: *const *mut RayaValue, _: usize) -> *mut RayaValue {
        std::ptr::null_mut()
    }

    fn registry() -> NativeModuleRegistry {
        let mut builder = ModuleBuilder::new("crypto", "1.0.0").unwrap();
        builder.add_function("hash", noop, 2).unwrap();
        builder.add_function("randomBytes", noop, 1).unwrap();
        let mut registry = NativeModuleRegistry::new();
        registry.register(Arc::new(builder.finish())).unwrap();
        registry
    }

    #[test]
    fn test_link_native_slots() {
        let registry = registry();
        let mut module = Module::new("app");
        module.add_native_import("crypto", &["randomBytes", "hash"]);

        let linked = ModuleLinker::new(&registry).link(Arc::new(module)).unwrap();
        assert_eq!(linked.natives.len(), 2);
        assert_eq!(linked.natives[0].symbol, "randomBytes");
        assert_eq!(linked.natives[1].symbol, "hash");
        assert_eq!(linked.name(), "app");
    }

    #[test]
    fn test_unresolved_module() {
        let registry = registry();
        let mut module = Module::new("app");
        module.add_native_import("fs", &["readFile"]);

        let linker = ModuleLinker::new(&registry);
        assert_eq!(
            linker.link(Arc::new(module.clone())).unwrap_err(),
            LinkError::ModuleNotFound("fs".to_string())
        );
        assert!(linker.check_available(&module).is_err());
    }

    #[test]
    fn test_missing_symbol() {
        let registry = registry();
        let mut module = Module::new("app");
        module.add_native_import("crypto", &["Hash"]);

        assert!(matches!(
            ModuleLinker::new(&registry).link(Arc::new(module)),
            Err(LinkError::SymbolNotFound { symbol, .. }) if symbol == "Hash"
        ));
    }
}
