//! Native module loading from shared libraries
//!
//! A native module library exports one entry symbol,
//! `<prefix>_module_init_<name>`, with the signature
//! `RayaModule *init(void)`. The entry builds its module through the
//! `raya_module_builder_*` functions and returns the finished module.
//!
//! Libraries are found by name in the configured module directory, using
//! the platform's file naming (`libcrypto.so`, `libcrypto.dylib`,
//! `crypto.dll`).

use crate::module;
use raya_sdk::{module_init_symbol, NativeModule, RayaModuleInitFn};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading a native module library
#[derive(Debug, Error)]
pub enum LoadError {
    /// No library file for the module
    #[error("Native module library not found: {path}")]
    NotFound {
        /// Path that was searched
        path: String,
    },

    /// Library exists but the platform loader rejected it
    #[error("Failed to open {path}: {reason}")]
    OpenFailed {
        /// Library path
        path: String,
        /// Loader diagnostic
        reason: String,
    },

    /// Entry symbol not exported
    #[error("Symbol not found: {symbol} in {library}")]
    SymbolNotFound {
        /// Symbol name that was not found
        symbol: String,
        /// Library path
        library: String,
    },

    /// Entry point did not hand back a usable module
    #[error("Invalid module initialization: {0}")]
    InvalidInit(String),

    /// Module name is empty or contains path components
    #[error("Invalid native module name '{0}'")]
    InvalidName(String),

    /// Path is not valid UTF-8 or contains NUL
    #[error("Invalid library path: {0}")]
    InvalidPath(String),
}

/// File name of a module's library on this platform
pub fn library_file_name(name: &str) -> String {
    format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX)
}

/// Locate the library for module `name` inside `dir`
pub fn find_module(dir: &Path, name: &str) -> Result<PathBuf, LoadError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(LoadError::InvalidName(name.to_string()));
    }

    let path = dir.join(library_file_name(name));
    if path.is_file() {
        Ok(path)
    } else {
        Err(LoadError::NotFound {
            path: path.display().to_string(),
        })
    }
}

/// Cross-platform dynamic library handle
pub struct Library {
    handle: LibraryHandle,
    path: String,
}

impl Library {
    /// Load a dynamic library from the given path.
    ///
    /// # Platform-specific behavior
    ///
    /// - **Unix**: `dlopen(RTLD_NOW | RTLD_LOCAL)`
    /// - **Windows**: `LoadLibraryW`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path_ref = path.as_ref();
        let path_str = path_ref
            .to_str()
            .ok_or_else(|| LoadError::InvalidPath(format!("{:?}", path_ref)))?;

        if !path_ref.exists() {
            return Err(LoadError::NotFound {
                path: path_str.to_string(),
            });
        }

        let handle = LibraryHandle::load(path_str)?;
        raya_core::vm_debug!("opened native library {}", path_str);

        Ok(Library {
            handle,
            path: path_str.to_string(),
        })
    }

    /// Get a function pointer by name.
    ///
    /// # Safety
    ///
    /// `T` must be a function pointer type matching the exported symbol, and
    /// the library must outlive every use of the result.
    pub unsafe fn get<T: Copy>(&self, symbol: &str) -> Result<T, LoadError> {
        self.handle.symbol(symbol, &self.path)
    }

    /// Run the entry point of module `name` and take the module it returns.
    ///
    /// The returned module keeps this library loaded for as long as any VM
    /// holds it.
    pub fn load_module(self: &Arc<Self>, prefix: &str, name: &str) -> Result<NativeModule, LoadError> {
        let symbol = module_init_symbol(prefix, name);
        let init: RayaModuleInitFn = unsafe { self.get(&symbol)? };

        let ptr = unsafe { init() };
        if ptr.is_null() {
            return Err(LoadError::InvalidInit(format!("{} returned NULL", symbol)));
        }
        let native = module::take_module(ptr).ok_or_else(|| {
            LoadError::InvalidInit(format!("{} returned an invalid module handle", symbol))
        })?;

        if native.name() != name {
            return Err(LoadError::InvalidInit(format!(
                "{} built module '{}', expected '{}'",
                symbol,
                native.name(),
                name
            )));
        }

        raya_core::vm_info!(
            "loaded native module {} {} ({} functions) from {}",
            native.name(),
            native.version(),
            native.function_count(),
            self.path
        );
        Ok(native.with_keepalive(Arc::clone(self) as Arc<dyn std::any::Any + Send + Sync>))
    }

    /// Get the path this library was loaded from
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

/// Open `path` and load module `name` from it
pub fn load_library_module(path: &Path, prefix: &str, name: &str) -> Result<NativeModule, LoadError> {
    let library = Arc::new(Library::open(path)?);
    library.load_module(prefix, name)
}

// Platform-specific implementations

#[cfg(unix)]
type LibraryHandle = UnixLibrary;

#[cfg(windows)]
type LibraryHandle = WindowsLibrary;

// ============================================================================
// Unix Implementation (Linux, macOS, BSD)
// ============================================================================

#[cfg(unix)]
struct UnixLibrary {
    handle: *mut std::ffi::c_void,
}

#[cfg(unix)]
unsafe fn last_dl_error() -> Option<String> {
    let err_ptr = libc::dlerror();
    if err_ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(err_ptr).to_string_lossy().into_owned())
    }
}

#[cfg(unix)]
impl UnixLibrary {
    fn load(path: &str) -> Result<Self, LoadError> {
        let c_path = CString::new(path).map_err(|_| LoadError::InvalidPath(path.to_string()))?;

        // RTLD_LOCAL keeps one module's symbols from satisfying another's
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };

        if handle.is_null() {
            let reason = unsafe { last_dl_error() }.unwrap_or_else(|| "unknown error".to_string());
            return Err(LoadError::OpenFailed {
                path: path.to_string(),
                reason,
            });
        }

        Ok(UnixLibrary { handle })
    }

    unsafe fn symbol<T: Copy>(&self, name: &str, lib_path: &str) -> Result<T, LoadError> {
        let not_found = |detail: Option<String>| LoadError::SymbolNotFound {
            symbol: name.to_string(),
            library: match detail {
                Some(detail) => format!("{}: {}", lib_path, detail),
                None => lib_path.to_string(),
            },
        };
        let c_name = CString::new(name).map_err(|_| not_found(None))?;

        // Clear any previous errors
        libc::dlerror();
        let symbol = libc::dlsym(self.handle, c_name.as_ptr());
        if let Some(error) = last_dl_error() {
            return Err(not_found(Some(error)));
        }
        if symbol.is_null() {
            return Err(not_found(None));
        }

        Ok(std::mem::transmute_copy(&symbol))
    }
}

#[cfg(unix)]
impl Drop for UnixLibrary {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

#[cfg(unix)]
unsafe impl Send for UnixLibrary {}
#[cfg(unix)]
unsafe impl Sync for UnixLibrary {}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
struct WindowsLibrary {
    handle: *mut std::ffi::c_void,
}

#[cfg(windows)]
impl WindowsLibrary {
    fn load(path: &str) -> Result<Self, LoadError> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            let code = unsafe { GetLastError() };
            return Err(LoadError::OpenFailed {
                path: path.to_string(),
                reason: format!("error code {}", code),
            });
        }

        Ok(WindowsLibrary { handle })
    }

    unsafe fn symbol<T: Copy>(&self, name: &str, lib_path: &str) -> Result<T, LoadError> {
        let c_name = CString::new(name).map_err(|_| LoadError::SymbolNotFound {
            symbol: name.to_string(),
            library: lib_path.to_string(),
        })?;

        let symbol = GetProcAddress(self.handle, c_name.as_ptr());
        if symbol.is_null() {
            let code = GetLastError();
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
                library: format!("{} (error code {})", lib_path, code),
            });
        }

        Ok(std::mem::transmute_copy(&symbol))
    }
}

#[cfg(windows)]
impl Drop for WindowsLibrary {
    fn drop(&mut self) {
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

#[cfg(windows)]
unsafe impl Send for WindowsLibrary {}
#[cfg(windows)]
unsafe impl Sync for WindowsLibrary {}

#[cfg(windows)]
extern "system" {
    fn LoadLibraryW(filename: *const u16) -> *mut std::ffi::c_void;
    fn GetProcAddress(module: *mut std::ffi::c_void, procname: *const std::ffi::c_char) -> *mut std::ffi::c_void;
    fn FreeLibrary(module: *mut std::ffi::c_void) -> i32;
    fn GetLastError() -> u32;
}
