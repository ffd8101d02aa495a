//! Host configuration
//!
//! Settings are resolved once per process, later sources winning:
//!
//! 1. Built-in defaults: modules in `~/.raya/modules`, symbol prefix `raya`,
//!    no resource limits
//! 2. `$RAYA_HOME/config.toml` (`RAYA_HOME` defaults to `~/.raya`)
//! 3. `RAYA_MODULE_PATH`, which replaces the module directory
//!
//! ```toml
//! [modules]
//! dir = "plugins"          # relative paths are resolved against RAYA_HOME
//! symbol_prefix = "raya"
//!
//! [limits]
//! max_heap_bytes = 67108864
//! max_tasks = 1024
//! max_step_budget = 100000000
//! ```

use crate::error::FfiError;
use once_cell::sync::Lazy;
use raya_core::{ResourceLimits, VmOptions};
use raya_sdk::DEFAULT_SYMBOL_PREFIX;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Overrides the Raya home directory
pub const ENV_HOME: &str = "RAYA_HOME";

/// Overrides the native module directory
pub const ENV_MODULE_PATH: &str = "RAYA_MODULE_PATH";

/// Name of the config file inside the Raya home directory
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has the wrong shape
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Symbol prefix is not a C identifier
    #[error("Invalid symbol prefix '{0}'")]
    InvalidPrefix(String),
}

/// Default resource limits applied to every VM created through the C API
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_heap_bytes: Option<usize>,
    pub max_tasks: Option<usize>,
    pub max_step_budget: Option<u64>,
}

impl From<&LimitsConfig> for ResourceLimits {
    fn from(limits: &LimitsConfig) -> Self {
        ResourceLimits {
            max_heap_bytes: limits.max_heap_bytes,
            max_tasks: limits.max_tasks,
            max_step_budget: limits.max_step_budget,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModulesSection {
    dir: Option<PathBuf>,
    symbol_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    modules: ModulesSection,
    limits: LimitsConfig,
}

/// Resolved host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Directory searched by `raya_vm_load_native_module()`
    pub module_dir: PathBuf,
    /// Prefix of native module entry symbols (`<prefix>_module_init_<name>`)
    pub symbol_prefix: String,
    /// Limits for new VMs
    pub limits: LimitsConfig,
}

impl HostConfig {
    /// Defaults rooted at `raya_home`
    pub fn with_home(raya_home: &Path) -> Self {
        Self {
            module_dir: raya_home.join("modules"),
            symbol_prefix: DEFAULT_SYMBOL_PREFIX.to_string(),
            limits: LimitsConfig::default(),
        }
    }

    /// Resolve from the process environment and the user's home directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var_os(key), dirs::home_dir())
    }

    /// Resolve from an explicit environment lookup and home directory
    pub fn resolve(
        env: impl Fn(&str) -> Option<OsString>,
        home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let raya_home = env(ENV_HOME)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.unwrap_or_else(|| PathBuf::from(".")).join(".raya"));

        let mut config = Self::with_home(&raya_home);

        let path = raya_home.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => config.apply_toml(&raya_home, &path, &text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(ConfigError::Io { path, source }),
        }

        if let Some(dir) = env(ENV_MODULE_PATH).filter(|v| !v.is_empty()) {
            config.module_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    fn apply_toml(&mut self, raya_home: &Path, path: &Path, text: &str) -> Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(dir) = file.modules.dir {
            self.module_dir = if dir.is_absolute() {
                dir
            } else {
                raya_home.join(dir)
            };
        }
        if let Some(prefix) = file.modules.symbol_prefix {
            if !is_identifier(&prefix) {
                return Err(ConfigError::InvalidPrefix(prefix));
            }
            self.symbol_prefix = prefix;
        }
        self.limits = file.limits;
        Ok(())
    }

    /// VM options carrying these limits
    pub fn vm_options(&self) -> VmOptions {
        VmOptions {
            limits: ResourceLimits::from(&self.limits),
            ..VmOptions::default()
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

static HOST_CONFIG: Lazy<Result<Arc<HostConfig>, FfiError>> = Lazy::new(|| {
    let config = HostConfig::load().map_err(FfiError::from)?;
    raya_core::vm_info!(
        "host config: modules in {}, prefix '{}'",
        config.module_dir.display(),
        config.symbol_prefix
    );
    Ok(Arc::new(config))
});

/// Process-wide configuration, read on first use
pub fn host_config() -> Result<Arc<HostConfig>, FfiError> {
    HOST_CONFIG.as_ref().map(Arc::clone).map_err(Clone::clone)
}
