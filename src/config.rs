//! Runtime configuration.
//!
//! Configuration comes from three layers, later ones winning:
//!
//! 1. [`BridgeConfig::default()`]
//! 2. An optional JSON file ([`BridgeConfig::load`])
//! 3. Environment variables:
//!    - `HOTLUA_SCRIPT_ROOT` - directory relative script paths resolve against
//!    - `HOTLUA_LIFECYCLE_HOOKS` - if "1", run `onload` / `onreload` after loads

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`BridgeConfig::script_root`].
pub const ENV_SCRIPT_ROOT: &str = "HOTLUA_SCRIPT_ROOT";
/// Environment variable overriding [`BridgeConfig::lifecycle_hooks`].
pub const ENV_LIFECYCLE_HOOKS: &str = "HOTLUA_LIFECYCLE_HOOKS";

/// Configuration for a [`LuaRuntime`](crate::LuaRuntime).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory that relative script paths resolve against.
    ///
    /// Registry keys and environment names keep the path as given; only
    /// the filesystem lookup is affected. Also the directory watched by
    /// [`LuaRuntime::start_watching`](crate::LuaRuntime::start_watching).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_root: Option<PathBuf>,
    /// Call a module's `onload` after its first load and `onreload` after
    /// each successful reload.
    pub lifecycle_hooks: bool,
}

impl BridgeConfig {
    /// Defaults with environment variable overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load a JSON configuration file, then apply environment overrides.
    ///
    /// Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Set the script root.
    #[must_use]
    pub fn with_script_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.script_root = Some(root.into());
        self
    }

    /// Enable or disable lifecycle hooks.
    #[must_use]
    pub fn with_lifecycle_hooks(mut self, enabled: bool) -> Self {
        self.lifecycle_hooks = enabled;
        self
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_SCRIPT_ROOT).filter(|r| !r.is_empty()) {
            self.script_root = Some(PathBuf::from(root));
        }
        if let Some(hooks) = lookup(ENV_LIFECYCLE_HOOKS) {
            self.lifecycle_hooks = hooks == "1";
        }
    }
}
