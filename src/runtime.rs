//! Lua runtime management.
//!
//! [`LuaRuntime`] owns the interpreter and its per-VM state and is the only
//! public entry point into the bridge. Every fallible operation reports its
//! failure to the error sink exactly once before returning it.

use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use mlua::{Lua, LuaOptions, MultiValue, StdLib, Table};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::export::{self, NativeFn, NativeFunction};
use crate::fs::{OsFs, SourceFs};
use crate::invoke;
use crate::loader;
use crate::marshal::{PullList, PushList};
use crate::primitives;
use crate::registry::RuntimeState;
use crate::reload;
use crate::resolver::Locator;
use crate::watcher::ScriptWatcher;

/// Lua scripting runtime with hot-reloadable modules.
///
/// Owns the Lua state. Not `Send` or `Sync`: every call on one runtime
/// must come from the thread that created it.
///
/// # Hot-Reload
///
/// Call [`reload_changed`](Self::reload_changed) to reload every loaded
/// file whose modification time changed. Alternatively call
/// [`start_watching`](Self::start_watching) once and
/// [`poll_and_reload`](Self::poll_and_reload) periodically in the event
/// loop, which only scans after the OS reported a change.
///
/// # Example
///
/// ```ignore
/// let runtime = LuaRuntime::new()?;
/// runtime.register("spawn", |kind: String, x: f64, y: f64| world.spawn(&kind, x, y))?;
///
/// // In event loop:
/// runtime.reload_changed();
/// let (a, b, sum): (i32, i32, i32) = runtime.call_by_file("test.lua", "test_sum", (3, 4))?;
/// ```
pub struct LuaRuntime {
    /// The Lua interpreter state.
    lua: Lua,
    /// Registry, value stack and error sink shared with native closures.
    state: Rc<RuntimeState>,
    config: BridgeConfig,
    /// Optional file watcher triggering reload scans.
    watcher: Option<ScriptWatcher>,
}

impl std::fmt::Debug for LuaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaRuntime")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("file_watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl LuaRuntime {
    /// Create a runtime configured from the environment, reading scripts
    /// from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if Lua state creation or primitive registration
    /// fails.
    pub fn new() -> Result<Self> {
        Self::with_config(BridgeConfig::from_env())
    }

    /// Create a runtime reading scripts from disk, relative paths resolving
    /// against `config.script_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if Lua state creation or primitive registration
    /// fails.
    pub fn with_config(config: BridgeConfig) -> Result<Self> {
        let fs = OsFs::new(config.script_root.clone());
        Self::with_fs(config, fs)
    }

    /// Create a runtime reading scripts through `fs`.
    ///
    /// # Errors
    ///
    /// Returns an error if Lua state creation or primitive registration
    /// fails.
    pub fn with_fs(config: BridgeConfig, fs: impl SourceFs + 'static) -> Result<Self> {
        // SAFETY: only the `debug` library is added to the safe set; it is
        // used for tracebacks and no C modules are loaded.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE | StdLib::DEBUG, LuaOptions::new()) };

        invoke::install(&lua).map_err(|e| anyhow!("Failed to install traceback handler: {e}"))?;
        loader::install(&lua).map_err(|e| anyhow!("Failed to create module table: {e}"))?;

        let state = Rc::new(RuntimeState::new(Box::new(fs), config.lifecycle_hooks));
        primitives::register_all(&lua, &state).context("Failed to register Lua primitives")?;

        log::debug!(
            "Lua runtime created (script_root={:?}, lifecycle_hooks={})",
            config.script_root,
            config.lifecycle_hooks
        );

        Ok(Self {
            lua,
            state,
            config,
            watcher: None,
        })
    }

    /// Replace the error sink. The default sink logs with `log::error!`.
    pub fn set_error_sink(&self, sink: impl Fn(&str) + 'static) {
        self.state.set_sink(Rc::new(sink));
    }

    /// Report a failure to the sink and pass the result through.
    fn reported<T>(&self, result: Result<T, BridgeError>) -> Result<T, BridgeError> {
        if let Err(ref err) = result {
            self.state.report(err);
        }
        result
    }

    // =========================================================================
    // Native Exports
    // =========================================================================

    /// Export a typed closure as the global `name`, or rebind it.
    ///
    /// # Errors
    ///
    /// Returns an error if the Lua function cannot be created.
    pub fn register<Args, Ret>(
        &self,
        name: &str,
        func: impl NativeFn<Args, Ret>,
    ) -> Result<(), BridgeError> {
        self.register_native(name, Some(NativeFunction::typed(func)))
    }

    /// Export a raw pass-through closure as the global `name`, or rebind it.
    ///
    /// # Errors
    ///
    /// Returns an error if the Lua function cannot be created.
    pub fn register_raw<F>(&self, name: &str, func: F) -> Result<(), BridgeError>
    where
        F: Fn(&Lua, MultiValue) -> mlua::Result<MultiValue> + 'static,
    {
        self.register_native(name, Some(NativeFunction::raw(func)))
    }

    /// Bind, rebind (`Some`) or remove (`None`) the global `name`.
    ///
    /// Rebinding keeps the Lua function identity, so references captured by
    /// scripts follow the new target.
    ///
    /// # Errors
    ///
    /// Returns an error if the Lua function cannot be created or the global
    /// cannot be set.
    pub fn register_native(
        &self,
        name: &str,
        target: Option<NativeFunction>,
    ) -> Result<(), BridgeError> {
        let result = export::register(&self.lua, &self.state, name, target).map_err(BridgeError::from);
        self.reported(result)
    }

    /// Remove the global `name`. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the global cannot be cleared.
    pub fn unregister(&self, name: &str) -> Result<(), BridgeError> {
        self.register_native(name, None)
    }

    // =========================================================================
    // Module Loading
    // =========================================================================

    /// Load or reload the script at `path`, always executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, compiled or executed.
    /// A failed reload leaves the previous bindings in place.
    pub fn load(&self, path: &str) -> Result<Table, BridgeError> {
        self.reported(loader::load(&self.lua, &self.state, path))
    }

    /// Return the environment of `path`, loading it only if needed.
    ///
    /// This is the operation behind the script-side `import`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file has to be loaded and loading fails.
    pub fn import(&self, path: &str) -> Result<Table, BridgeError> {
        self.reported(loader::load_or_get(&self.lua, &self.state, path))
    }

    /// Execute `source` inside the environment called `name`.
    ///
    /// The environment is created on first use and falls back to globals
    /// like a file module. The file registry is not touched, so the scanner
    /// never reloads it.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to compile or execute.
    pub fn load_string(&self, name: &str, source: &str) -> Result<Table, BridgeError> {
        self.reported(loader::load_string(&self.lua, &self.state, name, source))
    }

    /// The environment of a loaded file, if any.
    #[must_use]
    pub fn environment(&self, path: &str) -> Option<Table> {
        loader::environment(&self.lua, &loader::env_name(path))
            .ok()
            .flatten()
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Call `function` under `locator` with `args`, returning `R`.
    ///
    /// # Errors
    ///
    /// Returns an error if the function cannot be resolved, raises an
    /// error, or returns values that do not convert to `R`.
    pub fn call<A, R>(&self, locator: Locator<'_>, function: &str, args: A) -> Result<R, BridgeError>
    where
        A: PushList,
        R: PullList,
    {
        self.reported(invoke::invoke(&self.lua, &self.state, locator, function, args))
    }

    /// Call a top-level function of the module at `path`, loading it first
    /// if needed.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn call_by_file<A, R>(&self, path: &str, function: &str, args: A) -> Result<R, BridgeError>
    where
        A: PushList,
        R: PullList,
    {
        self.call(Locator::File(path), function, args)
    }

    /// Call `table.function` where `table` is a global table.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn call_by_table<A, R>(&self, table: &str, function: &str, args: A) -> Result<R, BridgeError>
    where
        A: PushList,
        R: PullList,
    {
        self.call(Locator::Table(table), function, args)
    }

    /// Call a global function.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn call_by_global<A, R>(&self, function: &str, args: A) -> Result<R, BridgeError>
    where
        A: PushList,
        R: PullList,
    {
        self.call(Locator::Global, function, args)
    }

    // =========================================================================
    // Hot-Reload Support
    // =========================================================================

    /// Reload every loaded file whose modification time changed.
    ///
    /// Files are processed in path order. Failures are reported and the
    /// file keeps its previous bindings and stamp.
    ///
    /// # Returns
    ///
    /// The number of files that were reloaded successfully.
    pub fn reload_changed(&self) -> usize {
        reload::reload_changed(&self.lua, &self.state)
    }

    /// Start watching `script_root` for changes.
    ///
    /// Does nothing (successfully) when no script root is configured or the
    /// directory does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file watcher cannot be created or started.
    pub fn start_watching(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            log::warn!("File watching already started");
            return Ok(());
        }

        let Some(root) = self.config.script_root.clone() else {
            log::debug!("No script root configured, skipping file watch");
            return Ok(());
        };
        if !root.exists() {
            log::debug!("Script root does not exist, skipping file watch: {:?}", root);
            return Ok(());
        }

        let mut watcher = ScriptWatcher::new(root)?;
        watcher.start()?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop watching for changes.
    pub fn stop_watching(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
    }

    /// Check if file watching is enabled.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(ScriptWatcher::is_active)
    }

    /// Drain watcher events and, if any `.lua` file changed, run
    /// [`reload_changed`](Self::reload_changed).
    ///
    /// Call this periodically in the event loop. Does nothing if file
    /// watching is not enabled.
    ///
    /// # Returns
    ///
    /// The number of files that were reloaded.
    pub fn poll_and_reload(&self) -> usize {
        let Some(ref watcher) = self.watcher else {
            return 0;
        };

        let changes = watcher.poll_changes();
        if changes.is_empty() {
            return 0;
        }

        log::debug!("Detected {} Lua file change(s): {:?}", changes.len(), changes);
        self.reload_changed()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Whether `path` has been loaded successfully.
    #[must_use]
    pub fn is_loaded(&self, path: &str) -> bool {
        self.state.stamp(path).is_some()
    }

    /// Paths of successfully loaded files, in path order.
    #[must_use]
    pub fn loaded_files(&self) -> Vec<String> {
        self.state.files().into_iter().map(|(path, _)| path).collect()
    }

    /// Names currently exported to scripts, sorted.
    #[must_use]
    pub fn exported_names(&self) -> Vec<String> {
        self.state.export_names()
    }

    /// Number of values on the marshalling stack. Zero between calls.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.state.stack.depth()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The watched directory, if watching.
    #[must_use]
    pub fn watched_root(&self) -> Option<&Path> {
        self.watcher.as_ref().map(ScriptWatcher::root)
    }

    /// Get a reference to the underlying Lua state.
    ///
    /// Direct manipulation bypasses error reporting and stack bookkeeping.
    #[must_use]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}
