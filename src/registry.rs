//! Per-VM runtime state.
//!
//! One [`RuntimeState`] exists per [`LuaRuntime`](crate::LuaRuntime). It is
//! created with the runtime, shared with native closures through `Rc`/`Weak`
//! handles, and dropped with the runtime. Nothing here is ever looked up by
//! probing Lua globals.
//!
//! Borrows of the inner `RefCell`s are always released before control
//! passes into Lua, because script code can re-enter the runtime (a native
//! function calling back into Lua, `import` running during a load).

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::SystemTime;

use mlua::RegistryKey;

use crate::error::BridgeError;
use crate::export::NativeFunction;
use crate::fs::SourceFs;
use crate::marshal::ValueStack;

/// Callback receiving human-readable diagnostics.
pub type ErrorSink = Rc<dyn Fn(&str)>;

/// Shared, rebindable target of an exported native function.
pub(crate) type ExportSlot = Rc<RefCell<Option<NativeFunction>>>;

/// An exported name: the slot holding its current target and the Lua
/// function handed to scripts, which stays the same across rebinds.
pub(crate) struct ExportEntry {
    pub(crate) slot: ExportSlot,
    pub(crate) trampoline: RegistryKey,
}

pub(crate) struct RuntimeState {
    /// Script path -> mtime at its last successful load. Ordered by path.
    files: RefCell<BTreeMap<String, SystemTime>>,
    exports: RefCell<HashMap<String, ExportEntry>>,
    sink: RefCell<ErrorSink>,
    pub(crate) stack: ValueStack,
    pub(crate) fs: Box<dyn SourceFs>,
    pub(crate) lifecycle_hooks: bool,
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("files", &self.files.borrow().len())
            .field("exports", &self.exports.borrow().len())
            .field("stack_depth", &self.stack.depth())
            .field("lifecycle_hooks", &self.lifecycle_hooks)
            .finish_non_exhaustive()
    }
}

/// Default sink: route diagnostics through the `log` crate.
fn log_sink(message: &str) {
    log::error!(target: "hotlua", "{}", message);
}

impl RuntimeState {
    pub(crate) fn new(fs: Box<dyn SourceFs>, lifecycle_hooks: bool) -> Self {
        Self {
            files: RefCell::new(BTreeMap::new()),
            exports: RefCell::new(HashMap::new()),
            sink: RefCell::new(Rc::new(log_sink)),
            stack: ValueStack::new(),
            fs,
            lifecycle_hooks,
        }
    }

    // =========================================================================
    // File registry
    // =========================================================================

    pub(crate) fn record_load(&self, path: &str, mtime: SystemTime) {
        self.files.borrow_mut().insert(path.to_string(), mtime);
    }

    pub(crate) fn stamp(&self, path: &str) -> Option<SystemTime> {
        self.files.borrow().get(path).copied()
    }

    /// Registry entries in path order.
    pub(crate) fn files(&self) -> Vec<(String, SystemTime)> {
        self.files
            .borrow()
            .iter()
            .map(|(path, mtime)| (path.clone(), *mtime))
            .collect()
    }

    // =========================================================================
    // Exports
    // =========================================================================

    pub(crate) fn with_export<T>(&self, name: &str, f: impl FnOnce(&ExportEntry) -> T) -> Option<T> {
        self.exports.borrow().get(name).map(f)
    }

    pub(crate) fn insert_export(&self, name: &str, entry: ExportEntry) {
        self.exports.borrow_mut().insert(name.to_string(), entry);
    }

    pub(crate) fn export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .exports
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.slot.borrow().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    // =========================================================================
    // Error sink
    // =========================================================================

    pub(crate) fn set_sink(&self, sink: ErrorSink) {
        *self.sink.borrow_mut() = sink;
    }

    /// Deliver a diagnostic to the sink.
    pub(crate) fn report(&self, error: &BridgeError) {
        let sink = Rc::clone(&self.sink.borrow());
        sink(&error.to_string());
    }
}
