//! Callable lookup.
//!
//! A function is addressed one of three ways (see [`Locator`]). Resolution
//! has no side effects beyond loading a not-yet-loaded module for
//! [`Locator::File`]. A missing name and a value that is not a function are
//! the same failure.

use mlua::{Function, Lua};

use crate::error::BridgeError;
use crate::loader;
use crate::registry::RuntimeState;

/// Where to look up a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    /// A top-level function of the module loaded from this path.
    File(&'a str),
    /// A field of the global table with this name.
    Table(&'a str),
    /// A global function.
    Global,
}

impl Locator<'_> {
    /// Human-readable description of `function` under this locator.
    #[must_use]
    pub fn describe(&self, function: &str) -> String {
        match self {
            Self::File(path) => format!("function '{function}' in module '{path}'"),
            Self::Table(table) => format!("function '{table}.{function}'"),
            Self::Global => format!("global function '{function}'"),
        }
    }
}

/// Find `function` under `locator`.
pub(crate) fn resolve(
    lua: &Lua,
    state: &RuntimeState,
    locator: Locator<'_>,
    function: &str,
) -> Result<Function, BridgeError> {
    let value = match locator {
        Locator::File(path) => lookup(&loader::load_or_get(lua, state, path)?, function),
        Locator::Table(table) => match lookup(&lua.globals(), table) {
            Ok(mlua::Value::Table(container)) => lookup(&container, function),
            other => other,
        },
        Locator::Global => lookup(&lua.globals(), function),
    };

    match value {
        Ok(mlua::Value::Function(func)) => Ok(func),
        Ok(_) => Err(BridgeError::resolution(locator.describe(function))),
        Err(e) => {
            log::debug!("Lookup of {} raised: {}", locator.describe(function), e);
            Err(BridgeError::resolution(locator.describe(function)))
        }
    }
}

/// Indexed read that honors `__index`. A metamethod that raises (strict
/// globals, for example) counts as a missing name.
fn lookup(table: &mlua::Table, key: &str) -> mlua::Result<mlua::Value> {
    table.get::<mlua::Value>(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    fn setup(fs: MemoryFs) -> (Lua, RuntimeState) {
        // SAFETY: test-only VM, needs the debug library for tracebacks.
        let lua = unsafe { Lua::unsafe_new() };
        crate::invoke::install(&lua).expect("Should install traceback handler");
        loader::install(&lua).expect("Should install module table");
        (lua, RuntimeState::new(Box::new(fs), false))
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Locator::File("a.lua").describe("f"),
            "function 'f' in module 'a.lua'"
        );
        assert_eq!(Locator::Table("game").describe("tick"), "function 'game.tick'");
        assert_eq!(Locator::Global.describe("main"), "global function 'main'");
    }

    #[test]
    fn test_global_lookup() {
        let (lua, state) = setup(MemoryFs::new());
        lua.load("function main() end; not_a_function = 5").exec().expect("Should run");

        assert!(resolve(&lua, &state, Locator::Global, "main").is_ok());
        let err = resolve(&lua, &state, Locator::Global, "not_a_function")
            .expect_err("Numbers are not callable");
        assert!(err.is_resolution());
        assert!(resolve(&lua, &state, Locator::Global, "absent").is_err());
    }

    #[test]
    fn test_table_lookup() {
        let (lua, state) = setup(MemoryFs::new());
        lua.load("game = { tick = function() end }; scalar = 1")
            .exec()
            .expect("Should run");

        assert!(resolve(&lua, &state, Locator::Table("game"), "tick").is_ok());
        assert!(resolve(&lua, &state, Locator::Table("game"), "draw").is_err());
        assert!(resolve(&lua, &state, Locator::Table("scalar"), "tick").is_err());
        assert!(resolve(&lua, &state, Locator::Table("missing"), "tick").is_err());
    }

    #[test]
    fn test_file_lookup_loads_module() {
        let fs = MemoryFs::from_sources([("m.lua", "function f() return 1 end")]);
        let (lua, state) = setup(fs);

        assert!(state.stamp("m.lua").is_none());
        assert!(resolve(&lua, &state, Locator::File("m.lua"), "f").is_ok());
        assert!(state.stamp("m.lua").is_some());

        let err = resolve(&lua, &state, Locator::File("m.lua"), "g").expect_err("g is undefined");
        assert!(err.is_resolution());
    }

    #[test]
    fn test_strict_globals_report_missing_names_as_resolution() {
        let fs = MemoryFs::from_sources([("m.lua", "function f() return 1 end")]);
        let (lua, state) = setup(fs);
        lua.load("game = {}; function main() end")
            .exec()
            .expect("Should run");
        lua.load(
            "setmetatable(_G, { __index = function(_, k) error('undefined global ' .. k, 2) end })",
        )
        .exec()
        .expect("Should install strict globals");

        assert!(resolve(&lua, &state, Locator::Global, "main").is_ok());
        let err = resolve(&lua, &state, Locator::Global, "missing_fn")
            .expect_err("Strict lookup raises");
        assert!(err.is_resolution(), "unexpected error: {err:?}");

        let err = resolve(&lua, &state, Locator::Table("no_such_table"), "tick")
            .expect_err("Strict lookup raises");
        assert!(err.is_resolution(), "unexpected error: {err:?}");

        // Module environments fall back to the strict globals too.
        assert!(resolve(&lua, &state, Locator::File("m.lua"), "f").is_ok());
        let err = resolve(&lua, &state, Locator::File("m.lua"), "g")
            .expect_err("Strict lookup raises");
        assert!(err.is_resolution(), "unexpected error: {err:?}");
    }

    #[test]
    fn test_table_lookup_follows_index_chain() {
        let (lua, state) = setup(MemoryFs::new());
        lua.load(
            "local base = { tick = function() end }; game = setmetatable({}, { __index = base })",
        )
        .exec()
        .expect("Should run");

        assert!(resolve(&lua, &state, Locator::Table("game"), "tick").is_ok());
    }

    #[test]
    fn test_file_lookup_of_missing_module_is_io_error() {
        let (lua, state) = setup(MemoryFs::new());
        let err = resolve(&lua, &state, Locator::File("nope.lua"), "f").expect_err("Should fail");
        assert!(matches!(err, BridgeError::Io { .. }));
    }
}
