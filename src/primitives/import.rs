//! `import` primitive.
//!
//! ```lua
//! local enemies = import("ai/enemies.lua")
//! enemies.spawn_wave(3)
//! ```
//!
//! Returns the module's environment, loading the file first if it has not
//! been loaded. An already-loaded module is returned as-is, without running
//! its top-level code again. On failure the error is reported to the error
//! sink and `import` returns `nil`.

use std::rc::{Rc, Weak};

use anyhow::{anyhow, Result};
use mlua::{Lua, MultiValue};

use crate::export::{self, NativeFunction};
use crate::loader;
use crate::registry::RuntimeState;

/// Register `import` as a native export.
///
/// # Errors
///
/// Returns an error if the export cannot be created.
pub fn register(lua: &Lua, state: &Rc<RuntimeState>) -> Result<()> {
    let native = import_function(Rc::downgrade(state));
    export::register(lua, state, "import", Some(native))
        .map_err(|e| anyhow!("Failed to register import: {e}"))
}

fn import_function(state: Weak<RuntimeState>) -> NativeFunction {
    NativeFunction::raw(move |lua, args| {
        let nil = || Ok(MultiValue::from_iter([mlua::Value::Nil]));

        let Some(state) = state.upgrade() else {
            return nil();
        };
        let mut args = args.into_iter();
        let path = match (args.next(), args.next()) {
            (Some(mlua::Value::String(path)), None) => path.to_str()?.to_string(),
            _ => return nil(),
        };

        match loader::load_or_get(lua, &state, &path) {
            Ok(env) => Ok(MultiValue::from_iter([mlua::Value::Table(env)])),
            Err(err) => {
                state.report(&err);
                nil()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    fn setup(fs: &MemoryFs) -> (Lua, Rc<RuntimeState>) {
        // SAFETY: test-only VM, needs the debug library for tracebacks.
        let lua = unsafe { Lua::unsafe_new() };
        crate::invoke::install(&lua).expect("Should install traceback handler");
        loader::install(&lua).expect("Should install module table");
        let state = Rc::new(RuntimeState::new(Box::new(fs.clone()), false));
        register(&lua, &state).expect("Should register import");
        (lua, state)
    }

    #[test]
    fn test_import_returns_environment() {
        let fs = MemoryFs::from_sources([("util.lua", "function twice(x) return x * 2 end")]);
        let (lua, _state) = setup(&fs);

        let result: i64 = lua
            .load("return import('util.lua').twice(21)")
            .eval()
            .expect("Should import");
        assert_eq!(result, 42);
    }

    #[test]
    fn test_import_reuses_loaded_module() {
        let fs = MemoryFs::from_sources([("counter.lua", "count = (count or 0) + 1")]);
        let (lua, _state) = setup(&fs);

        let same: bool = lua
            .load("local a = import('counter.lua'); local b = import('counter.lua'); return rawequal(a, b) and a.count == 1")
            .eval()
            .expect("Should import twice");
        assert!(same);
    }

    #[test]
    fn test_import_failure_returns_nil_and_reports() {
        let fs = MemoryFs::new();
        let (lua, state) = setup(&fs);
        let seen = Rc::new(std::cell::RefCell::new(Vec::<String>::new()));
        let sink_seen = Rc::clone(&seen);
        state.set_sink(Rc::new(move |msg: &str| sink_seen.borrow_mut().push(msg.to_string())));

        let missing: mlua::Value = lua.load("return import('absent.lua')").eval().expect("Should run");
        assert!(missing.is_nil());
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("absent.lua"));
    }

    #[test]
    fn test_import_rejects_bad_arguments() {
        let fs = MemoryFs::new();
        let (lua, _state) = setup(&fs);
        // Only string paths are accepted; numbers are not converted to a path.
        let results: (mlua::Value, mlua::Value, mlua::Value) = lua
            .load("return import(), import(42), import('a.lua', 'b.lua')")
            .eval()
            .expect("Should run");
        assert!(results.0.is_nil() && results.1.is_nil() && results.2.is_nil());
    }

    #[test]
    fn test_self_import_during_load_terminates() {
        let fs = MemoryFs::from_sources([("self.lua", "me = import('self.lua'); ready = true")]);
        let (lua, _state) = setup(&fs);

        let ready: bool = lua
            .load("local m = import('self.lua'); return rawequal(m.me, m) and m.ready")
            .eval()
            .expect("Should import");
        assert!(ready);
    }
}
