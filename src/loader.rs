//! Module loading into isolated environments.
//!
//! Each script file runs with its own environment table as `_ENV`. The
//! environment's metatable indexes the global table, so a module reads any
//! global it does not define itself, while its own top-level assignments
//! stay in the environment.
//!
//! Environments live in a table in the Lua registry keyed by
//! [`ENV_PREFIX`] + path; the same string names the compiled chunk, so it
//! shows up in error messages and tracebacks.
//!
//! # Reload semantics
//!
//! Reloading reuses the environment table (handles held by scripts or the
//! host stay valid) but replaces its contents wholesale: existing bindings
//! are set aside, the file runs against the emptied table, and on failure
//! the previous bindings are put back. Values created under the old
//! bindings are not migrated. The global fallback is re-installed before
//! every reload, even if the module replaced its own metatable.

use mlua::{Function, Lua, Table};

use crate::error::BridgeError;
use crate::fs::strip_bom;
use crate::invoke;
use crate::registry::RuntimeState;

/// Prefix of every module environment name.
pub const ENV_PREFIX: &str = "__module:";

/// Named registry slot holding the environment table.
const MODULES_KEY: &str = "hotlua.modules";

/// Name of the environment (and chunk) for a script path.
#[must_use]
pub fn env_name(path: &str) -> String {
    format!("{ENV_PREFIX}{path}")
}

/// Whether an execution created the environment or replaced its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Loaded,
    Reloaded,
}

impl LoadOutcome {
    fn hook(self) -> &'static str {
        match self {
            Self::Loaded => "onload",
            Self::Reloaded => "onreload",
        }
    }
}

/// Create the environment table in the Lua registry.
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
    lua.set_named_registry_value(MODULES_KEY, lua.create_table()?)
}

fn modules(lua: &Lua) -> mlua::Result<Table> {
    lua.named_registry_value(MODULES_KEY)
}

/// Look up an existing environment by name.
pub(crate) fn environment(lua: &Lua, name: &str) -> mlua::Result<Option<Table>> {
    modules(lua)?.raw_get(name)
}

/// New empty environment falling back to the global table.
fn new_environment(lua: &Lua) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    link_fallback(lua, &env)?;
    Ok(env)
}

/// Point `env`'s metatable at the global table, replacing whatever a
/// previous run of the module installed.
fn link_fallback(lua: &Lua, env: &Table) -> mlua::Result<()> {
    let meta = lua.create_table()?;
    meta.raw_set("__index", lua.globals())?;
    env.set_metatable(Some(meta));
    Ok(())
}

/// Load (or reload) the script at `path` and return its environment.
///
/// Always executes the file. The registry stamp is recorded only after
/// the file compiled and ran successfully.
pub(crate) fn load(lua: &Lua, state: &RuntimeState, path: &str) -> Result<Table, BridgeError> {
    let io_error = |source| BridgeError::Io {
        path: path.to_string(),
        source,
    };
    let stamp = state.fs.stat(path).map_err(io_error)?;
    let bytes = state.fs.read(path, stamp.size).map_err(io_error)?;

    let (env, outcome) = execute(lua, state, &env_name(path), strip_bom(&bytes))?;
    state.record_load(path, stamp.mtime);
    log::debug!("Loaded Lua module: {} ({:?})", path, outcome);

    if state.lifecycle_hooks {
        run_hook(lua, state, &env, path, outcome.hook());
    }
    Ok(env)
}

/// Return the environment for `path`, loading the file only if it has no
/// environment yet.
pub(crate) fn load_or_get(
    lua: &Lua,
    state: &RuntimeState,
    path: &str,
) -> Result<Table, BridgeError> {
    match environment(lua, &env_name(path))? {
        Some(env) => Ok(env),
        None => load(lua, state, path),
    }
}

/// Execute source text into the environment called `name`.
///
/// The environment is created if needed. The file registry is not touched.
pub(crate) fn load_string(
    lua: &Lua,
    state: &RuntimeState,
    name: &str,
    source: &str,
) -> Result<Table, BridgeError> {
    let (env, _) = execute(lua, state, name, strip_bom(source.as_bytes()))?;
    log::debug!("Loaded Lua source into {}", name);
    Ok(env)
}

/// Compile `source` as chunk `name` and run it inside the environment of
/// the same name.
fn execute(
    lua: &Lua,
    state: &RuntimeState,
    name: &str,
    source: &[u8],
) -> Result<(Table, LoadOutcome), BridgeError> {
    let existing = environment(lua, name)?;
    let env = match &existing {
        Some(env) => env.clone(),
        None => new_environment(lua)?,
    };

    let chunk: Function = lua
        .load(source)
        .set_name(name)
        .set_environment(env.clone())
        .into_function()
        .map_err(|e| BridgeError::Compile {
            chunk: name.to_string(),
            message: compile_message(e),
        })?;

    let (outcome, previous) = if existing.is_some() {
        let previous = take_bindings(&env)?;
        link_fallback(lua, &env)?;
        (LoadOutcome::Reloaded, previous)
    } else {
        // Visible to `import` while the chunk runs.
        modules(lua)?.raw_set(name, env.clone())?;
        (LoadOutcome::Loaded, Vec::new())
    };

    match invoke::protected_call::<(), ()>(lua, state, chunk, (), name) {
        Ok(()) => Ok((env, outcome)),
        Err(err) => {
            let rollback = match outcome {
                LoadOutcome::Reloaded => restore_bindings(&env, previous),
                LoadOutcome::Loaded => modules(lua).and_then(|m| m.raw_set(name, mlua::Value::Nil)),
            };
            if let Err(e) = rollback {
                log::warn!("Failed to roll back environment {}: {}", name, e);
            }
            Err(err)
        }
    }
}

fn compile_message(error: mlua::Error) -> String {
    match error {
        mlua::Error::SyntaxError { message, .. } => message,
        other => other.to_string(),
    }
}

/// Remove every binding from `env`, returning them.
fn take_bindings(env: &Table) -> mlua::Result<Vec<(mlua::Value, mlua::Value)>> {
    let bindings = env
        .clone()
        .pairs::<mlua::Value, mlua::Value>()
        .collect::<mlua::Result<Vec<_>>>()?;
    for (key, _) in &bindings {
        env.raw_set(key.clone(), mlua::Value::Nil)?;
    }
    Ok(bindings)
}

/// Replace the contents of `env` with `bindings`.
fn restore_bindings(env: &Table, bindings: Vec<(mlua::Value, mlua::Value)>) -> mlua::Result<()> {
    take_bindings(env)?;
    for (key, value) in bindings {
        env.raw_set(key, value)?;
    }
    Ok(())
}

/// Call a module-defined lifecycle hook, if present. Failures are reported
/// but do not undo the load.
fn run_hook(lua: &Lua, state: &RuntimeState, env: &Table, path: &str, hook: &str) {
    let Ok(mlua::Value::Function(func)) = env.raw_get::<mlua::Value>(hook) else {
        return;
    };
    let context = format!("{hook} hook of module '{path}'");
    if let Err(err) = invoke::protected_call::<(), ()>(lua, state, func, (), &context) {
        state.report(&err);
    }
}
