//! Built-in functions available to every script.
//!
//! # Available Primitives
//!
//! - `log` - Logging functions (info, warn, error, debug)
//! - `import` - Load-or-get a module environment by path
//!
//! Primitives are registered once when the runtime is created. `import` is
//! an ordinary export, so a host may rebind or remove it like any other.

pub mod import;
pub mod log;

use std::rc::Rc;

use anyhow::Result;
use mlua::Lua;

use crate::registry::RuntimeState;

/// Register all primitives with the Lua state.
///
/// # Errors
///
/// Returns an error if any primitive fails to register.
pub(crate) fn register_all(lua: &Lua, state: &Rc<RuntimeState>) -> Result<()> {
    log::register(lua)?;
    import::register(lua, state)?;
    Ok(())
}
