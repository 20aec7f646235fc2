//! Logging primitive for Lua scripts.
//!
//! Exposes the `log` crate to scripts through a global `log` table:
//!
//! ```lua
//! log.info("Module loaded")
//! log.warn("Missing tuning value, using default")
//! log.debug("Spawned entity " .. id)
//! ```
//!
//! Messages use the `lua` target, so hosts can filter script output
//! separately (`RUST_LOG=lua=debug`).

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Script-facing name and level of each logging function.
const LEVELS: [(&str, log::Level); 4] = [
    ("info", log::Level::Info),
    ("warn", log::Level::Warn),
    ("error", log::Level::Error),
    ("debug", log::Level::Debug),
];

/// Register the global `log` table.
///
/// Each function accepts any value and logs its `tostring` form.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    for (name, level) in LEVELS {
        let log_fn = lua
            .create_function(move |_, msg: mlua::Value| {
                let text = msg.to_string()?;
                log::log!(target: "lua", level, "{}", text);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, log_fn)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}
