//! Hot-reload scanner.
//!
//! Walks the file registry in path order, re-stats every loaded file and
//! reloads those whose modification time no longer matches the recorded
//! stamp. The fixed order keeps reload diagnostics identical from run to
//! run.

use mlua::Lua;

use crate::loader;
use crate::registry::RuntimeState;

/// Reload every registered file whose stamp changed.
///
/// Returns the number of files reloaded successfully. Failed reloads are
/// reported to the error sink and keep their previous stamp, so they are
/// retried on the next scan. Files that can no longer be stat'ed keep their
/// registry entry.
pub(crate) fn reload_changed(lua: &Lua, state: &RuntimeState) -> usize {
    let mut reloaded = 0;

    for (path, recorded) in state.files() {
        let current = match state.fs.stat(&path) {
            Ok(stamp) => stamp.mtime,
            Err(e) => {
                log::debug!("Skipping unreadable script {}: {}", path, e);
                continue;
            }
        };
        if current == recorded {
            continue;
        }

        log::debug!("Script changed, reloading: {}", path);
        match loader::load(lua, state, &path) {
            Ok(_) => reloaded += 1,
            Err(err) => state.report(&err),
        }
    }

    if reloaded > 0 {
        log::info!("Reloaded {} Lua module(s)", reloaded);
    }
    reloaded
}
