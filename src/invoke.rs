//! Protected calls into Lua.
//!
//! Every call from Rust into script code (invocation entry points, module
//! top-level execution, lifecycle hooks) goes through [`protected_call`]:
//!
//! ```text
//! baseline ─┐
//!           │ function          <- pushed first
//!           │ arg 1 .. arg N    <- pushed left to right
//!           └ traceback_call(function, args...)
//!                 = xpcall(function, handler, args...)
//!           ┌ ok, ret 1 .. ret K
//!           │ (status dropped, results adjusted to M)
//! baseline ─┤ ret 1 .. ret M    <- slot k read from top - M + k
//! ```
//!
//! The message handler sits below the call frame inside `xpcall`, so the
//! traceback it appends is taken at the point of failure. A scope guard
//! truncates the value stack back to the baseline on every exit path.

use mlua::{Function, Lua, MultiValue};

use crate::error::BridgeError;
use crate::marshal::{PullList, PushList};
use crate::registry::RuntimeState;
use crate::resolver::{self, Locator};

/// Named registry slot holding the traceback-enabled call wrapper.
const TRACEBACK_CALL_KEY: &str = "hotlua.traceback_call";

/// Wrapper installed once per VM. Captures the library functions it needs
/// so scripts that shadow `xpcall` or `debug` cannot break diagnostics.
const TRACEBACK_CALL_SOURCE: &str = r"
local xpcall, traceback, tostring, type = xpcall, debug.traceback, tostring, type

local function handler(err)
    if type(err) ~= 'string' then
        err = tostring(err)
    end
    return traceback(err, 2)
end

return function(f, ...)
    return xpcall(f, handler, ...)
end
";

/// Install the traceback call wrapper into the Lua registry.
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
    let wrapper: Function = lua
        .load(TRACEBACK_CALL_SOURCE)
        .set_name("=hotlua.traceback")
        .eval()?;
    lua.set_named_registry_value(TRACEBACK_CALL_KEY, wrapper)
}

/// Resolve `function` through `locator` and call it.
pub(crate) fn invoke<A, R>(
    lua: &Lua,
    state: &RuntimeState,
    locator: Locator<'_>,
    function: &str,
    args: A,
) -> Result<R, BridgeError>
where
    A: PushList,
    R: PullList,
{
    // Resolution leaves the value stack untouched; any module load it
    // triggers runs through its own protected call.
    let func = resolver::resolve(lua, state, locator, function)?;
    protected_call(lua, state, func, args, &locator.describe(function))
}

/// Call `func` with `args` under the traceback handler and pull `R`.
///
/// `context` names the callee in diagnostics.
pub(crate) fn protected_call<A, R>(
    lua: &Lua,
    state: &RuntimeState,
    func: Function,
    args: A,
    context: &str,
) -> Result<R, BridgeError>
where
    A: PushList,
    R: PullList,
{
    let stack = &state.stack;
    let baseline = stack.depth();
    let _restore = scopeguard::guard(baseline, |base| stack.truncate(base));

    let wrapper: Function = lua.named_registry_value(TRACEBACK_CALL_KEY)?;

    stack.push(mlua::Value::Function(func));
    stack.push_list(lua, args)?;

    let mut results = wrapper.call::<MultiValue>(stack.frame(baseline))?.into_iter();
    stack.truncate(baseline);

    if !matches!(results.next(), Some(mlua::Value::Boolean(true))) {
        let traceback = results
            .next()
            .map_or_else(|| "unknown error".to_string(), |err| describe(&err));
        return Err(BridgeError::Runtime {
            context: context.to_string(),
            traceback,
        });
    }

    stack.extend(results.chain(std::iter::repeat(mlua::Value::Nil)).take(R::COUNT));
    stack.pull::<R>().map_err(|source| BridgeError::Marshal {
        context: context.to_string(),
        source,
    })
}

/// Render an error value produced by the message handler.
fn describe(value: &mlua::Value) -> String {
    match value {
        mlua::Value::String(s) => String::from_utf8_lossy(&s.as_bytes()).into_owned(),
        other => format!("{other:?}"),
    }
}
