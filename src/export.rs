//! Native functions exported to scripts.
//!
//! Every exported name is backed by one Lua function (the trampoline) that
//! forwards to a shared, rebindable slot. Rebinding a name swaps the slot's
//! contents, so script code that captured the function earlier (for example
//! `local spawn = spawn` at the top of a module) sees the new target without
//! reloading anything.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use mlua::{Lua, MultiValue};

use crate::marshal::{FromValue, PullList, PushList};
use crate::registry::{ExportEntry, ExportSlot, RuntimeState};

type Handler = dyn Fn(&Lua, MultiValue) -> mlua::Result<MultiValue>;

/// A native function callable from Lua.
///
/// Built either from a typed closure ([`NativeFunction::typed`]) whose
/// parameters and return values go through the marshalling adapters, or
/// from a raw closure ([`NativeFunction::raw`]) that receives the call
/// frame unconverted.
#[derive(Clone)]
pub struct NativeFunction {
    handler: Rc<Handler>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("handler", &Rc::as_ptr(&self.handler))
            .finish()
    }
}

impl NativeFunction {
    /// Wrap a raw pass-through function.
    ///
    /// Used for variadic functions or anything that needs Lua values other
    /// than the marshalled kinds.
    pub fn raw<F>(func: F) -> Self
    where
        F: Fn(&Lua, MultiValue) -> mlua::Result<MultiValue> + 'static,
    {
        Self {
            handler: Rc::new(func),
        }
    }

    /// Wrap a typed closure.
    pub fn typed<Args, Ret, F>(func: F) -> Self
    where
        F: NativeFn<Args, Ret>,
    {
        func.into_native()
    }

    /// Invoke the function with a Lua call frame.
    pub fn call(&self, lua: &Lua, args: MultiValue) -> mlua::Result<MultiValue> {
        (self.handler)(lua, args)
    }
}

/// Closures that can be exported as typed native functions.
///
/// Implemented for `Fn(A, B, ..) -> R` with up to twelve parameters, where
/// every parameter implements [`FromValue`] and the return type implements
/// [`PushList`] (a single value, a tuple, or `()`).
pub trait NativeFn<Args, Ret>: 'static {
    /// Convert into a [`NativeFunction`].
    fn into_native(self) -> NativeFunction;
}

fn into_frame(lua: &Lua, ret: impl PushList) -> mlua::Result<MultiValue> {
    Ok(ret.into_lua_values(lua)?.into_iter().collect())
}

macro_rules! native_fn {
    ($($name:ident),*) => {
        impl<Func, Ret, $($name),*> NativeFn<($($name,)*), Ret> for Func
        where
            Func: Fn($($name),*) -> Ret + 'static,
            Ret: PushList + 'static,
            $($name: FromValue + 'static,)*
        {
            #[allow(non_snake_case, reason = "type parameter names double as bindings")]
            fn into_native(self) -> NativeFunction {
                NativeFunction::raw(move |lua, args| {
                    let args: Vec<mlua::Value> = args.into_iter().collect();
                    let ($($name,)*) = <($($name,)*) as PullList>::from_lua_values(&args)
                        .map_err(mlua::Error::external)?;
                    into_frame(lua, self($($name),*))
                })
            }
        }
    };
}

impl<Func, Ret> NativeFn<(), Ret> for Func
where
    Func: Fn() -> Ret + 'static,
    Ret: PushList + 'static,
{
    fn into_native(self) -> NativeFunction {
        NativeFunction::raw(move |lua, _args| into_frame(lua, self()))
    }
}

native_fn!(A);
native_fn!(A, B);
native_fn!(A, B, C);
native_fn!(A, B, C, D);
native_fn!(A, B, C, D, E);
native_fn!(A, B, C, D, E, F);
native_fn!(A, B, C, D, E, F, G);
native_fn!(A, B, C, D, E, F, G, H);
native_fn!(A, B, C, D, E, F, G, H, I);
native_fn!(A, B, C, D, E, F, G, H, I, J);
native_fn!(A, B, C, D, E, F, G, H, I, J, K);
native_fn!(A, B, C, D, E, F, G, H, I, J, K, L);

/// Bind, rebind or remove the global `name`.
///
/// The first registration of a name creates its trampoline. Later
/// registrations only replace the target. `None` clears the target and sets
/// the global to nil; registering again restores the same trampoline.
pub(crate) fn register(
    lua: &Lua,
    state: &RuntimeState,
    name: &str,
    target: Option<NativeFunction>,
) -> mlua::Result<()> {
    let bound = target.is_some();

    let existing = state.with_export(name, |entry| {
        *entry.slot.borrow_mut() = target.clone();
        lua.registry_value::<mlua::Function>(&entry.trampoline)
    });

    let trampoline = match existing {
        Some(trampoline) => trampoline?,
        None if !bound => {
            // Nothing to remove.
            return Ok(());
        }
        None => {
            let slot: ExportSlot = Rc::new(RefCell::new(target));
            let trampoline = create_trampoline(lua, name, Rc::clone(&slot))?;
            let key = lua.create_registry_value(trampoline.clone())?;
            state.insert_export(name, ExportEntry { slot, trampoline: key });
            trampoline
        }
    };

    if bound {
        lua.globals().set(name, trampoline)?;
        log::debug!("Registered native function: {}", name);
    } else {
        lua.globals().set(name, mlua::Value::Nil)?;
        log::debug!("Unregistered native function: {}", name);
    }
    Ok(())
}

fn create_trampoline(lua: &Lua, name: &str, slot: ExportSlot) -> mlua::Result<mlua::Function> {
    let name = name.to_string();
    lua.create_function(move |lua, args: MultiValue| {
        // No borrow of the slot is held while the target runs.
        let target = slot.borrow().clone();
        match target {
            Some(native) => native.call(lua, args),
            None => Err(mlua::Error::runtime(format!(
                "native function '{name}' is no longer registered"
            ))),
        }
    })
}
