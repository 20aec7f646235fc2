//! hotlua - Hot-reloadable Lua modules for Rust hosts.
//!
//! Loads Lua 5.4 script files into isolated module environments, reloads
//! them in place when they change on disk, and calls script functions with
//! typed arguments and results.
//!
//! # Architecture
//!
//! - **Runtime** - Owns the Lua state and per-VM registry; the public API
//! - **Marshaller** - Typed conversion of argument and return lists
//! - **Loader** - Per-file environments with global fallback and in-place reload
//! - **Resolver** - File-, table- and global-scoped function lookup
//! - **Invocation** - Protected calls with tracebacks and stack restoration
//! - **Scanner** - Stamp-based reload of changed files, in path order
//!
//! # Modules
//!
//! - [`marshal`] - Value kinds, adapters and the value stack
//! - [`export`] - Native functions exported to scripts
//! - [`fs`] - Script source access (disk or memory)
//! - [`config`] - Runtime configuration
//! - [`watcher`] - OS file watching
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```ignore
//! use hotlua::{BridgeConfig, LuaRuntime};
//!
//! let runtime = LuaRuntime::with_config(BridgeConfig::default().with_script_root("scripts"))?;
//! runtime.register("clamp", |v: f64, lo: f64, hi: f64| v.clamp(lo, hi))?;
//!
//! let (a, b, sum): (i32, i32, i32) = runtime.call_by_file("test.lua", "test_sum", (3, 4))?;
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod fs;
pub mod marshal;
pub mod watcher;

mod invoke;
mod loader;
mod primitives;
mod registry;
mod reload;
mod resolver;
mod runtime;

// Re-export commonly used types
pub use config::BridgeConfig;
pub use error::{BridgeError, MarshalError};
pub use export::{NativeFn, NativeFunction};
pub use fs::{FileStamp, MemoryFs, OsFs, SourceFs};
pub use loader::{env_name, ENV_PREFIX};
pub use marshal::{FromValue, IntoValue, PullList, PushList, Value, ValueKind, ValueStack};
pub use registry::ErrorSink;
pub use resolver::Locator;
pub use runtime::LuaRuntime;

// Re-export mlua so hosts use the same version
pub use mlua;
