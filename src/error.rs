//! Error types for the bridge.
//!
//! Every failure that originates on the script side (a missing function,
//! a syntax error, a runtime error, a value that does not fit its declared
//! native type) is converted into a [`BridgeError`] at the protected-call
//! boundary. The runtime forwards the error's `Display` text to the
//! configured error sink exactly once and hands the error back to the
//! caller, who decides whether it is fatal.

use std::fmt;

use crate::marshal::ValueKind;

/// Failure of a bridge operation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The script file could not be stat'ed or read.
    #[error("cannot read script '{path}': {source}")]
    Io {
        /// Path as given by the caller.
        path: String,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The call target is missing or is not a function.
    #[error("{target} not found or not callable")]
    Resolution {
        /// Human-readable description of what was looked up.
        target: String,
    },

    /// The source could not be compiled.
    #[error("compile error in {chunk}: {message}")]
    Compile {
        /// Chunk name (the sentinel-prefixed path).
        chunk: String,
        /// Message produced by the Lua compiler.
        message: String,
    },

    /// The script raised an error while running.
    #[error("runtime error in {context}: {traceback}")]
    Runtime {
        /// What was being executed (chunk or function name).
        context: String,
        /// Error message with the Lua stack traceback appended.
        traceback: String,
    },

    /// A value could not be converted to or from its declared native type.
    #[error("marshal error in {context}: {source}")]
    Marshal {
        /// What was being called when the conversion failed.
        context: String,
        /// The conversion failure.
        #[source]
        source: MarshalError,
    },

    /// The Lua engine failed outside of script code (allocation, registry access).
    #[error("lua engine error: {0}")]
    Lua(#[from] mlua::Error),
}

impl BridgeError {
    pub(crate) fn resolution(target: impl fmt::Display) -> Self {
        Self::Resolution {
            target: target.to_string(),
        }
    }

    /// Returns `true` if the call target could not be found.
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }
}

/// Failure converting a single Lua value to a native value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    /// The Lua value has the wrong type for the declared native kind.
    #[error("slot {slot}: expected {expected}, got {found}")]
    TypeMismatch {
        /// Zero-based position in the argument or return list.
        slot: usize,
        /// Declared native kind.
        expected: ValueKind,
        /// Lua type name of the value found.
        found: &'static str,
    },

    /// A number does not fit in the declared native kind.
    #[error("slot {slot}: {value} does not fit in {expected}")]
    OutOfRange {
        /// Zero-based position in the argument or return list.
        slot: usize,
        /// Declared native kind.
        expected: ValueKind,
        /// Textual form of the offending number.
        value: String,
    },

    /// A Lua string is not valid UTF-8.
    #[error("slot {slot}: string is not valid UTF-8")]
    InvalidUtf8 {
        /// Zero-based position in the argument or return list.
        slot: usize,
    },
}
