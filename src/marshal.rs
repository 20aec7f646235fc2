//! Typed value marshalling between Rust and Lua.
//!
//! The boundary speaks a small closed set of native kinds, carried by the
//! tagged variant [`Value`]:
//!
//! | Rust     | [`ValueKind`] | Lua                  |
//! |----------|---------------|----------------------|
//! | `i32`    | `Int`         | integer              |
//! | `i64`    | `Long`        | integer              |
//! | `f32`    | `Float`       | number               |
//! | `f64`    | `Double`      | number               |
//! | `String` | `Str`         | string (UTF-8)       |
//!
//! Each native type has exactly one adapter ([`IntoValue`] / [`FromValue`]).
//! A type without an adapter cannot appear in an argument or return list, so
//! unsupported types are rejected by the compiler rather than at call time.
//!
//! Argument and return lists of any arity up to twelve are tuples of adapted
//! types ([`PushList`] / [`PullList`]); a bare value is a one-element list and
//! `()` is the empty list.
//!
//! # Stack discipline
//!
//! Calls stage their values on a [`ValueStack`]. Arguments are pushed left to
//! right. Pulling `M` results reads slot `k` from position `top - M + k`.
//! Callers record `depth()` before pushing and `truncate()` back to it when
//! they are done, so nothing below their baseline is ever touched.

use std::cell::RefCell;
use std::fmt;

use mlua::{Lua, MultiValue};

use crate::error::MarshalError;

/// 2^63 as a float; the exclusive upper bound of floats convertible to `i64`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Native kind of a marshalled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Signed 32-bit integer.
    Int,
    /// Signed 64-bit integer.
    Long,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// UTF-8 string.
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "i32",
            Self::Long => "i64",
            Self::Float => "f32",
            Self::Double => "f64",
            Self::Str => "string",
        };
        f.write_str(name)
    }
}

/// A native value crossing the Rust/Lua boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 32-bit integer.
    Int(i32),
    /// Signed 64-bit integer.
    Long(i64),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    Str(String),
}

impl Value {
    /// The native kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Long(_) => ValueKind::Long,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::Str(_) => ValueKind::Str,
        }
    }

    /// Convert into a Lua value owned by `lua`.
    pub fn into_lua_value(self, lua: &Lua) -> mlua::Result<mlua::Value> {
        Ok(match self {
            Self::Int(v) => mlua::Value::Integer(i64::from(v)),
            Self::Long(v) => mlua::Value::Integer(v),
            Self::Float(v) => mlua::Value::Number(f64::from(v)),
            Self::Double(v) => mlua::Value::Number(v),
            Self::Str(v) => mlua::Value::String(lua.create_string(&v)?),
        })
    }

    /// Convert a Lua value into a native value of the requested kind.
    ///
    /// `slot` is the position in the surrounding list and only feeds the
    /// error message. Integers convert to float kinds and floats with an
    /// exact integer value convert to integer kinds; strings and numbers
    /// never convert into each other.
    pub fn from_lua_value(
        value: &mlua::Value,
        kind: ValueKind,
        slot: usize,
    ) -> Result<Self, MarshalError> {
        match kind {
            ValueKind::Int => {
                let n = lua_integer(value, kind, slot)?;
                match i32::try_from(n) {
                    Ok(v) => Ok(Self::Int(v)),
                    Err(_) => Err(MarshalError::OutOfRange {
                        slot,
                        expected: kind,
                        value: n.to_string(),
                    }),
                }
            }
            ValueKind::Long => lua_integer(value, kind, slot).map(Self::Long),
            ValueKind::Float => {
                let n = lua_number(value, kind, slot)?;
                if n.is_finite() && n.abs() > f64::from(f32::MAX) {
                    return Err(MarshalError::OutOfRange {
                        slot,
                        expected: kind,
                        value: format!("{n:e}"),
                    });
                }
                #[allow(clippy::cast_possible_truncation, reason = "range checked above")]
                let narrowed = n as f32;
                Ok(Self::Float(narrowed))
            }
            ValueKind::Double => lua_number(value, kind, slot).map(Self::Double),
            ValueKind::Str => match value {
                mlua::Value::String(s) => String::from_utf8(s.as_bytes().to_vec())
                    .map(Self::Str)
                    .map_err(|_utf8| MarshalError::InvalidUtf8 { slot }),
                other => Err(mismatch(other, kind, slot)),
            },
        }
    }
}

fn mismatch(value: &mlua::Value, expected: ValueKind, slot: usize) -> MarshalError {
    MarshalError::TypeMismatch {
        slot,
        expected,
        found: value.type_name(),
    }
}

fn lua_integer(value: &mlua::Value, kind: ValueKind, slot: usize) -> Result<i64, MarshalError> {
    match *value {
        mlua::Value::Integer(i) => Ok(i),
        mlua::Value::Number(n) if n.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&n) => {
            Ok(n as i64)
        }
        mlua::Value::Number(n) => Err(MarshalError::OutOfRange {
            slot,
            expected: kind,
            value: format!("{n:e}"),
        }),
        ref other => Err(mismatch(other, kind, slot)),
    }
}

#[allow(clippy::cast_precision_loss, reason = "Lua integers read as floats follow Lua's own arithmetic")]
fn lua_number(value: &mlua::Value, kind: ValueKind, slot: usize) -> Result<f64, MarshalError> {
    match *value {
        mlua::Value::Integer(i) => Ok(i as f64),
        mlua::Value::Number(n) => Ok(n),
        ref other => Err(mismatch(other, kind, slot)),
    }
}

/// Adapter from a native type into a [`Value`].
pub trait IntoValue {
    /// Wrap `self` in the matching [`Value`] variant.
    fn into_value(self) -> Value;
}

/// Adapter from a [`Value`] back into a native type.
pub trait FromValue: Sized {
    /// The kind this type reads.
    const KIND: ValueKind;

    /// Unwrap the matching [`Value`] variant.
    fn from_value(value: Value) -> Option<Self>;

    /// Read a Lua value at `slot` through [`Value`].
    fn from_lua_value(value: &mlua::Value, slot: usize) -> Result<Self, MarshalError> {
        let converted = Value::from_lua_value(value, Self::KIND, slot)?;
        Self::from_value(converted).ok_or_else(|| mismatch(value, Self::KIND, slot))
    }
}

macro_rules! value_adapter {
    ($ty:ty, $variant:ident) => {
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$variant;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

value_adapter!(i32, Int);
value_adapter!(i64, Long);
value_adapter!(f32, Float);
value_adapter!(f64, Double);
value_adapter!(String, Str);

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_owned())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

/// An ordered list of values pushed into Lua (call arguments, native returns).
pub trait PushList {
    /// Number of values in the list.
    const COUNT: usize;

    /// Convert every element, left to right.
    fn into_lua_values(self, lua: &Lua) -> mlua::Result<Vec<mlua::Value>>;
}

/// An ordered list of values pulled out of Lua (call results, native arguments).
pub trait PullList: Sized {
    /// Number of values in the list.
    const COUNT: usize;

    /// Read slot `k` from `values[k]`; missing slots read as `nil`.
    fn from_lua_values(values: &[mlua::Value]) -> Result<Self, MarshalError>;
}

impl PushList for () {
    const COUNT: usize = 0;

    fn into_lua_values(self, _lua: &Lua) -> mlua::Result<Vec<mlua::Value>> {
        Ok(Vec::new())
    }
}

impl PullList for () {
    const COUNT: usize = 0;

    fn from_lua_values(_values: &[mlua::Value]) -> Result<Self, MarshalError> {
        Ok(())
    }
}

impl<T: IntoValue> PushList for T {
    const COUNT: usize = 1;

    fn into_lua_values(self, lua: &Lua) -> mlua::Result<Vec<mlua::Value>> {
        Ok(vec![self.into_value().into_lua_value(lua)?])
    }
}

impl<T: FromValue> PullList for T {
    const COUNT: usize = 1;

    fn from_lua_values(values: &[mlua::Value]) -> Result<Self, MarshalError> {
        T::from_lua_value(values.first().unwrap_or(&mlua::Value::Nil), 0)
    }
}

macro_rules! tuple_lists {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: IntoValue),+> PushList for ($($name,)+) {
            const COUNT: usize = [$($idx),+].len();

            fn into_lua_values(self, lua: &Lua) -> mlua::Result<Vec<mlua::Value>> {
                Ok(vec![$(self.$idx.into_value().into_lua_value(lua)?),+])
            }
        }

        impl<$($name: FromValue),+> PullList for ($($name,)+) {
            const COUNT: usize = [$($idx),+].len();

            fn from_lua_values(values: &[mlua::Value]) -> Result<Self, MarshalError> {
                Ok(($(
                    <$name as FromValue>::from_lua_value(
                        values.get($idx).unwrap_or(&mlua::Value::Nil),
                        $idx,
                    )?,
                )+))
            }
        }
    };
}

tuple_lists!(A 0);
tuple_lists!(A 0, B 1);
tuple_lists!(A 0, B 1, C 2);
tuple_lists!(A 0, B 1, C 2, D 3);
tuple_lists!(A 0, B 1, C 2, D 3, E 4);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10);
tuple_lists!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11);

/// Staging area for values moving in and out of protected calls.
///
/// Calls nest (a native function may call back into Lua), so every user
/// records a baseline with [`depth`](Self::depth) and restores it with
/// [`truncate`](Self::truncate). No borrow is held across a call into Lua.
#[derive(Debug, Default)]
pub struct ValueStack {
    slots: RefCell<Vec<mlua::Value>>,
}

impl ValueStack {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values currently on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Push a single Lua value.
    pub fn push(&self, value: mlua::Value) {
        self.slots.borrow_mut().push(value);
    }

    /// Push several Lua values in order.
    pub fn extend(&self, values: impl IntoIterator<Item = mlua::Value>) {
        self.slots.borrow_mut().extend(values);
    }

    /// Convert and push a native list left to right. Returns the number pushed.
    pub fn push_list<A: PushList>(&self, lua: &Lua, list: A) -> mlua::Result<usize> {
        let values = list.into_lua_values(lua)?;
        let count = values.len();
        self.extend(values);
        Ok(count)
    }

    /// Copy of every value at or above `base`, bottom first.
    #[must_use]
    pub fn frame(&self, base: usize) -> MultiValue {
        let slots = self.slots.borrow();
        let start = base.min(slots.len());
        slots[start..].iter().cloned().collect()
    }

    /// Pull the top `R::COUNT` values; slot `k` reads `top - COUNT + k`.
    pub fn pull<R: PullList>(&self) -> Result<R, MarshalError> {
        let slots = self.slots.borrow();
        let start = slots.len().saturating_sub(R::COUNT);
        R::from_lua_values(&slots[start..])
    }

    /// Drop every value above `base`.
    pub fn truncate(&self, base: usize) {
        self.slots.borrow_mut().truncate(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: IntoValue + FromValue>(lua: &Lua, value: T) -> T {
        let stack = ValueStack::new();
        stack.push_list(lua, value).expect("Should push value");
        let pulled = stack.pull::<T>().expect("Should pull value");
        stack.truncate(0);
        pulled
    }

    #[test]
    fn test_integer_roundtrip_is_exact() {
        let lua = Lua::new();
        assert_eq!(roundtrip(&lua, 42_i32), 42);
        assert_eq!(roundtrip(&lua, i32::MIN), i32::MIN);
        assert_eq!(roundtrip(&lua, i64::MAX), i64::MAX);
        assert_eq!(roundtrip(&lua, -7_i64), -7);
    }

    #[test]
    fn test_float_roundtrip_within_tolerance() {
        let lua = Lua::new();
        assert!((roundtrip(&lua, 1.25_f32) - 1.25).abs() < f32::EPSILON);
        assert!((roundtrip(&lua, std::f64::consts::PI) - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_string_roundtrip() {
        let lua = Lua::new();
        assert_eq!(roundtrip(&lua, "héllo".to_string()), "héllo");
    }

    #[test]
    fn test_push_order_is_left_to_right() {
        let lua = Lua::new();
        let stack = ValueStack::new();
        let pushed = stack
            .push_list(&lua, (1_i32, "two", 3.5_f64))
            .expect("Should push list");
        assert_eq!(pushed, 3);

        let frame: Vec<mlua::Value> = stack.frame(0).into_iter().collect();
        assert_eq!(frame[0], mlua::Value::Integer(1));
        assert!(matches!(&frame[1], mlua::Value::String(s) if s.as_bytes().to_vec() == b"two"));
        assert_eq!(frame[2], mlua::Value::Number(3.5));
    }

    #[test]
    fn test_pull_reads_from_top_minus_count() {
        let lua = Lua::new();
        let stack = ValueStack::new();
        stack.push_list(&lua, (100_i32, 1_i32, 2_i32, 3_i32)).expect("Should push");

        let (a, b): (i32, i32) = stack.pull().expect("Should pull two");
        assert_eq!((a, b), (2, 3));

        let (x, y, z): (i32, i32, i32) = stack.pull().expect("Should pull three");
        assert_eq!((x, y, z), (1, 2, 3));
        assert_eq!(stack.depth(), 4, "pulling must not pop");
    }

    #[test]
    fn test_truncate_restores_baseline() {
        let lua = Lua::new();
        let stack = ValueStack::new();
        stack.push_list(&lua, 1_i32).expect("Should push");
        let base = stack.depth();
        stack.push_list(&lua, (2_i32, 3_i32)).expect("Should push");
        assert_eq!(stack.frame(base).len(), 2);
        stack.truncate(base);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.pull::<i32>().expect("Should pull"), 1);
    }

    #[test]
    fn test_int_overflow_is_rejected() {
        let value = mlua::Value::Integer(i64::from(i32::MAX) + 1);
        let err = i32::from_lua_value(&value, 0).expect_err("Should not fit in i32");
        assert!(matches!(err, MarshalError::OutOfRange { expected: ValueKind::Int, .. }));
    }

    #[test]
    fn test_float_overflow_is_rejected() {
        let err = f32::from_lua_value(&mlua::Value::Number(1e300), 0)
            .expect_err("Should not fit in f32");
        assert!(matches!(err, MarshalError::OutOfRange { expected: ValueKind::Float, .. }));
        assert_eq!(err.to_string(), "slot 0: 1e300 does not fit in f32");

        let wide = f64::from_lua_value(&mlua::Value::Number(1e300), 0).expect("Should fit in f64");
        assert!((wide - 1e300).abs() < 1e285);
    }

    #[test]
    fn test_float_infinity_passes_through() {
        let value = f32::from_lua_value(&mlua::Value::Number(f64::INFINITY), 0)
            .expect("Should keep infinity");
        assert!(value.is_infinite());
    }

    #[test]
    fn test_fractional_integer_reports_compact_value() {
        let err = i64::from_lua_value(&mlua::Value::Number(1.5e300), 2)
            .expect_err("Should not fit in i64");
        assert_eq!(err.to_string(), "slot 2: 1.5e300 does not fit in i64");
    }

    #[test]
    fn test_integral_float_reads_as_integer() {
        assert_eq!(i32::from_lua_value(&mlua::Value::Number(7.0), 0), Ok(7));
        assert!(i64::from_lua_value(&mlua::Value::Number(7.5), 0).is_err());
    }

    #[test]
    fn test_integer_reads_as_float() {
        let pulled = f64::from_lua_value(&mlua::Value::Integer(3), 0).expect("Should read");
        assert!((pulled - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_coercion_between_strings_and_numbers() {
        let lua = Lua::new();
        let text = mlua::Value::String(lua.create_string("3").expect("Should create string"));
        let err = i32::from_lua_value(&text, 1).expect_err("String must not become a number");
        assert_eq!(
            err,
            MarshalError::TypeMismatch { slot: 1, expected: ValueKind::Int, found: "string" }
        );

        let err = String::from_lua_value(&mlua::Value::Integer(3), 0)
            .expect_err("Number must not become a string");
        assert!(matches!(err, MarshalError::TypeMismatch { expected: ValueKind::Str, .. }));
    }

    #[test]
    fn test_missing_slot_is_not_defaulted() {
        let err = <(i32, i32)>::from_lua_values(&[mlua::Value::Integer(1)])
            .expect_err("Missing value must fail");
        assert_eq!(
            err,
            MarshalError::TypeMismatch { slot: 1, expected: ValueKind::Int, found: "nil" }
        );
    }

    #[test]
    fn test_list_counts() {
        assert_eq!(<() as PullList>::COUNT, 0);
        assert_eq!(<i32 as PullList>::COUNT, 1);
        assert_eq!(<(i32, String, f64) as PullList>::COUNT, 3);
        assert_eq!(<(i32, i32, i32, i32, i32, i32, i32, i32, i32, i32, i32, i32) as PushList>::COUNT, 12);
    }

    #[test]
    fn test_value_kind_display() {
        assert_eq!(Value::Long(1).kind(), ValueKind::Long);
        assert_eq!(Value::Str(String::new()).kind().to_string(), "string");
        assert_eq!(ValueKind::Float.to_string(), "f32");
    }
}
