//! Tagged Lua value, its coercions, equality, ordering and the numeric
//! operators Lua 5.3 defines on top of them (floor division, modulo,
//! logical shifts).

use std::cell::RefCell;
use std::rc::Rc;

use crate::table::Table;

/// An immutable byte-string. Not `Rc<str>`: Lua strings are arbitrary
/// byte sequences, not guaranteed UTF-8, and table-key/concat equality is
/// bytewise, not Unicode-aware.
pub type LuaStr = Rc<[u8]>;

/// Owning handle to a table. Cloning shares identity: two `TableRef`s
/// produced from the same `NEWTABLE` mutate the same underlying table and
/// compare equal, matching the "tables compare by identity" rule.
pub type TableRef = Rc<RefCell<Table>>;

#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(LuaStr),
    Table(TableRef),
}

impl Value {
    pub fn str(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Str(Rc::from(bytes.into().into_boxed_slice()))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
        }
    }

    /// `toBoolean`: nil -> false, boolean -> itself, everything else -> true.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Boolean(b) => *b,
            _ => true,
        }
    }

    /// `toFloat`: float verbatim, integer cast, string parsed as a base-10
    /// float; anything else fails.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Str(s) => parse_number_bytes(s).map(|v| v.as_float()),
            _ => None,
        }
    }

    /// `toInteger`: integer verbatim; float must be exactly representable
    /// (round-trips through `i64 -> f64`); string parsed as an integer
    /// first, falling back to the float-then-exact-round-trip rule.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => float_to_exact_integer(*f),
            Value::Str(s) => {
                let text = std::str::from_utf8(s).ok()?.trim();
                if let Ok(i) = text.parse::<i64>() {
                    return Some(i);
                }
                let f: f64 = text.parse().ok()?;
                float_to_exact_integer(f)
            }
            _ => None,
        }
    }

    /// Normalizes a float that represents an exact integer to `Value::Integer`.
    /// Used for table keys only: `t[1.0]` and `t[1]` must hit the same slot.
    pub fn normalize_key(self) -> Value {
        if let Value::Float(f) = self {
            if let Some(i) = float_to_exact_integer(f) {
                return Value::Integer(i);
            }
        }
        self
    }

    pub fn lua_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `lt`/`le` per §4.C: defined only on numeric and string pairs,
    /// lexicographic for strings, false (no ordering) for anything else.
    pub fn lua_lt(&self, other: &Value) -> bool {
        match numeric_pair(self, other) {
            Some((NumPair::Int(a), NumPair::Int(b))) => a < b,
            Some((a, b)) => a.as_float() < b.as_float(),
            None => match (self, other) {
                (Value::Str(a), Value::Str(b)) => a.as_ref() < b.as_ref(),
                _ => false,
            },
        }
    }

    pub fn lua_le(&self, other: &Value) -> bool {
        match numeric_pair(self, other) {
            Some((NumPair::Int(a), NumPair::Int(b))) => a <= b,
            Some((a, b)) => a.as_float() <= b.as_float(),
            None => match (self, other) {
                (Value::Str(a), Value::Str(b)) => a.as_ref() <= b.as_ref(),
                _ => false,
            },
        }
    }

    /// Renders a number the way `toString` does (decimal, default
    /// formatting); used by `concat` to coerce numeric operands.
    pub fn to_display_string(&self) -> Option<Vec<u8>> {
        match self {
            Value::Str(s) => Some(s.to_vec()),
            Value::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                Some(buf.format(*i).as_bytes().to_vec())
            }
            Value::Float(f) => Some(format_lua_float(*f).into_bytes()),
            _ => None,
        }
    }
}

/// Lua's default float formatting (`%.14g`-ish): integral floats keep a
/// trailing `.0` so `1.0` never prints identically to the integer `1`.
pub fn format_lua_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let s = format!("{:.14e}", f);
    // Prefer the shortest round-tripping plain-decimal form Lua would print.
    let plain = format!("{}", f);
    if plain.parse::<f64>() == Ok(f) {
        if plain.contains('.') || plain.contains('e') || plain.contains("inf") || plain.contains("nan") {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        s
    }
}

enum NumPair {
    Int(i64),
    Flt(f64),
}

impl NumPair {
    fn as_float(&self) -> f64 {
        match self {
            NumPair::Int(i) => *i as f64,
            NumPair::Flt(f) => *f,
        }
    }
}

fn numeric_pair(a: &Value, b: &Value) -> Option<(NumPair, NumPair)> {
    let a = match a {
        Value::Integer(i) => NumPair::Int(*i),
        Value::Float(f) => NumPair::Flt(*f),
        _ => return None,
    };
    let b = match b {
        Value::Integer(i) => NumPair::Int(*i),
        Value::Float(f) => NumPair::Flt(*f),
        _ => return None,
    };
    Some((a, b))
}

fn float_to_exact_integer(f: f64) -> Option<i64> {
    if !f.is_finite() {
        return None;
    }
    let i = f as i64;
    if i as f64 == f {
        Some(i)
    } else {
        None
    }
}

fn parse_number_bytes(bytes: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    text.parse::<f64>().ok().map(Value::Float)
}

// ---- arithmetic helpers (§4.C) ----

/// `⌊a/b⌋` for integers: Euclidean floor toward negative infinity, not
/// Rust's truncating `/`.
pub fn int_floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if (r != 0) && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// `a - ⌊a/b⌋ * b`: result takes the sign of the divisor.
pub fn int_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

pub fn float_floor_div(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

pub fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Left shift by a negative `n` degrades to a right shift by `-n` and
/// vice versa; right shift is logical (zero-filled), not arithmetic.
pub fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> -n) as i64
    }
}

pub fn shift_right(a: i64, n: i64) -> i64 {
    shift_left(a, -n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_div_and_mod_agree_with_identity() {
        for a in [-7i64, -1, 0, 1, 7, 100] {
            for b in [-3i64, -1, 2, 5] {
                let q = int_floor_div(a, b);
                let r = int_mod(a, b);
                assert_eq!(q.wrapping_mul(b).wrapping_add(r), a);
                if r != 0 {
                    assert_eq!(r.signum(), b.signum());
                }
            }
        }
    }

    #[test]
    fn shift_is_logical_and_symmetric() {
        let a: i64 = -1; // all bits set
        for n in 0..64 {
            assert_eq!(shift_left(a, n), shift_right(a, -n));
        }
        assert!(shift_right(a, 63) == 0 || shift_right(a, 63) == 1);
        assert_eq!(shift_right(a, 63), 1);
    }

    #[test]
    fn exact_integer_round_trip_normalizes_float_keys() {
        assert_eq!(Value::Float(1.0).normalize_key().to_integer(), Some(1));
        match Value::Float(1.5).normalize_key() {
            Value::Float(f) => assert_eq!(f, 1.5),
            _ => panic!("1.5 must not normalize to an integer"),
        }
    }

    #[test]
    fn integer_and_float_compare_numerically() {
        assert!(Value::Integer(1).lua_eq(&Value::Float(1.0)));
        assert!(Value::Integer(1).lua_lt(&Value::Float(1.5)));
    }
}
