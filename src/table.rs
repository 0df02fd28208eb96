//! Hybrid array+hash associative container (§3, §4.D).
//!
//! Integer keys in `[1, arr.len()]` live in the dense `arr`; everything
//! else lives in `map`. The one piece of bookkeeping that makes `#t`
//! cheap is the migration rule: appending key `arr.len()+1` must drain
//! any contiguous successors already sitting in `map`.

use ahash::AHashMap;
use std::rc::Rc;

use crate::error::{LuaError, LuaResult};
use crate::value::{TableRef, Value};

/// Hashable, NaN-free projection of a `Value`, used as the `map` key.
/// Constructed only after `put`/`get` have already rejected nil and NaN
/// and normalized float keys that are exact integers.
#[derive(Clone, PartialEq, Eq, Hash)]
enum Key {
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Str(Box<[u8]>),
    Table(usize),
}

impl Key {
    fn from_value(v: &Value) -> Option<Key> {
        match v {
            Value::Nil => None,
            Value::Boolean(b) => Some(Key::Bool(*b)),
            Value::Integer(i) => Some(Key::Int(*i)),
            Value::Float(f) => {
                debug_assert!(!f.is_nan());
                let bits = if *f == 0.0 { 0.0f64.to_bits() } else { f.to_bits() };
                Some(Key::FloatBits(bits))
            }
            Value::Str(s) => Some(Key::Str(Box::from(s.as_ref()))),
            Value::Table(t) => Some(Key::Table(Rc::as_ptr(t) as usize)),
        }
    }
}

pub struct Table {
    arr: Vec<Value>,
    map: AHashMap<Key, Value>,
}

impl Table {
    /// `nArr`/`nRec` are reservation hints only.
    pub fn new(narr: usize, nrec: usize) -> Table {
        Table {
            arr: Vec::with_capacity(narr),
            map: AHashMap::with_capacity(nrec),
        }
    }

    pub fn new_ref(narr: usize, nrec: usize) -> TableRef {
        Rc::new(std::cell::RefCell::new(Table::new(narr, nrec)))
    }

    /// `#t`: the length of the dense array part.
    pub fn len(&self) -> i64 {
        self.arr.len() as i64
    }

    pub fn get(&self, key: &Value) -> Value {
        let key = key.clone().normalize_key();
        if let Value::Integer(i) = key {
            if i >= 1 && (i as usize) <= self.arr.len() {
                return self.arr[(i - 1) as usize].clone();
            }
        }
        match Key::from_value(&key) {
            Some(k) => self.map.get(&k).cloned().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn put(&mut self, key: Value, value: Value) -> LuaResult<()> {
        let key = key.normalize_key();
        if key.is_nil() {
            return Err(LuaError::TableIndexIsNil);
        }
        if let Value::Float(f) = &key {
            if f.is_nan() {
                return Err(LuaError::TableIndexIsNan);
            }
        }

        if let Value::Integer(i) = key {
            if i >= 1 && (i as usize) <= self.arr.len() {
                let idx = (i - 1) as usize;
                if value.is_nil() && idx == self.arr.len() - 1 {
                    self.arr.pop();
                    self.shrink_trailing_nils();
                } else {
                    self.arr[idx] = value;
                }
                return Ok(());
            }
            if i as usize == self.arr.len() + 1 && !value.is_nil() {
                self.arr.push(value);
                self.migrate_successors_from_map();
                return Ok(());
            }
        }

        let k = Key::from_value(&key).expect("nil/NaN already rejected above");
        if value.is_nil() {
            self.map.remove(&k);
        } else {
            self.map.insert(k, value);
        }
        Ok(())
    }

    /// Drains `arr.len()+1, arr.len()+2, ...` out of `map` into `arr` as
    /// long as they're contiguous, non-nil entries. Mandatory for `#t` to
    /// stay well-defined after out-of-order sequential inserts.
    fn migrate_successors_from_map(&mut self) {
        loop {
            let next = self.arr.len() as i64 + 1;
            let k = Key::Int(next);
            match self.map.remove(&k) {
                Some(v) => self.arr.push(v),
                None => break,
            }
        }
    }

    fn shrink_trailing_nils(&mut self) {
        while matches!(self.arr.last(), Some(Value::Nil)) {
            self.arr.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut t = Table::new(0, 0);
        t.put(Value::Integer(1), Value::Integer(10)).unwrap();
        assert!(matches!(t.get(&Value::Integer(1)), Value::Integer(10)));
        // float key 1.0 normalizes to the same slot as integer 1
        assert!(matches!(t.get(&Value::Float(1.0)), Value::Integer(10)));
    }

    #[test]
    fn nil_key_is_rejected() {
        let mut t = Table::new(0, 0);
        assert_eq!(t.put(Value::Nil, Value::Integer(1)), Err(LuaError::TableIndexIsNil));
    }

    #[test]
    fn nan_key_is_rejected() {
        let mut t = Table::new(0, 0);
        assert_eq!(
            t.put(Value::Float(f64::NAN), Value::Integer(1)),
            Err(LuaError::TableIndexIsNan)
        );
    }

    #[test]
    fn append_migrates_contiguous_successors_from_map() {
        let mut t = Table::new(0, 0);
        t.put(Value::Integer(2), Value::Integer(20)).unwrap();
        t.put(Value::Integer(3), Value::Integer(30)).unwrap();
        assert_eq!(t.len(), 0);
        t.put(Value::Integer(1), Value::Integer(10)).unwrap();
        assert_eq!(t.len(), 3);
        assert!(matches!(t.get(&Value::Integer(3)), Value::Integer(30)));
    }

    #[test]
    fn writing_nil_to_last_slot_shrinks_array() {
        let mut t = Table::new(0, 0);
        t.put(Value::Integer(1), Value::Integer(1)).unwrap();
        t.put(Value::Integer(2), Value::Integer(2)).unwrap();
        t.put(Value::Integer(2), Value::Nil).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn setlist_scenario_builds_a_dense_array() {
        let mut t = Table::new(3, 0);
        t.put(Value::Integer(1), Value::Integer(10)).unwrap();
        t.put(Value::Integer(2), Value::Integer(20)).unwrap();
        t.put(Value::Integer(3), Value::Integer(30)).unwrap();
        assert_eq!(t.len(), 3);
    }
}
