//! The embedding surface the VM dispatcher runs against (§4.F): stack
//! shape manipulation, typed push/to conversions, arithmetic/compare/
//! concat, table access, and the fetch/getRK/addPC execution support the
//! dispatcher uses to step one instruction at a time.

use crate::chunk::Prototype;
use crate::error::{LuaError, LuaResult};
use crate::opcode::Instruction;
use crate::stack::ValueStack;
use crate::table::Table;
use crate::value::{self, TableRef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

/// Knobs for a new `LuaState`, mirroring a `SafeOption`-style options
/// struct rather than a global.
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub stack_size: usize,
    pub extra_stack: usize,
}

impl VmOptions {
    pub fn for_prototype(proto: &Prototype) -> VmOptions {
        VmOptions {
            stack_size: proto.max_stack_size as usize,
            extra_stack: 16,
        }
    }
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            stack_size: 64,
            extra_stack: 16,
        }
    }
}

pub struct LuaState {
    stack: ValueStack,
    proto: Prototype,
    pc: i64,
}

impl LuaState {
    pub fn new(options: VmOptions, proto: Prototype) -> LuaState {
        let capacity = options.stack_size + options.extra_stack;
        let mut stack = ValueStack::new(capacity);
        stack.set_top(proto.max_stack_size as usize);
        LuaState { stack, proto, pc: 0 }
    }

    pub fn proto(&self) -> &Prototype {
        &self.proto
    }

    pub fn pc(&self) -> i64 {
        self.pc
    }

    // ---- index conventions ----

    /// `0` is never a valid index; positive indices are already absolute,
    /// negative indices are resolved relative to the current top.
    fn abs_index(&self, idx: i64) -> LuaResult<i64> {
        if idx == 0 {
            return Err(LuaError::InvalidIndex(idx));
        }
        if idx > 0 {
            Ok(idx)
        } else {
            Ok(idx + self.stack.top() as i64 + 1)
        }
    }

    /// Resolves an external index to the 0-based internal slot.
    fn internal_index(&self, idx: i64) -> LuaResult<usize> {
        let abs = self.abs_index(idx)?;
        if abs < 1 {
            return Err(LuaError::InvalidIndex(idx));
        }
        Ok((abs - 1) as usize)
    }

    // ---- stack shape ----

    pub fn get_top(&self) -> i64 {
        self.stack.top() as i64
    }

    /// Grows by nils or shrinks, per index conventions.
    pub fn set_top(&mut self, idx: i64) -> LuaResult<()> {
        let abs = self.abs_index(idx)?;
        if abs < 0 {
            return Err(LuaError::InvalidIndex(idx));
        }
        self.stack.set_top(abs as usize);
        Ok(())
    }

    /// Copies the value at `idx` onto the top of the stack.
    pub fn push_value(&mut self, idx: i64) -> LuaResult<()> {
        let i = self.internal_index(idx)?;
        let v = self.stack.get(i);
        self.stack.push(v)
    }

    /// Copies the value at `from` into the slot at `to`, without
    /// affecting `top`.
    pub fn copy(&mut self, from: i64, to: i64) -> LuaResult<()> {
        let f = self.internal_index(from)?;
        let t = self.internal_index(to)?;
        let v = self.stack.get(f);
        self.stack.set(t, v)
    }

    /// Pops the top value and stores it at `idx`.
    pub fn replace(&mut self, idx: i64) -> LuaResult<()> {
        let v = self.stack.pop()?;
        let i = self.internal_index(idx)?;
        self.stack.set(i, v)
    }

    /// Three-reversal rotation of the stack segment from `idx` to the
    /// top, by `n` slots (negative `n` rotates the other way).
    pub fn rotate(&mut self, idx: i64, n: i64) -> LuaResult<()> {
        let p = self.internal_index(idx)? as i64;
        let top = self.stack.top();
        if top == 0 {
            return Err(LuaError::InvalidIndex(idx));
        }
        let t = top as i64 - 1;
        let m = if n >= 0 { t - n } else { p - n - 1 };
        if m < p - 1 || m > t {
            return Err(LuaError::InvalidIndex(idx));
        }
        self.stack.reverse(p as usize, m as usize);
        self.stack.reverse((m + 1) as usize, t as usize);
        self.stack.reverse(p as usize, t as usize);
        Ok(())
    }

    pub fn insert(&mut self, idx: i64) -> LuaResult<()> {
        self.rotate(idx, 1)
    }

    pub fn remove(&mut self, idx: i64) -> LuaResult<()> {
        self.rotate(idx, -1)?;
        self.stack.pop()?;
        Ok(())
    }

    // ---- typed pushers ----

    pub fn push_nil(&mut self) -> LuaResult<()> {
        self.stack.push(Value::Nil)
    }

    pub fn push_boolean(&mut self, b: bool) -> LuaResult<()> {
        self.stack.push(Value::Boolean(b))
    }

    pub fn push_integer(&mut self, i: i64) -> LuaResult<()> {
        self.stack.push(Value::Integer(i))
    }

    pub fn push_number(&mut self, f: f64) -> LuaResult<()> {
        self.stack.push(Value::Float(f))
    }

    pub fn push_string(&mut self, s: impl Into<Vec<u8>>) -> LuaResult<()> {
        self.stack.push(Value::str(s))
    }

    pub fn push(&mut self, v: Value) -> LuaResult<()> {
        self.stack.push(v)
    }

    pub fn pop(&mut self) -> LuaResult<Value> {
        self.stack.pop()
    }

    pub fn get(&self, idx: i64) -> LuaResult<Value> {
        let i = self.internal_index(idx)?;
        Ok(self.stack.get(i))
    }

    pub fn set(&mut self, idx: i64, v: Value) -> LuaResult<()> {
        let i = self.internal_index(idx)?;
        self.stack.set(i, v)
    }

    // ---- typed readers: lossy + checked ----

    pub fn to_boolean(&self, idx: i64) -> bool {
        self.get(idx).map(|v| v.to_boolean()).unwrap_or(false)
    }

    /// Lossy: `0` if the value at `idx` doesn't convert.
    pub fn to_integer(&self, idx: i64) -> i64 {
        self.to_integer_x(idx).unwrap_or(0)
    }

    /// Checked: `None` if the value at `idx` doesn't convert.
    pub fn to_integer_x(&self, idx: i64) -> Option<i64> {
        self.get(idx).ok()?.to_integer()
    }

    pub fn to_number(&self, idx: i64) -> f64 {
        self.to_number_x(idx).unwrap_or(0.0)
    }

    pub fn to_number_x(&self, idx: i64) -> Option<f64> {
        self.get(idx).ok()?.to_float()
    }

    /// Renders the value's default decimal form; the returned buffer is
    /// freshly allocated, not a borrow into the value.
    pub fn to_string_x(&self, idx: i64) -> Option<Vec<u8>> {
        self.get(idx).ok()?.to_display_string()
    }

    pub fn to_string(&self, idx: i64) -> Vec<u8> {
        self.to_string_x(idx).unwrap_or_default()
    }

    // ---- arithmetic ----

    pub fn arith(&mut self, op: ArithOp) -> LuaResult<()> {
        if op.is_unary() {
            let a = self.stack.pop()?;
            let result = arith_unary(op, &a)?;
            self.stack.push(result)
        } else {
            let b = self.stack.pop()?;
            let a = self.stack.pop()?;
            let result = arith_binary(op, &a, &b)?;
            self.stack.push(result)
        }
    }

    // ---- comparison (pure) ----

    pub fn compare(&self, idx1: i64, idx2: i64, op: CompareOp) -> LuaResult<bool> {
        let a = self.get(idx1)?;
        let b = self.get(idx2)?;
        Ok(match op {
            CompareOp::Eq => a.lua_eq(&b),
            CompareOp::Lt => a.lua_lt(&b),
            CompareOp::Le => a.lua_le(&b),
        })
    }

    // ---- length & concat ----

    pub fn len(&self, idx: i64) -> LuaResult<i64> {
        match self.get(idx)? {
            Value::Str(s) => Ok(s.len() as i64),
            Value::Table(t) => Ok(t.borrow().len()),
            _ => Err(LuaError::LengthError),
        }
    }

    /// Concatenates the top `n` stack items, left-to-right, replacing
    /// them with a single string result.
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        if n == 0 {
            return self.stack.push(Value::str(Vec::new()));
        }
        let mut remaining = n;
        while remaining > 1 {
            let b = self.stack.pop()?;
            let a = self.stack.pop()?;
            let mut buf = a.to_display_string().ok_or(LuaError::ArithmeticError)?;
            let b_str = b.to_display_string().ok_or(LuaError::ArithmeticError)?;
            buf.extend_from_slice(&b_str);
            self.stack.push(Value::str(buf))?;
            remaining -= 1;
        }
        Ok(())
    }

    /// Concatenates a register range left-to-right into a single string,
    /// reading each register in place rather than re-pushing it onto the
    /// stack first. Used by the `CONCAT` opcode, whose `R(B)..R(C)` span
    /// can exceed any fixed scratch headroom above `maxStackSize`.
    pub fn concat_registers(&mut self, first: u32, last: u32) -> LuaResult<Value> {
        let mut buf = self.get_reg(first).to_display_string().ok_or(LuaError::ArithmeticError)?;
        for r in (first + 1)..=last {
            let s = self.get_reg(r).to_display_string().ok_or(LuaError::ArithmeticError)?;
            buf.extend_from_slice(&s);
        }
        Ok(Value::str(buf))
    }

    // ---- table API ----

    pub fn create_table(&mut self, narr: usize, nrec: usize) -> LuaResult<()> {
        self.stack.push(Value::Table(Table::new_ref(narr, nrec)))
    }

    pub fn new_table(&mut self) -> LuaResult<()> {
        self.create_table(0, 0)
    }

    fn table_at(&self, idx: i64) -> LuaResult<TableRef> {
        match self.get(idx)? {
            Value::Table(t) => Ok(t),
            _ => Err(LuaError::NotATable),
        }
    }

    /// Pops a key and pushes `t[k]`.
    pub fn get_table(&mut self, idx: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let k = self.stack.pop()?;
        let v = t.borrow().get(&k);
        self.stack.push(v)
    }

    pub fn get_field(&mut self, idx: i64, name: &[u8]) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = t.borrow().get(&Value::str(name.to_vec()));
        self.stack.push(v)
    }

    pub fn get_i(&mut self, idx: i64, i: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = t.borrow().get(&Value::Integer(i));
        self.stack.push(v)
    }

    /// Pops a value then a key, and sets `t[k] = v`.
    pub fn set_table(&mut self, idx: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = self.stack.pop()?;
        let k = self.stack.pop()?;
        t.borrow_mut().put(k, v)
    }

    pub fn set_field(&mut self, idx: i64, name: &[u8]) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = self.stack.pop()?;
        t.borrow_mut().put(Value::str(name.to_vec()), v)
    }

    pub fn set_i(&mut self, idx: i64, i: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = self.stack.pop()?;
        t.borrow_mut().put(Value::Integer(i), v)
    }

    // ---- registers (R(i) = stack slot i+1, 1-based; internally the
    // ISA's 0-based register number is exactly the 0-based internal slot) ----

    pub fn get_reg(&self, reg: u32) -> Value {
        self.stack.get(reg as usize)
    }

    pub fn set_reg(&mut self, reg: u32, v: Value) -> LuaResult<()> {
        self.stack.set(reg as usize, v)
    }

    pub fn check_stack(&mut self, n: usize) {
        self.stack.check(n)
    }

    // ---- execution support ----

    pub fn fetch(&mut self) -> LuaResult<Instruction> {
        let code = &self.proto.code;
        let pc = self.pc;
        if pc < 0 || pc as usize >= code.len() {
            return Err(LuaError::Corrupted("pc out of range"));
        }
        self.pc += 1;
        Ok(Instruction(code[pc as usize]))
    }

    pub fn get_const(&mut self, i: u32) -> LuaResult<()> {
        let v = self
            .proto
            .constants
            .get(i as usize)
            .cloned()
            .ok_or(LuaError::Corrupted("constant index out of range"))?;
        self.stack.push(v)
    }

    /// Pushes `K[rk & 0xFF]` if `rk` carries the constant flag, otherwise
    /// pushes register `rk` (ISA 0-based register -> stack via `get_reg`,
    /// which is already the 0-based internal slot).
    pub fn get_rk(&mut self, rk: u32) -> LuaResult<()> {
        if crate::opcode::is_const(rk) {
            self.get_const(crate::opcode::rk_index(rk))
        } else {
            let v = self.get_reg(rk);
            self.stack.push(v)
        }
    }

    pub fn add_pc(&mut self, delta: i64) {
        self.pc += delta;
    }
}

fn as_int_pair(a: &Value, b: &Value) -> Option<(i64, i64)> {
    Some((a.to_integer()?, b.to_integer()?))
}

fn as_float_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((a.to_float()?, b.to_float()?))
}

fn arith_binary(op: ArithOp, a: &Value, b: &Value) -> LuaResult<Value> {
    use ArithOp::*;
    match op {
        Add | Sub | Mul | Mod | IDiv => {
            if let Some((x, y)) = as_int_pair(a, b) {
                return Ok(Value::Integer(match op {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    Mul => x.wrapping_mul(y),
                    Mod => {
                        if y == 0 {
                            return Err(LuaError::ArithmeticError);
                        }
                        value::int_mod(x, y)
                    }
                    IDiv => {
                        if y == 0 {
                            return Err(LuaError::ArithmeticError);
                        }
                        value::int_floor_div(x, y)
                    }
                    _ => unreachable!(),
                }));
            }
            if let Some((x, y)) = as_float_pair(a, b) {
                return Ok(Value::Float(match op {
                    Add => x + y,
                    Sub => x - y,
                    Mul => x * y,
                    Mod => value::float_mod(x, y),
                    IDiv => value::float_floor_div(x, y),
                    _ => unreachable!(),
                }));
            }
            Err(LuaError::ArithmeticError)
        }
        Pow | Div => {
            let (x, y) = as_float_pair(a, b).ok_or(LuaError::ArithmeticError)?;
            Ok(Value::Float(match op {
                Pow => x.powf(y),
                Div => x / y,
                _ => unreachable!(),
            }))
        }
        BAnd | BOr | BXor | Shl | Shr => {
            let (x, y) = as_int_pair(a, b).ok_or(LuaError::ArithmeticError)?;
            Ok(Value::Integer(match op {
                BAnd => x & y,
                BOr => x | y,
                BXor => x ^ y,
                Shl => value::shift_left(x, y),
                Shr => value::shift_right(x, y),
                _ => unreachable!(),
            }))
        }
        Unm | BNot => unreachable!("unary ops dispatch through arith_unary"),
    }
}

fn arith_unary(op: ArithOp, a: &Value) -> LuaResult<Value> {
    match op {
        ArithOp::Unm => {
            if let Some(i) = a.to_integer() {
                Ok(Value::Integer(i.wrapping_neg()))
            } else if let Some(f) = a.to_float() {
                Ok(Value::Float(-f))
            } else {
                Err(LuaError::ArithmeticError)
            }
        }
        ArithOp::BNot => {
            let i = a.to_integer().ok_or(LuaError::ArithmeticError)?;
            Ok(Value::Integer(!i))
        }
        _ => unreachable!("binary ops dispatch through arith_binary"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_stack(cap: usize) -> LuaState {
        LuaState {
            stack: ValueStack::new(cap),
            proto: Prototype {
                source: Vec::new(),
                line_defined: 0,
                last_line_defined: 0,
                num_params: 0,
                is_vararg: 0,
                max_stack_size: 0,
                code: Vec::new(),
                constants: Vec::new(),
                upvalues: Vec::new(),
                protos: Vec::new(),
                line_info: Vec::new(),
                loc_vars: Vec::new(),
                upvalue_names: Vec::new(),
            },
            pc: 0,
        }
    }

    #[test]
    fn arithmetic_coercion_prefers_integer_then_falls_back_to_float() {
        let mut s = state_with_stack(8);
        s.push_integer(1).unwrap();
        s.push_string("2.0").unwrap();
        s.arith(ArithOp::Add).unwrap();
        // "2.0" only converts via the float path, so the whole op promotes to float.
        assert!(matches!(s.get(-1).unwrap(), Value::Float(f) if f == 3.0));
    }

    #[test]
    fn concat_of_three_values_yields_one_string() {
        let mut s = state_with_stack(8);
        s.push_string("a").unwrap();
        s.push_string("b").unwrap();
        s.push_string("c").unwrap();
        s.concat(3).unwrap();
        assert_eq!(s.get_top(), 1);
        assert_eq!(s.to_string(-1), b"abc");
    }

    #[test]
    fn concat_zero_pushes_empty_string() {
        let mut s = state_with_stack(8);
        s.concat(0).unwrap();
        assert_eq!(s.to_string(-1), b"");
    }

    #[test]
    fn set_top_then_get_top_is_a_no_op() {
        let mut s = state_with_stack(8);
        s.push_integer(1).unwrap();
        s.push_integer(2).unwrap();
        let top = s.get_top();
        s.set_top(top).unwrap();
        assert_eq!(s.get_top(), top);
    }

    #[test]
    fn rotate_then_inverse_rotate_is_identity() {
        let mut s = state_with_stack(8);
        for i in 1..=4 {
            s.push_integer(i).unwrap();
        }
        s.rotate(1, 2).unwrap();
        s.rotate(1, -2).unwrap();
        for i in 1..=4 {
            assert!(matches!(s.get(i).unwrap(), Value::Integer(v) if v == i));
        }
    }

    #[test]
    fn table_set_then_get_round_trips() {
        let mut s = state_with_stack(8);
        s.new_table().unwrap();
        s.push_integer(10).unwrap(); // key
        s.push_string("hello").unwrap(); // value
        s.set_table(1).unwrap();
        s.push_integer(10).unwrap();
        s.get_table(1).unwrap();
        assert_eq!(s.to_string(-1), b"hello");
    }
}
