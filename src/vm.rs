//! The main dispatch loop (§4.I): fetch, decode, act. One opcode action
//! per match arm rather than a function-pointer table - simpler to read
//! and the compiler gets a dense jump table for free from the `match`.

use crate::error::{LuaError, LuaResult};
use crate::opcode::{Instruction, OpCode};
use crate::state::{ArithOp, LuaState, VmOptions};
use crate::value::Value;

pub struct Vm {
    pub state: LuaState,
}

impl Vm {
    pub fn new(options: VmOptions, proto: crate::chunk::Prototype) -> Vm {
        Vm {
            state: LuaState::new(options, proto),
        }
    }

    /// Runs until `RETURN` or an error.
    pub fn run(&mut self) -> LuaResult<()> {
        loop {
            if !self.step()? {
                return Ok(());
            }
        }
    }

    /// Executes exactly one instruction. Returns `Ok(false)` on
    /// `RETURN`, `Ok(true)` otherwise.
    pub fn step(&mut self) -> LuaResult<bool> {
        let instr = self.state.fetch()?;
        let op = match instr.op() {
            Some(op) => op,
            None => {
                log::warn!("vm error: unknown opcode byte {}", instr.raw_op());
                return Err(LuaError::UnknownInstruction(instr.raw_op()));
            }
        };
        log::trace!("pc={} op={}", self.state.pc() - 1, op.name());
        let result = self.dispatch(op, instr);
        if let Err(ref e) = result {
            log::warn!("vm error at op {}: {e}", op.name());
        }
        result
    }

    fn dispatch(&mut self, op: OpCode, i: Instruction) -> LuaResult<bool> {
        let s = &mut self.state;
        match op {
            OpCode::Move => {
                let v = s.get_reg(i.b());
                s.set_reg(i.a(), v)?;
            }
            OpCode::LoadK => {
                s.get_const(i.bx())?;
                let v = s.pop()?;
                s.set_reg(i.a(), v)?;
            }
            OpCode::LoadKX => {
                let extra = s.fetch()?;
                debug_assert_eq!(extra.op(), Some(OpCode::ExtraArg));
                s.get_const(extra.ax())?;
                let v = s.pop()?;
                s.set_reg(i.a(), v)?;
            }
            OpCode::LoadBool => {
                s.set_reg(i.a(), Value::Boolean(i.b() != 0))?;
                if i.c() != 0 {
                    s.add_pc(1);
                }
            }
            OpCode::LoadNil => {
                for r in i.a()..=i.a() + i.b() {
                    s.set_reg(r, Value::Nil)?;
                }
            }
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => {
                s.get_rk(i.b())?;
                s.get_rk(i.c())?;
                s.arith(arith_op_for(op))?;
                let v = s.pop()?;
                s.set_reg(i.a(), v)?;
            }
            OpCode::Unm | OpCode::BNot => {
                let v = s.get_reg(i.b());
                s.push(v)?;
                s.arith(arith_op_for(op))?;
                let result = s.pop()?;
                s.set_reg(i.a(), result)?;
            }
            OpCode::Not => {
                let v = s.get_reg(i.b());
                s.set_reg(i.a(), Value::Boolean(!v.to_boolean()))?;
            }
            OpCode::Len => {
                let v = s.get_reg(i.b());
                let len = match v {
                    Value::Str(str_bytes) => str_bytes.len() as i64,
                    Value::Table(t) => t.borrow().len(),
                    _ => return Err(LuaError::LengthError),
                };
                s.set_reg(i.a(), Value::Integer(len))?;
            }
            OpCode::Concat => {
                let (b, c) = (i.b(), i.c());
                let result = s.concat_registers(b, c)?;
                s.set_reg(i.a(), result)?;
            }
            OpCode::Jmp => {
                if i.a() != 0 {
                    return Err(LuaError::UnsupportedJmpClose);
                }
                s.add_pc(i.sbx() as i64);
            }
            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                s.get_rk(i.b())?;
                s.get_rk(i.c())?;
                let c_val = s.pop()?;
                let b_val = s.pop()?;
                let result = match op {
                    OpCode::Eq => b_val.lua_eq(&c_val),
                    OpCode::Lt => b_val.lua_lt(&c_val),
                    OpCode::Le => b_val.lua_le(&c_val),
                    _ => unreachable!(),
                };
                if result != (i.a() != 0) {
                    s.add_pc(1);
                }
            }
            OpCode::Test => {
                let v = s.get_reg(i.a());
                if v.to_boolean() != (i.c() != 0) {
                    s.add_pc(1);
                }
            }
            OpCode::TestSet => {
                let v = s.get_reg(i.b());
                if v.to_boolean() == (i.c() != 0) {
                    s.set_reg(i.a(), v)?;
                } else {
                    s.add_pc(1);
                }
            }
            OpCode::ForPrep => {
                let init = s.get_reg(i.a());
                let step = s.get_reg(i.a() + 2);
                s.push(init)?;
                s.push(step)?;
                s.arith(ArithOp::Sub)?;
                let new_init = s.pop()?;
                s.set_reg(i.a(), new_init)?;
                s.add_pc(i.sbx() as i64);
            }
            OpCode::ForLoop => {
                let cur = s.get_reg(i.a());
                let limit = s.get_reg(i.a() + 1);
                let step = s.get_reg(i.a() + 2);
                s.push(cur)?;
                s.push(step.clone())?;
                s.arith(ArithOp::Add)?;
                let next = s.pop()?;
                let step_nonneg = step.to_float().unwrap_or(0.0) >= 0.0;
                let keep_going = if step_nonneg {
                    next.lua_le(&limit)
                } else {
                    limit.lua_le(&next)
                };
                s.set_reg(i.a(), next.clone())?;
                if keep_going {
                    s.add_pc(i.sbx() as i64);
                    s.set_reg(i.a() + 3, next)?;
                }
            }
            OpCode::NewTable => {
                let narr = fb2int(i.b() as u8) as usize;
                let nrec = fb2int(i.c() as u8) as usize;
                s.create_table(narr, nrec)?;
                let t = s.pop()?;
                s.set_reg(i.a(), t)?;
            }
            OpCode::GetTable => {
                let recv = s.get_reg(i.b());
                let table = match recv {
                    Value::Table(t) => t,
                    _ => return Err(LuaError::NotATable),
                };
                s.get_rk(i.c())?;
                let key = s.pop()?;
                let result = table.borrow().get(&key);
                s.set_reg(i.a(), result)?;
            }
            OpCode::SetTable => {
                let recv = s.get_reg(i.a());
                let table = match recv {
                    Value::Table(t) => t,
                    _ => return Err(LuaError::NotATable),
                };
                s.get_rk(i.b())?;
                s.get_rk(i.c())?;
                let value = s.pop()?;
                let key = s.pop()?;
                table.borrow_mut().put(key, value)?;
            }
            OpCode::SetList => {
                let mut count = i.c();
                if count == 0 {
                    let extra = s.fetch()?;
                    debug_assert_eq!(extra.op(), Some(OpCode::ExtraArg));
                    count = extra.ax();
                }
                let b = i.b();
                let recv = s.get_reg(i.a());
                let table = match recv {
                    Value::Table(t) => t,
                    _ => return Err(LuaError::NotATable),
                };
                let base_index = count.saturating_sub(1) * LFIELDS_PER_FLUSH;
                for n in 1..=b {
                    let v = s.get_reg(i.a() + n);
                    table.borrow_mut().put(Value::Integer((base_index + n) as i64), v)?;
                }
            }
            OpCode::Return => {
                return Ok(false);
            }
            OpCode::GetUpval
            | OpCode::GetTabUp
            | OpCode::SetTabUp
            | OpCode::SetUpval
            | OpCode::Self_
            | OpCode::Call
            | OpCode::TailCall
            | OpCode::TForCall
            | OpCode::TForLoop
            | OpCode::Closure
            | OpCode::Vararg
            | OpCode::ExtraArg => {
                return Err(LuaError::UnknownInstruction(op as u8));
            }
        }
        Ok(true)
    }
}

const LFIELDS_PER_FLUSH: u32 = 50;

fn arith_op_for(op: OpCode) -> ArithOp {
    match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        OpCode::Div => ArithOp::Div,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::BAnd => ArithOp::BAnd,
        OpCode::BOr => ArithOp::BOr,
        OpCode::BXor => ArithOp::BXor,
        OpCode::Shl => ArithOp::Shl,
        OpCode::Shr => ArithOp::Shr,
        OpCode::Unm => ArithOp::Unm,
        OpCode::BNot => ArithOp::BNot,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

/// Lua's "floating byte" capacity hint: `eeeeexxx`. Values below 8 decode
/// to themselves; otherwise `(mantissa | 8) << (exponent - 1)`.
pub fn fb2int(x: u8) -> u32 {
    let x = x as u32;
    if x < 8 {
        x
    } else {
        let e = x >> 3;
        let m = x & 7;
        (m + 8) << (e - 1)
    }
}

/// Inverse of [`fb2int`], used when a table capacity must be emitted.
pub fn int2fb(mut x: u32) -> u8 {
    let mut e = 0u32;
    if x < 8 {
        return x as u8;
    }
    while x >= 0x10 {
        x = (x + 1) >> 1;
        e += 1;
    }
    (((e + 1) << 3) | (x - 8)) as u8
}
