//! Chunk decoder (§4.B): validates the fixed Lua 5.3 header, then
//! recursively reconstructs the prototype tree.

use crate::error::{LuaError, LuaResult};
use crate::reader::Reader;
use crate::value::Value;

const SIGNATURE: &[u8] = b"\x1bLua";
const VERSION: u8 = 0x53;
const FORMAT: u8 = 0x00;
const LUAC_DATA: &[u8] = b"\x19\x93\r\n\x1a\n";
const CINT_SIZE: u8 = 4;
const SIZET_SIZE: u8 = 8;
const INSTRUCTION_SIZE: u8 = 4;
const LUA_INTEGER_SIZE: u8 = 8;
const LUA_NUMBER_SIZE: u8 = 8;
const LUAC_INT: i64 = 0x5678;
const LUAC_NUM: f64 = 370.5;

const CONST_NIL: u8 = 0x00;
const CONST_BOOL: u8 = 0x01;
const CONST_FLOAT: u8 = 0x03;
const CONST_INT: u8 = 0x13;
const CONST_SHORT_STR: u8 = 0x04;
const CONST_LONG_STR: u8 = 0x14;

#[derive(Clone, Debug)]
pub struct Upvalue {
    pub instack: u8,
    pub idx: u8,
}

#[derive(Clone, Debug)]
pub struct LocVar {
    pub name: Vec<u8>,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Immutable after load. A chunk is framed by the header plus one main
/// `Prototype`; every nested function is owned by its parent's `protos`.
#[derive(Clone, Debug)]
pub struct Prototype {
    pub source: Vec<u8>,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: u8,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<Value>,
    pub upvalues: Vec<Upvalue>,
    pub protos: Vec<Prototype>,
    pub line_info: Vec<u32>,
    pub loc_vars: Vec<LocVar>,
    pub upvalue_names: Vec<Vec<u8>>,
}

/// Parses a precompiled Lua 5.3 chunk into its main `Prototype`. No
/// partial prototype is ever returned: any decode error aborts the whole
/// load.
pub fn undump(bytes: &[u8]) -> LuaResult<Prototype> {
    log::debug!("undump: {} byte chunk", bytes.len());
    let mut r = Reader::new(bytes);
    read_header(&mut r)?;
    r.read_byte()?; // upvalue-count byte: redundant with the main function's own count
    read_function(&mut r, &[])
}

fn read_header(r: &mut Reader) -> LuaResult<()> {
    let sig = r.read_bytes(4).map_err(|_| LuaError::NotAPrecompiledChunk)?;
    if sig != SIGNATURE {
        return Err(LuaError::NotAPrecompiledChunk);
    }
    let version = r.read_byte()?;
    if version != VERSION {
        return Err(LuaError::VersionMismatch { found: version });
    }
    let format = r.read_byte()?;
    if format != FORMAT {
        return Err(LuaError::FormatMismatch { found: format });
    }
    let data = r.read_bytes(6)?;
    if data != LUAC_DATA {
        return Err(LuaError::Corrupted("luac data marker"));
    }
    let cint_size = r.read_byte()?;
    if cint_size != CINT_SIZE {
        return Err(LuaError::IntSizeMismatch { found: cint_size });
    }
    let sizet_size = r.read_byte()?;
    if sizet_size != SIZET_SIZE {
        return Err(LuaError::SizetSizeMismatch { found: sizet_size });
    }
    let instr_size = r.read_byte()?;
    if instr_size != INSTRUCTION_SIZE {
        return Err(LuaError::InstructionSizeMismatch { found: instr_size });
    }
    let int_size = r.read_byte()?;
    if int_size != LUA_INTEGER_SIZE {
        return Err(LuaError::LuaIntegerSizeMismatch { found: int_size });
    }
    let num_size = r.read_byte()?;
    if num_size != LUA_NUMBER_SIZE {
        return Err(LuaError::LuaNumberSizeMismatch { found: num_size });
    }
    let luac_int = r.read_lua_integer()?;
    if luac_int != LUAC_INT {
        return Err(LuaError::EndiannessMismatch);
    }
    let luac_num = r.read_lua_number()?;
    if luac_num != LUAC_NUM {
        return Err(LuaError::FloatFormatMismatch);
    }
    Ok(())
}

fn read_function(r: &mut Reader, parent_source: &[u8]) -> LuaResult<Prototype> {
    let source = {
        let s = r.read_string()?;
        if s.is_empty() { parent_source.to_vec() } else { s.to_vec() }
    };
    log::debug!("read_function: source={:?}", String::from_utf8_lossy(&source));

    let line_defined = r.read_u32()?;
    let last_line_defined = r.read_u32()?;
    let num_params = r.read_byte()?;
    let is_vararg = r.read_byte()?;
    let max_stack_size = r.read_byte()?;

    let code = read_vec(r, |r| {
        let word = r.read_u32()?;
        log::trace!("instruction {word:#010x}");
        Ok(word)
    })?;
    let constants = read_vec(r, read_constant)?;
    let upvalues = read_vec(r, |r| {
        Ok(Upvalue {
            instack: r.read_byte()?,
            idx: r.read_byte()?,
        })
    })?;
    let protos = read_vec(r, |r| read_function(r, &source))?;
    let line_info = read_vec(r, |r| r.read_u32())?;
    let loc_vars = read_vec(r, |r| {
        Ok(LocVar {
            name: r.read_string()?.to_vec(),
            start_pc: r.read_u32()?,
            end_pc: r.read_u32()?,
        })
    })?;
    let upvalue_names = read_vec(r, |r| Ok(r.read_string()?.to_vec()))?;

    if !line_info.is_empty() && line_info.len() != code.len() {
        return Err(LuaError::Corrupted("lineInfo length does not match code length"));
    }
    if !upvalue_names.is_empty() && upvalue_names.len() != upvalues.len() {
        return Err(LuaError::Corrupted("upvalueNames length does not match upvalues length"));
    }

    Ok(Prototype {
        source,
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        constants,
        upvalues,
        protos,
        line_info,
        loc_vars,
        upvalue_names,
    })
}

fn read_vec<T>(r: &mut Reader, mut f: impl FnMut(&mut Reader) -> LuaResult<T>) -> LuaResult<Vec<T>> {
    let len = r.read_u32()? as usize;
    let mut v = Vec::with_capacity(len);
    for _ in 0..len {
        v.push(f(r)?);
    }
    Ok(v)
}

fn read_constant(r: &mut Reader) -> LuaResult<Value> {
    let tag = r.read_byte()?;
    let v = match tag {
        CONST_NIL => Value::Nil,
        CONST_BOOL => Value::Boolean(r.read_byte()? != 0),
        CONST_INT => Value::Integer(r.read_lua_integer()?),
        CONST_FLOAT => Value::Float(r.read_lua_number()?),
        CONST_SHORT_STR | CONST_LONG_STR => Value::str(r.read_string()?.to_vec()),
        _ => return Err(LuaError::Corrupted("unknown constant tag")),
    };
    log::trace!("constant tag={tag:#04x} -> {}", v.type_name());
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(SIGNATURE);
        buf.push(VERSION);
        buf.push(FORMAT);
        buf.extend_from_slice(LUAC_DATA);
        buf.push(CINT_SIZE);
        buf.push(SIZET_SIZE);
        buf.push(INSTRUCTION_SIZE);
        buf.push(LUA_INTEGER_SIZE);
        buf.push(LUA_NUMBER_SIZE);
        buf.extend_from_slice(&LUAC_INT.to_le_bytes());
        buf.extend_from_slice(&LUAC_NUM.to_le_bytes());
        buf
    }

    #[test]
    fn garbage_input_is_rejected() {
        let err = undump(b"GARBAGE...").unwrap_err();
        assert_eq!(err, LuaError::NotAPrecompiledChunk);
    }

    #[test]
    fn bad_integer_sanity_check_is_endianness_mismatch() {
        let mut buf = Vec::new();
        buf.extend_from_slice(SIGNATURE);
        buf.push(VERSION);
        buf.push(FORMAT);
        buf.extend_from_slice(LUAC_DATA);
        buf.push(CINT_SIZE);
        buf.push(SIZET_SIZE);
        buf.push(INSTRUCTION_SIZE);
        buf.push(LUA_INTEGER_SIZE);
        buf.push(LUA_NUMBER_SIZE);
        buf.extend_from_slice(&0x5679i64.to_le_bytes());
        buf.extend_from_slice(&LUAC_NUM.to_le_bytes());
        let err = undump(&buf).unwrap_err();
        assert_eq!(err, LuaError::EndiannessMismatch);
    }

    #[test]
    fn minimal_main_function_round_trips() {
        let mut buf = valid_header();
        buf.push(0); // upvalue-count byte (discarded)

        // main function: empty source (no parent), everything else zeroed/empty
        buf.push(0); // source: size byte 0 -> empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // lineDefined
        buf.extend_from_slice(&0u32.to_le_bytes()); // lastLineDefined
        buf.push(0); // numParams
        buf.push(0); // isVararg
        buf.push(2); // maxStackSize
        buf.extend_from_slice(&0u32.to_le_bytes()); // code: empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // constants: empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // upvalues: empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // protos: empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // lineinfo: empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // locvars: empty
        buf.extend_from_slice(&0u32.to_le_bytes()); // upvalnames: empty

        let proto = undump(&buf).unwrap();
        assert_eq!(proto.max_stack_size, 2);
        assert!(proto.code.is_empty());
    }
}
