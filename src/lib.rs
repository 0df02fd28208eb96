//! A loader and register-based virtual machine for precompiled Lua 5.3
//! chunks (`.luac` output): binary chunk decoding in [`chunk`], the
//! value/table model in [`value`] and [`table`], the embedding-style
//! state API in [`state`], and the opcode dispatcher in [`vm`].

pub mod chunk;
pub mod error;
pub mod opcode;
pub mod reader;
pub mod stack;
pub mod state;
pub mod table;
pub mod value;
pub mod vm;

pub use chunk::{undump, LocVar, Prototype, Upvalue};
pub use error::{LuaError, LuaResult};
pub use state::{ArithOp, CompareOp, LuaState, VmOptions};
pub use table::Table;
pub use value::{LuaStr, TableRef, Value};
pub use vm::Vm;

/// Loads a precompiled chunk and runs it to completion with default
/// options.
pub fn run(bytes: &[u8]) -> LuaResult<Vm> {
    let proto = undump(bytes)?;
    let options = VmOptions::for_prototype(&proto);
    let mut vm = Vm::new(options, proto);
    vm.run()?;
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_rejects_a_chunk_without_the_lua_signature() {
        assert!(matches!(run(b"not a chunk"), Err(LuaError::NotAPrecompiledChunk)));
    }
}
