//! Error taxonomy for the loader and VM.
//!
//! One flat enum per spec kind, each carrying just enough payload for a
//! useful message. No variant means "retry" - nothing in this crate
//! retries an error, it aborts the load or the current VM step.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LuaError {
    // --- decoder ---
    NotAPrecompiledChunk,
    VersionMismatch { found: u8 },
    FormatMismatch { found: u8 },
    Corrupted(&'static str),
    IntSizeMismatch { found: u8 },
    SizetSizeMismatch { found: u8 },
    InstructionSizeMismatch { found: u8 },
    LuaIntegerSizeMismatch { found: u8 },
    LuaNumberSizeMismatch { found: u8 },
    EndiannessMismatch,
    FloatFormatMismatch,
    Truncated,

    // --- stack ---
    StackOverflow,
    StackUnderflow,
    InvalidIndex(i64),

    // --- values ---
    ArithmeticError,
    LengthError,
    NotATable,
    TableIndexIsNil,
    TableIndexIsNan,

    // --- vm ---
    UnknownInstruction(u8),
    UnsupportedJmpClose,

    // --- allocation ---
    OutOfMemory,
}

pub type LuaResult<T> = Result<T, LuaError>;

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaError::NotAPrecompiledChunk => write!(f, "not a precompiled chunk"),
            LuaError::VersionMismatch { found } => {
                write!(f, "version mismatch: expected 0x53, found {found:#04x}")
            }
            LuaError::FormatMismatch { found } => {
                write!(f, "format mismatch: expected 0x00, found {found:#04x}")
            }
            LuaError::Corrupted(what) => write!(f, "corrupted chunk: {what}"),
            LuaError::IntSizeMismatch { found } => {
                write!(f, "int size mismatch: expected 4, found {found}")
            }
            LuaError::SizetSizeMismatch { found } => {
                write!(f, "size_t size mismatch: expected 8, found {found}")
            }
            LuaError::InstructionSizeMismatch { found } => {
                write!(f, "instruction size mismatch: expected 4, found {found}")
            }
            LuaError::LuaIntegerSizeMismatch { found } => {
                write!(f, "lua_Integer size mismatch: expected 8, found {found}")
            }
            LuaError::LuaNumberSizeMismatch { found } => {
                write!(f, "lua_Number size mismatch: expected 8, found {found}")
            }
            LuaError::EndiannessMismatch => write!(f, "integer sanity check failed (endianness?)"),
            LuaError::FloatFormatMismatch => write!(f, "float sanity check failed"),
            LuaError::Truncated => write!(f, "truncated chunk: ran out of bytes mid-read"),
            LuaError::StackOverflow => write!(f, "stack overflow"),
            LuaError::StackUnderflow => write!(f, "stack underflow"),
            LuaError::InvalidIndex(idx) => write!(f, "invalid stack index {idx}"),
            LuaError::ArithmeticError => write!(f, "attempt to perform arithmetic on an invalid value"),
            LuaError::LengthError => write!(f, "attempt to get length of a non-string/table value"),
            LuaError::NotATable => write!(f, "attempt to index a non-table value"),
            LuaError::TableIndexIsNil => write!(f, "table index is nil"),
            LuaError::TableIndexIsNan => write!(f, "table index is NaN"),
            LuaError::UnknownInstruction(op) => write!(f, "unimplemented opcode {op}"),
            LuaError::UnsupportedJmpClose => write!(f, "JMP with upvalue close (A != 0) is not supported"),
            LuaError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for LuaError {}
