//! Static per-opcode metadata (§4.H): instruction mode, operand kinds,
//! name for disassembly. Opcode order is fixed and matches the Lua 5.3
//! reference implementation exactly - it is part of the wire format
//! (`code` entries are read as raw `u32`s and decoded against this table).

mod instruction;

pub use instruction::{ax, b, bx, c, is_const, opcode as decode_opcode, rk_index, sbx, Instruction, BITRK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Argument is not used.
    N,
    /// Argument is used as a plain unsigned value.
    U,
    /// Argument is a register.
    R,
    /// Argument is a register or a constant (`RK`).
    K,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKX,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    Self_,
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
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    Vararg,
    ExtraArg,
}

pub const NUM_OPCODES: usize = 47;

impl OpCode {
    /// `byte` comes from a 6-bit instruction field (0..=63); only
    /// `0..NUM_OPCODES` are valid discriminants. `None` for the rest
    /// rather than transmuting out-of-range bytes.
    #[inline]
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        if (byte as usize) < NUM_OPCODES {
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    pub fn info(self) -> &'static OpInfo {
        &OPCODE_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn mode(self) -> OpMode {
        self.info().mode
    }
}

pub struct OpInfo {
    pub name: &'static str,
    pub mode: OpMode,
    pub b_kind: ArgKind,
    pub c_kind: ArgKind,
    /// "Test" instructions (EQ/LT/LE/TEST/TESTSET) don't set R(A); they
    /// conditionally skip the next instruction instead.
    pub is_test: bool,
    pub sets_a: bool,
}

macro_rules! op {
    ($name:literal, $mode:ident, $b:ident, $c:ident, $test:literal, $seta:literal) => {
        OpInfo {
            name: $name,
            mode: OpMode::$mode,
            b_kind: ArgKind::$b,
            c_kind: ArgKind::$c,
            is_test: $test,
            sets_a: $seta,
        }
    };
}

pub static OPCODE_TABLE: [OpInfo; NUM_OPCODES] = [
    op!("MOVE", IABC, R, N, false, true),
    op!("LOADK", IABx, N, N, false, true),
    op!("LOADKX", IABx, N, N, false, true),
    op!("LOADBOOL", IABC, U, U, false, true),
    op!("LOADNIL", IABC, U, N, false, true),
    op!("GETUPVAL", IABC, U, N, false, true),
    op!("GETTABUP", IABC, U, K, false, true),
    op!("GETTABLE", IABC, R, K, false, true),
    op!("SETTABUP", IABC, K, K, false, false),
    op!("SETUPVAL", IABC, U, N, false, false),
    op!("SETTABLE", IABC, K, K, false, false),
    op!("NEWTABLE", IABC, U, U, false, true),
    op!("SELF", IABC, R, K, false, true),
    op!("ADD", IABC, K, K, false, true),
    op!("SUB", IABC, K, K, false, true),
    op!("MUL", IABC, K, K, false, true),
    op!("MOD", IABC, K, K, false, true),
    op!("POW", IABC, K, K, false, true),
    op!("DIV", IABC, K, K, false, true),
    op!("IDIV", IABC, K, K, false, true),
    op!("BAND", IABC, K, K, false, true),
    op!("BOR", IABC, K, K, false, true),
    op!("BXOR", IABC, K, K, false, true),
    op!("SHL", IABC, K, K, false, true),
    op!("SHR", IABC, K, K, false, true),
    op!("UNM", IABC, R, N, false, true),
    op!("BNOT", IABC, R, N, false, true),
    op!("NOT", IABC, R, N, false, true),
    op!("LEN", IABC, R, N, false, true),
    op!("CONCAT", IABC, R, R, false, true),
    op!("JMP", IAsBx, N, N, false, false),
    op!("EQ", IABC, K, K, true, false),
    op!("LT", IABC, K, K, true, false),
    op!("LE", IABC, K, K, true, false),
    op!("TEST", IABC, N, U, true, false),
    op!("TESTSET", IABC, R, U, true, true),
    op!("CALL", IABC, U, U, false, true),
    op!("TAILCALL", IABC, U, U, false, true),
    op!("RETURN", IABC, U, N, false, false),
    op!("FORLOOP", IAsBx, N, N, false, true),
    op!("FORPREP", IAsBx, N, N, false, true),
    op!("TFORCALL", IABC, N, U, false, false),
    op!("TFORLOOP", IAsBx, N, N, false, true),
    op!("SETLIST", IABC, U, U, false, false),
    op!("CLOSURE", IABx, N, N, false, true),
    op!("VARARG", IABC, U, N, false, true),
    op!("EXTRAARG", IAx, N, N, false, false),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_order_matches_the_reference_numbering() {
        assert_eq!(OpCode::Move as u8, 0);
        assert_eq!(OpCode::LoadK as u8, 1);
        assert_eq!(OpCode::ExtraArg as u8, 46);
        assert_eq!(NUM_OPCODES, 47);
    }

    #[test]
    fn table_entries_line_up_with_their_enum_index() {
        assert_eq!(OpCode::Move.name(), "MOVE");
        assert_eq!(OpCode::ExtraArg.name(), "EXTRAARG");
        assert_eq!(OpCode::Jmp.mode(), OpMode::IAsBx);
    }
}
