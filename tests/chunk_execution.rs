//! End-to-end: hand-assemble a precompiled chunk byte buffer (header +
//! one main prototype) and run it through `undump` -> `Vm::run`,
//! exercising the decoder and the dispatcher together rather than in
//! isolation.

use luac53::{undump, Value, Vm, VmOptions};

const SIGNATURE: &[u8] = b"\x1bLua";
const VERSION: u8 = 0x53;
const FORMAT: u8 = 0x00;
const LUAC_DATA: &[u8] = b"\x19\x93\r\n\x1a\n";
const LUAC_INT: i64 = 0x5678;
const LUAC_NUM: f64 = 370.5;

const CONST_INT: u8 = 0x13;

fn header() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(SIGNATURE);
    buf.push(VERSION);
    buf.push(FORMAT);
    buf.extend_from_slice(LUAC_DATA);
    buf.push(4); // cint size
    buf.push(8); // size_t size
    buf.push(4); // instruction size
    buf.push(8); // lua_Integer size
    buf.push(8); // lua_Number size
    buf.extend_from_slice(&LUAC_INT.to_le_bytes());
    buf.extend_from_slice(&LUAC_NUM.to_le_bytes());
    buf
}

fn push_vec_header(buf: &mut Vec<u8>, len: u32) {
    buf.extend_from_slice(&len.to_le_bytes());
}

fn iabc(op: u8, a: u32, b: u32, c: u32) -> u32 {
    (op as u32) | (a << 6) | (c << 14) | (b << 23)
}

fn iabx(op: u8, a: u32, bx: u32) -> u32 {
    (op as u32) | (a << 6) | (bx << 14)
}

// Opcode numbers, matching the fixed Lua 5.3 ordering (see src/opcode/mod.rs).
const OP_LOADK: u8 = 1;
const OP_ADD: u8 = 13;
const OP_RETURN: u8 = 38;

/// Builds a minimal chunk computing `R2 = 10 + 32` via two `LOADK`s and
/// an `ADD`, then `RETURN`s.
fn addition_chunk() -> Vec<u8> {
    let mut buf = header();
    buf.push(0); // upvalue-count byte (discarded by undump)

    buf.push(0); // source: empty
    push_vec_header(&mut buf, 0); // lineDefined
    push_vec_header(&mut buf, 0); // lastLineDefined
    buf.push(0); // numParams
    buf.push(0); // isVararg
    buf.push(3); // maxStackSize

    let code = vec![
        iabx(OP_LOADK, 0, 0),
        iabx(OP_LOADK, 1, 1),
        iabc(OP_ADD, 2, 0, 1),
        iabc(OP_RETURN, 0, 1, 0),
    ];
    push_vec_header(&mut buf, code.len() as u32);
    for word in &code {
        buf.extend_from_slice(&word.to_le_bytes());
    }

    // constants: 10, 32
    push_vec_header(&mut buf, 2);
    buf.push(CONST_INT);
    buf.extend_from_slice(&10i64.to_le_bytes());
    buf.push(CONST_INT);
    buf.extend_from_slice(&32i64.to_le_bytes());

    push_vec_header(&mut buf, 0); // upvalues
    push_vec_header(&mut buf, 0); // protos
    push_vec_header(&mut buf, 0); // lineinfo
    push_vec_header(&mut buf, 0); // locvars
    push_vec_header(&mut buf, 0); // upvalnames

    buf
}

#[test]
fn decodes_and_executes_a_hand_assembled_chunk() {
    let _ = env_logger::try_init();
    let bytes = addition_chunk();
    let proto = undump(&bytes).expect("chunk should decode");
    assert_eq!(proto.code.len(), 4);
    assert_eq!(proto.constants.len(), 2);

    let mut vm = Vm::new(VmOptions::for_prototype(&proto), proto);
    vm.run().expect("chunk should execute to RETURN");
    assert!(matches!(vm.state.get_reg(2), Value::Integer(42)));
}

#[test]
fn top_level_run_helper_decodes_and_executes_in_one_call() {
    let bytes = addition_chunk();
    let vm = luac53::run(&bytes).expect("run should succeed");
    assert!(matches!(vm.state.get_reg(2), Value::Integer(42)));
}
